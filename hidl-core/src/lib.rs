//! Front end of the HIDL interface compiler.
//!
//! This crate turns `.hal` interface descriptions into validated,
//! hash-stable files ready for code emitters. The pipeline is roughly:
//!
//!   source .hal
//!     -> lexer        (tokens)
//!     -> parser       (surface AST)
//!     -> name_resolve (scopes, imports, constant values)
//!     -> typecheck    (per-declaration legality)
//!     -> hir          (validated file, structural hash)
//!
//! [`CompilationContext`] drives the pipeline across files and packages.
//! Higher-level tools (the CLI, emitters) should depend on this crate
//! rather than reimplementing any of it.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;
pub mod fqname;

// ---------------------------------------------------------------------
// Semantic layers: types, constants, name resolution, checking, HIR
// ---------------------------------------------------------------------

pub mod types;
pub mod builtins;
pub mod constant;
pub mod scope;
pub mod name_resolve;
pub mod typecheck;
pub mod hir;
pub mod hash;

// ---------------------------------------------------------------------
// Packages and compiler orchestration
// ---------------------------------------------------------------------

pub mod package_root;
pub mod coordinator;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use coordinator::{CompilationContext, Enforce};
pub use error::CoreError;
pub use fqname::FqName;
pub use hir::HirFile;
pub use package_root::PackageRoots;

/// Package trees on disk for multi-file tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::fs;

    use tempfile::TempDir;

    use crate::{CompilationContext, FqName, PackageRoots};

    /// One package version and its files, as `(name, source)` pairs.
    pub struct Package<'a> {
        name: FqName,
        files: &'a [(&'a str, &'a str)],
    }

    impl<'a> Package<'a> {
        pub fn new(name: &str, files: &'a [(&'a str, &'a str)]) -> Self {
            Package {
                name: FqName::parse(name).expect("package name"),
                files,
            }
        }
    }

    /// Writes every package under a fresh directory, with one root per
    /// first package component.
    pub fn context_with(packages: &[Package<'_>]) -> (TempDir, CompilationContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut roots = PackageRoots::new();
        for package in packages {
            let components = package.name.package_components();
            let prefix = &components[0];
            let root = dir.path().join(prefix);
            if roots.roots().iter().all(|r| &r.prefix != prefix) {
                roots.add(prefix, &root).expect("root");
            }

            let mut package_dir = root;
            for component in &components[1..] {
                package_dir.push(component);
            }
            package_dir.push(package.name.version_string());
            fs::create_dir_all(&package_dir).expect("package dir");
            for (name, source) in package.files {
                fs::write(package_dir.join(format!("{name}.hal")), source).expect("write");
            }
        }
        (dir, CompilationContext::new(roots))
    }
}
