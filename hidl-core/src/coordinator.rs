//! The compilation context: parse cache, import cycle detection and
//! version enforcement for one compiler run.
//!
//! Every file is parsed at most once per context. A file is resolved in
//! two stages. The first stage resolves its own declarations; any other
//! file it needs on the way is parsed recursively, and needing a file that
//! is still in its first stage is a [`CoreError::CyclicImport`]. Once the
//! file is cached, the packages it imports are queued. The queue is
//! drained only when no file is in its first stage, parsing the members
//! not yet cached, so two packages may import each other no matter which
//! file is parsed first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::rc::Rc;

use crate::error::CoreError;
use crate::fqname::FqName;
use crate::hir::HirFile;
use crate::package_root::PackageRoots;
use crate::scope::TypeId;
use crate::{name_resolve, parser, typecheck};

/// Checks applied to a file once it is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforce {
    /// Frozen hashes and the minor-version uprev rule.
    Full,
    /// Uprev rule only, for hash printing.
    NoHash,
    /// Nothing; used for imports.
    None,
}

pub struct CompilationContext {
    roots: PackageRoots,
    cache: HashMap<FqName, Rc<HirFile>>,
    /// Files in their first resolution stage, outermost first.
    in_progress: Vec<FqName>,
    /// Imported packages waiting to be parsed in full.
    pending_packages: Vec<FqName>,
    /// Packages already queued once.
    pulled_packages: HashSet<FqName>,
    /// Frozen hashes per package root prefix.
    frozen: HashMap<String, BTreeMap<FqName, Vec<String>>>,
}

impl CompilationContext {
    pub fn new(roots: PackageRoots) -> Self {
        CompilationContext {
            roots,
            cache: HashMap::new(),
            in_progress: Vec::new(),
            pending_packages: Vec::new(),
            pulled_packages: HashSet::new(),
            frozen: HashMap::new(),
        }
    }

    pub fn roots(&self) -> &PackageRoots {
        &self.roots
    }

    /// Number of distinct files parsed so far.
    pub fn parsed_files(&self) -> usize {
        self.cache.len()
    }

    pub fn file_exists(&self, fq_name: &FqName) -> bool {
        self.roots.file_exists(fq_name)
    }

    /// Parses the file declaring `fq_name` (`pkg@1.0::IFoo` or any name
    /// nested in it) and everything it depends on.
    pub fn parse(&mut self, fq_name: &FqName, enforce: Enforce) -> Result<Rc<HirFile>, CoreError> {
        if !fq_name.is_fully_qualified() {
            return Err(CoreError::InvalidFqName {
                input: fq_name.to_string(),
                reason: "expected a fully-qualified type name".to_string(),
            });
        }
        let file_name = fq_name.top_level();

        if let Some(file) = self.cache.get(&file_name) {
            log::debug!("cache hit for {file_name}");
            let file = Rc::clone(file);
            self.enforce(&file, enforce)?;
            return Ok(file);
        }

        let loaded = self.load(&file_name);
        if loaded.is_err() && self.in_progress.is_empty() {
            self.abandon_pending_packages();
        }
        let file = loaded?;
        self.enforce(&file, enforce)?;
        Ok(file)
    }

    /// Reads, resolves and caches one file that is not cached yet, then
    /// pulls queued packages if this is the outermost parse.
    fn load(&mut self, file_name: &FqName) -> Result<Rc<HirFile>, CoreError> {
        if let Some(position) = self.in_progress.iter().position(|name| name == file_name) {
            let mut chain = self.in_progress[position..].to_vec();
            chain.push(file_name.clone());
            return Err(CoreError::CyclicImport { chain });
        }

        let path = self.roots.file_path(file_name)?;
        if !path.is_file() {
            return Err(CoreError::FileNotFound {
                fq_name: file_name.clone(),
                path,
            });
        }
        log::debug!("parsing {file_name} from {}", path.display());
        let source = fs::read_to_string(&path).map_err(|source| CoreError::SourceIo {
            path: path.clone(),
            source,
        })?;
        let ast = parser::parse(&path, &source)?;

        self.in_progress.push(file_name.clone());
        let resolved = name_resolve::resolve_file(self, file_name, &path, &ast);
        self.in_progress.pop();
        let resolved = resolved?;
        typecheck::validate(&resolved)?;

        let file = Rc::new(resolved);
        self.cache.insert(file_name.clone(), Rc::clone(&file));
        for package in file.imported_packages() {
            if self.pulled_packages.insert(package.clone()) {
                self.pending_packages.push(package);
            }
        }

        if self.in_progress.is_empty() {
            if let Err(err) = self.pull_imported_packages() {
                self.cache.remove(file_name);
                return Err(err);
            }
        }
        Ok(file)
    }

    /// Parses a textual name, with full enforcement.
    pub fn parse_str(&mut self, fq_name: &str) -> Result<Rc<HirFile>, CoreError> {
        let fq_name = FqName::parse(fq_name)?;
        self.parse(&fq_name, Enforce::Full)
    }

    /// Parses a target that is either a file-level name or a whole
    /// package.
    pub fn parse_target(&mut self, target: &FqName, enforce: Enforce) -> Result<Vec<Rc<HirFile>>, CoreError> {
        if target.is_package() {
            self.parse_package(target, enforce)
        } else {
            Ok(vec![self.parse(target, enforce)?])
        }
    }

    /// Parses every file directly in the package directory.
    pub fn parse_package(&mut self, package: &FqName, enforce: Enforce) -> Result<Vec<Rc<HirFile>>, CoreError> {
        let mut files = Vec::new();
        for name in self.roots.package_files(package)? {
            files.push(self.parse(&name, enforce)?);
        }
        Ok(files)
    }

    pub fn package_files(&self, package: &FqName) -> Result<Vec<FqName>, CoreError> {
        self.roots.package_files(package)
    }

    /// Interfaces of a package, i.e. every file but `types`.
    pub fn package_interfaces(&self, package: &FqName) -> Result<Vec<FqName>, CoreError> {
        let mut files = self.roots.package_files(package)?;
        files.retain(|name| name.name() != "types");
        Ok(files)
    }

    /// Finds a declared type by fully-qualified name, looking in the file
    /// named after its first component, then in the package's `types`.
    pub fn lookup_type(&mut self, fq_name: &FqName) -> Result<Option<(Rc<HirFile>, TypeId)>, CoreError> {
        log::trace!("looking up {fq_name}");
        if !fq_name.is_fully_qualified() {
            return Ok(None);
        }
        for candidate in [fq_name.top_level(), fq_name.types_for_package()] {
            if !self.file_exists(&candidate) {
                continue;
            }
            let file = self.parse(&candidate, Enforce::None)?;
            if let Some(id) = file.find_type(fq_name.names()) {
                return Ok(Some((file, id)));
            }
        }
        Ok(None)
    }

    /// Parses every uncached member of the queued packages. Parsing a
    /// member may queue further packages; they are drained here as well.
    fn pull_imported_packages(&mut self) -> Result<(), CoreError> {
        while let Some(package) = self.pending_packages.pop() {
            if let Err(err) = self.pull_package(&package) {
                self.pulled_packages.remove(&package);
                self.abandon_pending_packages();
                return Err(err);
            }
        }
        Ok(())
    }

    fn pull_package(&mut self, package: &FqName) -> Result<(), CoreError> {
        for name in self.roots.package_files(package)? {
            if self.cache.contains_key(&name) {
                continue;
            }
            log::debug!("pulling {name} through an import of {package}");
            self.parse(&name, Enforce::None)?;
        }
        Ok(())
    }

    /// Forgets queued packages so a later parse queues them again.
    fn abandon_pending_packages(&mut self) {
        for package in self.pending_packages.drain(..) {
            self.pulled_packages.remove(&package);
        }
    }

    fn enforce(&mut self, file: &HirFile, enforce: Enforce) -> Result<(), CoreError> {
        match enforce {
            Enforce::None => Ok(()),
            Enforce::NoHash => self.check_uprev(file),
            Enforce::Full => {
                self.check_frozen_hash(file)?;
                self.check_uprev(file)
            }
        }
    }

    fn check_frozen_hash(&mut self, file: &HirFile) -> Result<(), CoreError> {
        let Some(root) = self.roots.root_for(file.fq_name()) else {
            return Ok(());
        };
        let prefix = root.prefix.clone();
        if !self.frozen.contains_key(&prefix) {
            let hashes = self.roots.frozen_hashes(file.fq_name())?;
            self.frozen.insert(prefix.clone(), hashes);
        }
        let Some(expected) = self.frozen.get(&prefix).and_then(|hashes| hashes.get(file.fq_name())) else {
            return Ok(());
        };

        let actual = file.hash();
        if expected.iter().any(|hash| hash == actual) {
            return Ok(());
        }
        Err(CoreError::HashMismatch {
            fq_name: file.fq_name().clone(),
            expected: expected.clone(),
            actual: actual.to_string(),
        })
    }

    /// `pkg@M.n::I` with `n > 0` extends `pkg@M.k::I` for the highest
    /// `k < n` that has `I`.
    fn check_uprev(&self, file: &HirFile) -> Result<(), CoreError> {
        let Some(interface) = file.interface() else {
            return Ok(());
        };
        let fq_name = file.fq_name();
        let (Some(major), Some(minor)) = (fq_name.major(), fq_name.minor()) else {
            return Ok(());
        };

        let previous = (0..minor).rev().map(|k| fq_name.with_version(major, k)).find(|candidate| self.file_exists(candidate));
        let Some(previous) = previous else {
            return Ok(());
        };

        let parent = interface
            .as_interface()
            .and_then(|i| i.parent.as_ref())
            .map(|parent| &parent.fq_name);
        if parent == Some(&previous) {
            return Ok(());
        }
        Err(CoreError::TypeValidation {
            path: file.path().to_path_buf(),
            location: interface.location,
            message: format!("{fq_name} must extend {previous}, the interface it uprevs"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::rc::Rc;

    use super::*;
    use crate::constant::ConstValue;
    use crate::scope::Entity;
    use crate::testing::{Package, context_with};

    #[test]
    fn evaluates_enum_value_reference() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[(
                "types",
                "package test@1.0;\n\
                 enum Color : int32_t { RED, GREEN, BLUE };\n\
                 const int32_t PICK = Color.GREEN;\n",
            )],
        )]);
        let file = context.parse_str("test@1.0::types").expect("parse");
        let color = file.find_type(&["Color".to_string()]).expect("Color");
        let green = file.named_type(color).as_enum().and_then(|e| e.value("GREEN")).expect("GREEN");
        assert_eq!(green.value.value(), ConstValue::Int(1));
        let Some(Entity::Constant(pick)) = file.find_entity(&["PICK".to_string()]) else {
            panic!("PICK missing");
        };
        assert_eq!(file.constant(pick).value.value(), ConstValue::Int(1));
    }

    #[test]
    fn mutual_package_imports_are_allowed() {
        let (_dir, mut context) = context_with(&[
            Package::new(
                "a@1.0",
                &[(
                    "types",
                    "package a@1.0;\nimport b@1.0;\nstruct Outer { Shared shared; };\n",
                )],
            ),
            Package::new(
                "b@1.0",
                &[
                    ("types", "package b@1.0;\nimport a@1.0;\nstruct Shared { int32_t x; };\n"),
                    ("IB", "package b@1.0;\nimport a@1.0;\ninterface IB { ping(); };\n"),
                ],
            ),
        ]);
        let a = context.parse_str("a@1.0::types").expect("parse a");
        assert_eq!(context.parsed_files(), 3);
        let names: Vec<String> = a.imported_packages().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["b@1.0"]);
        let b = context.parse_str("b@1.0::types").expect("parse b");
        assert_eq!(b.imported_packages().len(), 1);
    }

    #[test]
    fn package_cycles_do_not_depend_on_the_entry_file() {
        let packages = [
            Package::new(
                "a@1.0",
                &[
                    (
                        "types",
                        "package a@1.0;\nimport b@1.0;\nstruct Outer { Shared shared; };\n",
                    ),
                    ("IA", "package a@1.0;\ninterface IA { take(Outer outer); };\n"),
                ],
            ),
            Package::new(
                "b@1.0",
                &[("types", "package b@1.0;\nimport a@1.0;\nstruct Shared { int32_t x; };\n")],
            ),
        ];
        for entry in ["a@1.0::types", "a@1.0::IA", "b@1.0::types"] {
            let (_dir, mut context) = context_with(&packages);
            context
                .parse_str(entry)
                .unwrap_or_else(|err| panic!("starting from {entry}: {err}"));
            assert_eq!(context.parsed_files(), 3, "starting from {entry}");
        }

        let (_dir, mut context) = context_with(&packages);
        let files = context
            .parse_target(&FqName::parse("a@1.0").expect("name"), Enforce::Full)
            .expect("parse package");
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn failed_package_pull_can_be_retried() {
        let (_dir, mut context) = context_with(&[
            Package::new("a@1.0", &[("types", "package a@1.0;\nimport b@1.0;\nstruct S { int32_t x; };\n")]),
            Package::new(
                "b@1.0",
                &[
                    ("types", "package b@1.0;\nstruct T { int32_t y; };\n"),
                    ("IB", "package b@1.0;\ninterface IB { broken( };\n"),
                ],
            ),
        ]);
        for _ in 0..2 {
            let err = context.parse_str("a@1.0::types").unwrap_err();
            assert_eq!(err.kind(), "SyntaxError", "{err}");
        }
        assert!(context.parse_str("b@1.0::types").is_ok());
    }

    #[test]
    fn division_by_zero_names_expression_and_line() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[("types", "package test@1.0;\nconst int32_t X = 5 / 0;\n")],
        )]);
        match context.parse_str("test@1.0::types") {
            Err(CoreError::ConstantEvaluation {
                location,
                expression,
                ..
            }) => {
                assert_eq!(location.line, 2);
                assert_eq!(expression, "5 / 0");
            }
            other => panic!("unexpected result {:?}", other.map(|f| f.fq_name().clone())),
        }
    }

    #[test]
    fn missing_parent_version_is_unresolved_parent() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@2.0",
            &[("IFoo", "package test@2.0;\ninterface IFoo extends @1.0::IFoo {};\n")],
        )]);
        match context.parse_str("test@2.0::IFoo") {
            Err(CoreError::UnresolvedParent {
                interface, parent, ..
            }) => {
                assert_eq!(interface, "IFoo");
                assert_eq!(parent, "test@1.0::IFoo");
            }
            other => panic!("unexpected result {:?}", other.map(|f| f.fq_name().clone())),
        }
    }

    #[test]
    fn parses_each_file_once() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[
                ("types", "package test@1.0;\nstruct Point { int32_t x; int32_t y; };\n"),
                ("IFoo", "package test@1.0;\ninterface IFoo { move(Point to); };\n"),
            ],
        )]);
        let first = context.parse_str("test@1.0::IFoo").expect("parse");
        let second = context.parse_str("test@1.0::IFoo.Nested").expect("parse");
        assert!(Rc::ptr_eq(&first, &second));
        let types = context.parse_str("test@1.0::types").expect("parse");
        assert!(Rc::ptr_eq(&first.dependencies()[0], &types));
        assert_eq!(context.parsed_files(), 2);
    }

    #[test]
    fn file_level_cycle_is_rejected() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[
                ("IA", "package test@1.0;\nimport test@1.0::IB;\ninterface IA {};\n"),
                ("IB", "package test@1.0;\nimport test@1.0::IA;\ninterface IB {};\n"),
            ],
        )]);
        match context.parse_str("test@1.0::IA") {
            Err(CoreError::CyclicImport { chain }) => {
                let chain: Vec<String> = chain.iter().map(ToString::to_string).collect();
                assert_eq!(chain, vec!["test@1.0::IA", "test@1.0::IB", "test@1.0::IA"]);
            }
            other => panic!("unexpected result {:?}", other.map(|f| f.fq_name().clone())),
        }
        // A failed parse leaves nothing half-built behind.
        assert_eq!(context.parsed_files(), 0);
    }

    #[test]
    fn duplicate_declaration_in_either_order() {
        for source in [
            "package test@1.0;\nstruct S {};\nconst int32_t S = 1;\n",
            "package test@1.0;\nconst int32_t S = 1;\nstruct S {};\n",
        ] {
            let (_dir, mut context) = context_with(&[Package::new("test@1.0", &[("types", source)])]);
            let err = context.parse_str("test@1.0::types").unwrap_err();
            assert_eq!(err.kind(), "DuplicateDeclarationError");
        }
    }

    #[test]
    fn frozen_hash_mismatch_is_reported() {
        let (dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[("IFoo", "package test@1.0;\ninterface IFoo { ping(); };\n")],
        )]);
        let actual = context
            .parse(&FqName::parse("test@1.0::IFoo").expect("name"), Enforce::None)
            .expect("parse")
            .hash()
            .to_string();

        let frozen = dir.path().join("test").join("current.txt");
        fs::write(&frozen, format!("{} test@1.0::IFoo\n", "0".repeat(64))).expect("write");
        let mut fresh = CompilationContext::new(context.roots().clone());
        match fresh.parse_str("test@1.0::IFoo") {
            Err(CoreError::HashMismatch { actual: found, .. }) => assert_eq!(found, actual),
            other => panic!("unexpected result {:?}", other.map(|f| f.fq_name().clone())),
        }
        let no_hash = FqName::parse("test@1.0::IFoo").expect("name");
        fresh.parse(&no_hash, Enforce::NoHash).expect("hash not enforced");

        fs::write(&frozen, format!("{} test@1.0::IFoo\n{actual} test@1.0::IFoo\n", "0".repeat(64)))
            .expect("write");
        let mut fresh = CompilationContext::new(context.roots().clone());
        fresh.parse_str("test@1.0::IFoo").expect("one recorded hash matches");
    }

    #[test]
    fn minor_uprev_must_extend_previous_version() {
        let (_dir, mut context) = context_with(&[
            Package::new("test@1.0", &[("IFoo", "package test@1.0;\ninterface IFoo {};\n")]),
            Package::new(
                "test@1.1",
                &[
                    ("IFoo", "package test@1.1;\ninterface IFoo extends @1.0::IFoo {};\n"),
                    ("IBar", "package test@1.1;\ninterface IBar {};\n"),
                ],
            ),
            Package::new("test@1.2", &[("IFoo", "package test@1.2;\ninterface IFoo {};\n")]),
        ]);
        context.parse_str("test@1.1::IFoo").expect("proper uprev");
        context.parse_str("test@1.1::IBar").expect("new interface");
        let err = context.parse_str("test@1.2::IFoo").unwrap_err();
        assert!(err.to_string().contains("must extend test@1.1::IFoo"), "{err}");
        let name = FqName::parse("test@1.2::IFoo").expect("name");
        context.parse(&name, Enforce::None).expect("not enforced");
    }

    #[test]
    fn package_targets_expand_to_every_file() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[
                ("types", "package test@1.0;\nenum E : uint8_t { A };\n"),
                ("IFoo", "package test@1.0;\ninterface IFoo { get() generates (E e); };\n"),
                ("IBar", "package test@1.0;\ninterface IBar {};\n"),
            ],
        )]);
        let package = FqName::parse("test@1.0").expect("name");
        let files = context.parse_target(&package, Enforce::Full).expect("parse");
        let names: Vec<String> = files.iter().map(|f| f.fq_name().to_string()).collect();
        assert_eq!(names, vec!["test@1.0::types", "test@1.0::IBar", "test@1.0::IFoo"]);
        let interfaces = context.package_interfaces(&package).expect("list");
        assert_eq!(interfaces.len(), 2);

        let found = context
            .lookup_type(&FqName::parse("test@1.0::E").expect("name"))
            .expect("lookup");
        let (file, id) = found.expect("E exists");
        assert_eq!(file.named_type(id).name, "E");
        let missing = context
            .lookup_type(&FqName::parse("test@1.0::Missing").expect("name"))
            .expect("lookup");
        assert!(missing.is_none());
    }

    #[test]
    fn missing_file_is_reported() {
        let (_dir, mut context) = context_with(&[Package::new("test@1.0", &[])]);
        let err = context.parse_str("test@1.0::INope").unwrap_err();
        assert!(matches!(err, CoreError::FileNotFound { .. }), "{err:?}");
        let err = context.parse_str("test@1.0").unwrap_err();
        assert!(matches!(err, CoreError::InvalidFqName { .. }), "{err:?}");
    }
}
