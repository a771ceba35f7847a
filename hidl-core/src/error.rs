use std::path::PathBuf;

use thiserror::Error;

use crate::fqname::FqName;
use crate::span::Location;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read {}: {source}", .path.display())]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid fully-qualified name '{input}': {reason}")]
    InvalidFqName { input: String, reason: String },
    #[error("invalid package root '{spec}': {reason}")]
    InvalidPackageRoot { spec: String, reason: String },
    #[error("no package root covers {0}")]
    MissingPackageRoot(FqName),
    #[error("could not find {fq_name} (looked at {})", .path.display())]
    FileNotFound { fq_name: FqName, path: PathBuf },
    #[error("{}:{location}: lex error: {message}", .path.display())]
    LexError {
        path: PathBuf,
        location: Location,
        message: String,
    },
    #[error("{}:{location}: syntax error: expected {expected}, found {found}", .path.display())]
    SyntaxError {
        path: PathBuf,
        location: Location,
        expected: String,
        found: String,
    },
    #[error("{}: declares package {declared} but is located in {expected}", .path.display())]
    PackageMismatch {
        path: PathBuf,
        declared: FqName,
        expected: FqName,
    },
    #[error("{}:{location}: redefinition of '{name}' (previously declared at {previous})", .path.display())]
    DuplicateDeclaration {
        path: PathBuf,
        location: Location,
        name: String,
        previous: Location,
    },
    #[error("{}:{location}: failed to resolve '{name}' (searched: {})", .path.display(), .searched.join(", "))]
    UnresolvedName {
        path: PathBuf,
        location: Location,
        name: String,
        searched: Vec<String>,
    },
    #[error("{}:{location}: interface {interface} extends {parent}, which could not be resolved", .path.display())]
    UnresolvedParent {
        path: PathBuf,
        location: Location,
        interface: String,
        parent: String,
    },
    #[error("cyclic import: {}", render_chain(.chain))]
    CyclicImport { chain: Vec<FqName> },
    #[error("{}:{location}: cannot evaluate '{expression}': {message}", .path.display())]
    ConstantEvaluation {
        path: PathBuf,
        location: Location,
        expression: String,
        message: String,
    },
    #[error("{}:{location}: {message}", .path.display())]
    TypeValidation {
        path: PathBuf,
        location: Location,
        message: String,
    },
    #[error("{fq_name} has hash {actual}, which does not match any frozen hash ({})", .expected.join(", "))]
    HashMismatch {
        fq_name: FqName,
        expected: Vec<String>,
        actual: String,
    },
}

impl CoreError {
    /// Short stable tag for the error family, used by drivers and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::SourceIo { .. } => "SourceIo",
            CoreError::InvalidFqName { .. } => "InvalidFqName",
            CoreError::InvalidPackageRoot { .. } => "InvalidPackageRoot",
            CoreError::MissingPackageRoot(_) => "MissingPackageRoot",
            CoreError::FileNotFound { .. } => "FileNotFound",
            CoreError::LexError { .. } => "LexError",
            CoreError::SyntaxError { .. } => "SyntaxError",
            CoreError::PackageMismatch { .. } => "PackageMismatch",
            CoreError::DuplicateDeclaration { .. } => "DuplicateDeclarationError",
            CoreError::UnresolvedName { .. } => "UnresolvedNameError",
            CoreError::UnresolvedParent { .. } => "UnresolvedNameError",
            CoreError::CyclicImport { .. } => "CyclicImportError",
            CoreError::ConstantEvaluation { .. } => "ConstantEvaluationError",
            CoreError::TypeValidation { .. } => "TypeValidationError",
            CoreError::HashMismatch { .. } => "HashMismatchError",
        }
    }
}

fn render_chain(chain: &[FqName]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
