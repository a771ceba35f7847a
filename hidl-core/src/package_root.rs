//! Mapping from package prefixes to directories on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::CoreError;
use crate::fqname::{FqName, is_identifier};

/// File holding the frozen hashes of a package root.
pub const FROZEN_HASHES_FILE: &str = "current.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRoot {
    pub prefix: String,
    pub path: PathBuf,
}

impl PackageRoot {
    /// Number of package components covered by the prefix.
    fn depth(&self) -> usize {
        self.prefix.split('.').count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackageRoots {
    roots: Vec<PackageRoot>,
}

impl PackageRoots {
    pub fn new() -> Self {
        PackageRoots::default()
    }

    pub fn add(&mut self, prefix: &str, path: impl Into<PathBuf>) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidPackageRoot {
            spec: prefix.to_string(),
            reason: reason.to_string(),
        };
        if !prefix.split('.').all(is_identifier) {
            return Err(invalid("prefix must be a dotted package name"));
        }
        if self.roots.iter().any(|root| root.prefix == prefix) {
            return Err(invalid("prefix is already mapped"));
        }
        self.roots.push(PackageRoot {
            prefix: prefix.to_string(),
            path: path.into(),
        });
        Ok(())
    }

    /// Adds a root written as `prefix:dir`. Relative directories are
    /// taken relative to `base` when given.
    pub fn add_spec(&mut self, spec: &str, base: Option<&Path>) -> Result<(), CoreError> {
        let Some((prefix, dir)) = spec.split_once(':') else {
            return Err(CoreError::InvalidPackageRoot {
                spec: spec.to_string(),
                reason: "expected <prefix>:<directory>".to_string(),
            });
        };
        if dir.is_empty() {
            return Err(CoreError::InvalidPackageRoot {
                spec: spec.to_string(),
                reason: "empty directory".to_string(),
            });
        }
        let dir = Path::new(dir);
        let path = match base {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir.to_path_buf(),
        };
        self.add(prefix, path)
    }

    pub fn roots(&self) -> &[PackageRoot] {
        &self.roots
    }

    /// The root with the longest prefix covering `package`.
    pub fn root_for(&self, package: &FqName) -> Option<&PackageRoot> {
        self.roots
            .iter()
            .filter(|root| package.in_package(&root.prefix))
            .max_by_key(|root| root.depth())
    }

    /// `a.b.c@1.0` under root `a.b` is `<dir>/c/1.0`.
    pub fn package_dir(&self, package: &FqName) -> Result<PathBuf, CoreError> {
        let root = self
            .root_for(package)
            .ok_or_else(|| CoreError::MissingPackageRoot(package.package_name()))?;
        let mut dir = root.path.clone();
        for component in &package.package_components()[root.depth()..] {
            dir.push(component);
        }
        dir.push(package.version_string());
        Ok(dir)
    }

    /// Path of the file declaring the top-level name of `fq_name`.
    pub fn file_path(&self, fq_name: &FqName) -> Result<PathBuf, CoreError> {
        let file = fq_name.top_level();
        let dir = self.package_dir(&file)?;
        Ok(dir.join(format!("{}.hal", file.name())))
    }

    pub fn file_exists(&self, fq_name: &FqName) -> bool {
        self.file_path(fq_name).is_ok_and(|path| path.is_file())
    }

    /// Every `.hal` file directly inside the package directory, as file
    /// names: `types` first, then the rest sorted.
    pub fn package_files(&self, package: &FqName) -> Result<Vec<FqName>, CoreError> {
        let dir = self.package_dir(package)?;
        if !dir.is_dir() {
            return Err(CoreError::FileNotFound {
                fq_name: package.package_name(),
                path: dir,
            });
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| CoreError::SourceIo {
                path: dir.clone(),
                source: err.into(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "hal") {
                continue;
            }
            match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) if is_identifier(stem) => names.push(stem.to_string()),
                _ => log::debug!("ignoring {}", path.display()),
            }
        }

        names.sort_by(|a, b| (a != "types", a).cmp(&(b != "types", b)));
        Ok(names
            .iter()
            .map(|name| package.package_name().with_name(name))
            .collect())
    }

    /// Frozen hashes recorded next to the root covering `package`; empty
    /// when the root has no hash file.
    pub fn frozen_hashes(
        &self,
        package: &FqName,
    ) -> Result<BTreeMap<FqName, Vec<String>>, CoreError> {
        match self.root_for(package) {
            Some(root) => read_frozen_hashes(&root.path.join(FROZEN_HASHES_FILE)),
            None => Ok(BTreeMap::new()),
        }
    }
}

/// Reads `<hash> <fqname>` lines. `#` starts a comment.
pub fn read_frozen_hashes(path: &Path) -> Result<BTreeMap<FqName, Vec<String>>, CoreError> {
    if !path.is_file() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path).map_err(|source| CoreError::SourceIo {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hashes: BTreeMap<FqName, Vec<String>> = BTreeMap::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(hash), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CoreError::InvalidFqName {
                input: line.to_string(),
                reason: format!("malformed line in {}", path.display()),
            });
        };
        let name = FqName::parse(name)?;
        hashes.entry(name).or_default().push(hash.to_ascii_lowercase());
    }
    Ok(hashes)
}
