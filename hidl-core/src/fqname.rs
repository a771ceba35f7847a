//! Fully qualified names: `package.path@major.minor::Type.Nested`.
//!
//! A name is either a package reference (no type components) or a type
//! reference. Partial names such as `@1.0::IFoo` or plain `IFoo` appear in
//! source and are completed against the file they occur in with
//! [`FqName::apply_defaults`].

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FqName {
    package: Vec<String>,
    version: Option<(u32, u32)>,
    names: Vec<String>,
}

impl FqName {
    pub fn new(package: Vec<String>, version: Option<(u32, u32)>, names: Vec<String>) -> Self {
        FqName {
            package,
            version,
            names,
        }
    }

    /// A package-only name such as `android.hardware.foo@1.0`.
    pub fn package_ref(package: &str, major: u32, minor: u32) -> Self {
        FqName {
            package: package.split('.').map(str::to_string).collect(),
            version: Some((major, minor)),
            names: Vec::new(),
        }
    }

    /// Parses the textual form. Every component is optional, but at least
    /// one must be present.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidFqName {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let input_trimmed = input.trim();
        if input_trimmed.is_empty() {
            return Err(invalid("empty name"));
        }

        let (head, names) = match input_trimmed.split_once("::") {
            Some((head, tail)) => {
                if tail.is_empty() {
                    return Err(invalid("missing type name after '::'"));
                }
                (head, split_components(tail).ok_or_else(|| invalid("bad type name"))?)
            }
            None if input_trimmed.contains('@') => (input_trimmed, Vec::new()),
            None => ("", split_components(input_trimmed).ok_or_else(|| invalid("bad type name"))?),
        };

        let (package, version) = match head.split_once('@') {
            Some((package, version)) => {
                let version = parse_version(version).ok_or_else(|| invalid("bad version"))?;
                let package = if package.is_empty() {
                    Vec::new()
                } else {
                    split_components(package).ok_or_else(|| invalid("bad package name"))?
                };
                (package, Some(version))
            }
            None if head.is_empty() => (Vec::new(), None),
            None => return Err(invalid("package name without version")),
        };

        Ok(FqName {
            package,
            version,
            names,
        })
    }

    pub fn package_components(&self) -> &[String] {
        &self.package
    }

    pub fn package(&self) -> String {
        self.package.join(".")
    }

    pub fn version(&self) -> Option<(u32, u32)> {
        self.version
    }

    pub fn major(&self) -> Option<u32> {
        self.version.map(|(major, _)| major)
    }

    pub fn minor(&self) -> Option<u32> {
        self.version.map(|(_, minor)| minor)
    }

    pub fn version_string(&self) -> String {
        match self.version {
            Some((major, minor)) => format!("{major}.{minor}"),
            None => String::new(),
        }
    }

    /// All type components, e.g. `["IFoo", "Bar"]` for `IFoo.Bar`.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The dotted type part, empty for package references.
    pub fn name(&self) -> String {
        self.names.join(".")
    }

    /// The innermost component.
    pub fn local_name(&self) -> &str {
        self.names.last().map(String::as_str).unwrap_or("")
    }

    pub fn has_package(&self) -> bool {
        !self.package.is_empty()
    }

    pub fn is_package(&self) -> bool {
        self.has_package() && self.version.is_some() && self.names.is_empty()
    }

    pub fn is_fully_qualified(&self) -> bool {
        self.has_package() && self.version.is_some() && !self.names.is_empty()
    }

    /// Strips the type components.
    pub fn package_name(&self) -> FqName {
        FqName {
            package: self.package.clone(),
            version: self.version,
            names: Vec::new(),
        }
    }

    /// The first type component only, i.e. the name of the file-level
    /// declaration this name lives under.
    pub fn top_level(&self) -> FqName {
        FqName {
            package: self.package.clone(),
            version: self.version,
            names: self.names.iter().take(1).cloned().collect(),
        }
    }

    pub fn types_for_package(&self) -> FqName {
        self.with_name("types")
    }

    /// Replaces the type components with a single name.
    pub fn with_name(&self, name: &str) -> FqName {
        FqName {
            package: self.package.clone(),
            version: self.version,
            names: vec![name.to_string()],
        }
    }

    /// Appends one nested component.
    pub fn nested(&self, name: &str) -> FqName {
        let mut names = self.names.clone();
        names.push(name.to_string());
        FqName {
            package: self.package.clone(),
            version: self.version,
            names,
        }
    }

    pub fn with_version(&self, major: u32, minor: u32) -> FqName {
        FqName {
            package: self.package.clone(),
            version: Some((major, minor)),
            names: self.names.clone(),
        }
    }

    /// Fills a missing package and version from `defaults`.
    ///
    /// A name with only a version (`@1.0::IFoo`) keeps that version and
    /// takes the package; a bare name takes both.
    pub fn apply_defaults(&self, defaults: &FqName) -> FqName {
        FqName {
            package: if self.package.is_empty() {
                defaults.package.clone()
            } else {
                self.package.clone()
            },
            version: self.version.or(defaults.version),
            names: self.names.clone(),
        }
    }

    /// True when `prefix` (dot separated) is a component-wise prefix of
    /// this name's package.
    pub fn in_package(&self, prefix: &str) -> bool {
        let prefix: Vec<&str> = prefix.split('.').collect();
        prefix.len() <= self.package.len()
            && prefix
                .iter()
                .zip(self.package.iter())
                .all(|(lhs, rhs)| *lhs == rhs.as_str())
    }

    pub fn same_package(&self, other: &FqName) -> bool {
        self.package == other.package && self.version == other.version
    }
}

impl FromStr for FqName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FqName::parse(s)
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.package.join("."))?;
        if let Some((major, minor)) = self.version {
            write!(f, "@{major}.{minor}")?;
        }
        if !self.names.is_empty() {
            if self.has_package() || self.version.is_some() {
                f.write_str("::")?;
            }
            f.write_str(&self.names.join("."))?;
        }
        Ok(())
    }
}

pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_components(text: &str) -> Option<Vec<String>> {
    let parts: Vec<String> = text.split('.').map(str::to_string).collect();
    if parts.iter().all(|part| is_identifier(part)) {
        Some(parts)
    } else {
        None
    }
}

fn parse_version(text: &str) -> Option<(u32, u32)> {
    let (major, minor) = text.split_once('.')?;
    let major = major.parse().ok()?;
    let minor = minor.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fully_qualified_type() {
        let fq = FqName::parse("android.hardware.foo@1.2::IFoo.Bar").expect("parse");
        assert_eq!(fq.package(), "android.hardware.foo");
        assert_eq!(fq.version(), Some((1, 2)));
        assert_eq!(fq.name(), "IFoo.Bar");
        assert_eq!(fq.local_name(), "Bar");
        assert!(fq.is_fully_qualified());
        assert_eq!(fq.to_string(), "android.hardware.foo@1.2::IFoo.Bar");
    }

    #[test]
    fn parses_package_reference() {
        let fq = FqName::parse("test@1.0").expect("parse");
        assert!(fq.is_package());
        assert_eq!(fq.to_string(), "test@1.0");
        assert_eq!(fq.types_for_package().to_string(), "test@1.0::types");
    }

    #[test]
    fn completes_partial_names() {
        let here = FqName::parse("a.b@2.0::IFoo").expect("parse");
        let versioned = FqName::parse("@1.0::IFoo").expect("parse");
        assert_eq!(versioned.apply_defaults(&here).to_string(), "a.b@1.0::IFoo");
        let bare = FqName::parse("Color").expect("parse");
        assert_eq!(bare.to_string(), "Color");
        assert_eq!(bare.apply_defaults(&here).to_string(), "a.b@2.0::Color");
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(FqName::parse("").is_err());
        assert!(FqName::parse("foo@1").is_err());
        assert!(FqName::parse("foo@1.0::").is_err());
        assert!(FqName::parse("foo::Bar").is_err());
        assert!(FqName::parse("9foo@1.0").is_err());
    }

    #[test]
    fn orders_structurally() {
        let a = FqName::parse("a@1.0::X").expect("parse");
        let b = FqName::parse("a@1.1::A").expect("parse");
        let c = FqName::parse("b@1.0::A").expect("parse");
        let mut names = vec![c.clone(), b.clone(), a.clone()];
        names.sort();
        assert_eq!(names, vec![a, b, c]);
    }

    #[test]
    fn matches_package_prefixes() {
        let fq = FqName::parse("android.hardware.foo@1.0").expect("parse");
        assert!(fq.in_package("android.hardware"));
        assert!(!fq.in_package("android.hard"));
        assert!(!fq.in_package("android.hardware.foo.bar"));
    }
}
