use miette::Diagnostic;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_with::DeserializeFromStr;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// A project name as it appears in a requirement or a filename. Keeps both the
/// string it was parsed from and the normalized form used for comparisons.
///
/// Normalization follows [PEP 503](https://peps.python.org/pep-0503/#normalized-names):
/// any run of `-`, `_` and `.` becomes a single `-` and the result is
/// lowercased. Two names are equal when their normalized forms are equal.
#[derive(Debug, Clone, Eq, DeserializeFromStr)]
pub struct PackageName {
    /// The string this instance was created from.
    source: Box<str>,

    /// The normalized form of `source`.
    normalized: Box<str>,
}

impl PackageName {
    /// Returns the name as it was written by the user or publisher.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// Returns the normalized name.
    pub fn as_str(&self) -> &str {
        self.normalized.as_ref()
    }
}

/// Error when parsing a package name.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParsePackageNameError {
    #[error("invalid package name '{0}'")]
    InvalidPackageName(String),
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static NAME_VALIDATE: OnceLock<Regex> = OnceLock::new();
        let name_validate = NAME_VALIDATE.get_or_init(|| {
            // https://packaging.python.org/specifications/core-metadata/#name
            Regex::new(r"(?i-u)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").unwrap()
        });

        if !name_validate.is_match(s) {
            return Err(ParsePackageNameError::InvalidPackageName(s.into()));
        }

        Ok(PackageName {
            source: s.to_owned().into_boxed_str(),
            normalized: normalize(s).into_boxed_str(),
        })
    }
}

/// Collapses runs of `-`, `_` and `.` into a single `-` and lowercases.
/// Idempotent: normalizing an already normalized name is a no-op.
fn normalize(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut previous_was_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            previous_was_separator = true;
        } else {
            if previous_was_separator {
                normalized.push('-');
                previous_was_separator = false;
            }
            normalized.push(c.to_ascii_lowercase());
        }
    }
    normalized
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized.eq(&other.normalized)
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Serialize for PackageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.as_ref().serialize(serializer)
    }
}

/// A name that is guaranteed to be in the normalized form described in
/// [PEP 503](https://peps.python.org/pep-0503/#normalized-names). Used as the
/// key for all name comparisons in the finder.
#[repr(transparent)]
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, DeserializeFromStr)]
pub struct NormalizedPackageName(Box<str>);

impl From<PackageName> for NormalizedPackageName {
    fn from(value: PackageName) -> Self {
        Self(value.normalized)
    }
}

impl From<NormalizedPackageName> for PackageName {
    fn from(value: NormalizedPackageName) -> Self {
        Self {
            source: value.0.clone(),
            normalized: value.0,
        }
    }
}

impl Display for NormalizedPackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NormalizedPackageName {
    /// Returns a string reference.
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl FromStr for NormalizedPackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PackageName::from_str(s)?.into())
    }
}

impl Serialize for NormalizedPackageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.as_ref().serialize(serializer)
    }
}

impl Borrow<str> for NormalizedPackageName {
    fn borrow(&self) -> &str {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_packagename_basics() {
        let name1: PackageName = "Foo-Bar-Baz".parse().unwrap();
        assert_eq!(name1.as_source_str(), "Foo-Bar-Baz");
        assert_eq!(name1.as_str(), "foo-bar-baz");

        let name2: PackageName = "foo_bar.baz".parse().unwrap();
        assert_eq!(name2.as_source_str(), "foo_bar.baz");
        assert_eq!(name2.as_str(), "foo-bar-baz");

        assert_eq!(name1, name2);

        let name3: PackageName = "foo-barbaz".parse().unwrap();
        assert_ne!(name1, name3);
    }

    #[test]
    fn test_normalization_collapses_runs() {
        let name: PackageName = "Flask__.-_RESTful".parse().unwrap();
        assert_eq!(name.as_str(), "flask-restful");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once: NormalizedPackageName = "My._.Package".parse().unwrap();
        let twice: NormalizedPackageName = once.as_str().parse().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalid_names() {
        assert!("".parse::<PackageName>().is_err());
        assert!("-leading-dash".parse::<PackageName>().is_err());
        assert!("trailing-dash-".parse::<PackageName>().is_err());
        assert!("white space".parse::<PackageName>().is_err());
    }
}
