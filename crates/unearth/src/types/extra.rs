use miette::Diagnostic;
use regex::Regex;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// An extra as it can be specified in a requirement, e.g. `requests[socks]`.
/// Extras are carried on parsed requirements but play no role in matching
/// candidates; they only matter to whoever consumes the found artifact.
///
/// Like package names, extras compare by their normalized (lowercased,
/// separator-collapsed) form.
#[derive(Debug, Clone, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct Extra {
    source: Box<str>,
    normalized: Box<str>,
}

impl Extra {
    /// Returns the extra as it was written.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// Returns the normalized form.
    pub fn as_str(&self) -> &str {
        self.normalized.as_ref()
    }
}

/// Error when parsing an extra name.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParseExtraError {
    #[error("invalid extra name '{0}'")]
    InvalidExtra(String),
}

impl FromStr for Extra {
    type Err = ParseExtraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static EXTRA_VALIDATE: OnceLock<Regex> = OnceLock::new();
        let extra_validate = EXTRA_VALIDATE.get_or_init(|| {
            Regex::new(r"(?i-u)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").unwrap()
        });

        if !extra_validate.is_match(s) {
            return Err(ParseExtraError::InvalidExtra(s.into()));
        }

        let mut normalized = s.replace(['-', '_', '.'], "-");
        normalized.make_ascii_lowercase();

        Ok(Extra {
            source: s.to_owned().into_boxed_str(),
            normalized: normalized.into_boxed_str(),
        })
    }
}

impl Display for Extra {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Hash for Extra {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for Extra {
    fn eq(&self, other: &Self) -> bool {
        self.normalized.eq(&other.normalized)
    }
}

impl PartialOrd for Extra {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Extra {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}
