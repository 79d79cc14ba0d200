use miette::Diagnostic;
use pep440_rs::{Operator, VersionSpecifiers};
use pep508_rs::{MarkerTree, Requirement as Pep508Requirement, VersionOrUrl};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::types::{
    ArtifactHashes, Extra, Link, PackageName, ParseExtraError, ParsePackageNameError,
};
use crate::vcs::{self, VcsKind};

/// A requirement as understood by the finder: either a name with version
/// constraints, a direct artifact URL, or a version-control reference.
///
/// Extras and environment markers are parsed and carried along but have no
/// influence on which candidates match; they belong to the consumer of the
/// found artifact.
#[derive(Debug, Clone)]
pub enum Requirement {
    /// `flask>=2.0`
    Named(NamedRequirement),
    /// `pip @ https://example.com/pip-23.0.zip#sha256=...`
    Url(UrlRequirement),
    /// `django @ git+https://example.com/django.git@3.2.1`
    Vcs(VcsRequirement),
}

/// A requirement on a project name with an optional specifier set.
#[derive(Debug, Clone)]
pub struct NamedRequirement {
    /// The requested project.
    pub name: PackageName,
    /// Requested extras, carried but ignored when finding.
    pub extras: Vec<Extra>,
    /// The version constraints; empty means any version.
    pub specifiers: VersionSpecifiers,
    /// The environment marker, carried but ignored when finding.
    pub marker: Option<MarkerTree>,
}

/// A requirement pointing directly at an artifact URL.
#[derive(Debug, Clone)]
pub struct UrlRequirement {
    /// The project the URL claims to provide.
    pub name: PackageName,
    /// The artifact URL, fragment included.
    pub url: Url,
}

impl UrlRequirement {
    /// Digests embedded in the URL fragment.
    pub fn hashes(&self) -> Option<ArtifactHashes> {
        self.url.fragment().and_then(crate::types::parse_hash)
    }
}

/// A requirement resolved from a version control repository.
#[derive(Debug, Clone)]
pub struct VcsRequirement {
    /// The project the checkout claims to provide.
    pub name: PackageName,
    /// Which version control system to use.
    pub vcs: VcsKind,
    /// The URL as given, scheme prefix and revision included.
    pub url: Url,
    /// The clone URL with the scheme prefix and revision stripped.
    pub repo_url: Url,
    /// The requested branch, tag or revision id, if any.
    pub rev: Option<String>,
    /// The `subdirectory=` fragment, when the project lives below the root.
    pub subdirectory: Option<String>,
}

/// Errors produced when a requirement string cannot be parsed.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParseRequirementError {
    #[error("invalid requirement: {0}")]
    Invalid(String),

    #[error(transparent)]
    InvalidName(#[from] ParsePackageNameError),

    #[error(transparent)]
    InvalidExtra(#[from] ParseExtraError),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("the URL '{0}' has an empty revision after '@'")]
    EmptyRevision(String),
}

impl Requirement {
    /// The requested project name.
    pub fn name(&self) -> &PackageName {
        match self {
            Requirement::Named(named) => &named.name,
            Requirement::Url(url) => &url.name,
            Requirement::Vcs(vcs) => &vcs.name,
        }
    }

    /// The direct link for URL and VCS requirements, `None` for named ones.
    pub fn as_link(&self) -> Option<Link> {
        match self {
            Requirement::Named(_) => None,
            Requirement::Url(url) => Some(Link::new(url.url.clone())),
            Requirement::Vcs(vcs) => Some(Link::new(vcs.url.clone())),
        }
    }

    /// True when the specifier set pins an exact version (`==` or `===`).
    /// A pinned requirement is allowed to select yanked candidates.
    pub fn is_pinned(&self) -> bool {
        match self {
            Requirement::Named(named) => named.specifiers.iter().any(|spec| {
                matches!(
                    spec.operator(),
                    Operator::Equal | Operator::EqualStar | Operator::ExactEqual
                )
            }),
            // A direct reference is as pinned as it gets.
            Requirement::Url(_) | Requirement::Vcs(_) => true,
        }
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::Named(named) => {
                write!(f, "{}", named.name.as_source_str())?;
                if !named.extras.is_empty() {
                    write!(f, "[")?;
                    for (i, extra) in named.extras.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}", extra)?;
                    }
                    write!(f, "]")?;
                }
                write!(f, "{}", named.specifiers)
            }
            Requirement::Url(url) => write!(f, "{} @ {}", url.name.as_source_str(), url.url),
            Requirement::Vcs(vcs) => write!(f, "{} @ {}", vcs.name.as_source_str(), vcs.url),
        }
    }
}

impl FromStr for Requirement {
    type Err = ParseRequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `name [extras] @ url` splits at the first ` @ `; anything after a
        // `;` on the URL side is a marker, which finding ignores.
        if let Some((head, tail)) = s.split_once(" @ ") {
            let url_str = match tail.split_once(';') {
                Some((url, _marker)) => url.trim(),
                None => tail.trim(),
            };
            let (name, _extras) = parse_name_and_extras(head.trim())?;
            return from_name_and_url(name, url_str);
        }

        let parsed = Pep508Requirement::from_str(s)
            .map_err(|e| ParseRequirementError::Invalid(e.to_string()))?;
        let name: PackageName = parsed.name.parse()?;
        let extras = parsed
            .extras
            .unwrap_or_default()
            .iter()
            .map(|extra| extra.parse::<Extra>())
            .collect::<Result<Vec<_>, _>>()?;

        match parsed.version_or_url {
            Some(VersionOrUrl::Url(url)) => from_name_and_url(name, url.as_str()),
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
                Ok(Requirement::Named(NamedRequirement {
                    name,
                    extras,
                    specifiers,
                    marker: parsed.marker,
                }))
            }
            None => Ok(Requirement::Named(NamedRequirement {
                name,
                extras,
                specifiers: VersionSpecifiers::from_iter(std::iter::empty()),
                marker: parsed.marker,
            })),
        }
    }
}

/// Splits `name[extra1,extra2]` into its parts.
fn parse_name_and_extras(s: &str) -> Result<(PackageName, Vec<Extra>), ParseRequirementError> {
    match s.split_once('[') {
        None => Ok((s.parse()?, Vec::new())),
        Some((name, rest)) => {
            let inner = rest
                .strip_suffix(']')
                .ok_or_else(|| ParseRequirementError::Invalid(format!("unclosed extras in '{s}'")))?;
            let extras = inner
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| e.parse::<Extra>())
                .collect::<Result<Vec<_>, _>>()?;
            Ok((name.trim().parse()?, extras))
        }
    }
}

/// Classifies a direct reference as a VCS or plain URL requirement.
fn from_name_and_url(name: PackageName, url_str: &str) -> Result<Requirement, ParseRequirementError> {
    let url = Url::parse(url_str).map_err(|e| ParseRequirementError::InvalidUrl {
        url: url_str.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme().split_once('+') {
        Some((prefix, _)) => {
            let vcs = VcsKind::from_str(prefix)
                .map_err(|_| ParseRequirementError::UnsupportedScheme(url.scheme().to_string()))?;
            let link = Link::new(url.clone());
            let subdirectory = link.subdirectory();
            let (repo_url, rev) = vcs::split_url_rev(&url).map_err(|e| match e {
                vcs::SplitRevError::EmptyRevision => {
                    ParseRequirementError::EmptyRevision(url_str.to_string())
                }
            })?;
            Ok(Requirement::Vcs(VcsRequirement {
                name,
                vcs,
                url,
                repo_url,
                rev,
                subdirectory,
            }))
        }
        None => match url.scheme() {
            "http" | "https" | "file" => Ok(Requirement::Url(UrlRequirement { name, url })),
            other => Err(ParseRequirementError::UnsupportedScheme(other.to_string())),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_named_requirement() {
        let req: Requirement = "Flask[dotenv,async]>=2.0,<3; python_version >= '3.7'"
            .parse()
            .unwrap();
        let Requirement::Named(named) = req else {
            panic!("expected a named requirement");
        };
        assert_eq!(named.name.as_str(), "flask");
        assert_eq!(named.extras.len(), 2);
        assert!(named.specifiers.contains(&"2.5".parse().unwrap()));
        assert!(!named.specifiers.contains(&"3.0".parse().unwrap()));
        assert!(!named.specifiers.contains(&"1.9".parse().unwrap()));
        assert!(named.marker.is_some());
    }

    #[test]
    fn test_named_requirement_without_specifiers() {
        let req: Requirement = "requests".parse().unwrap();
        let Requirement::Named(named) = req else {
            panic!("expected a named requirement");
        };
        assert!(named.specifiers.to_string().is_empty());
        assert!(!"".parse::<Requirement>().is_ok());
    }

    #[test]
    fn test_url_requirement() {
        let req: Requirement = "pip @ https://example.com/pip-23.0.zip#sha256=0000000000000000000000000000000000000000000000000000000000000000"
            .parse()
            .unwrap();
        let Requirement::Url(url) = req else {
            panic!("expected a URL requirement");
        };
        assert_eq!(url.name.as_str(), "pip");
        assert!(url.hashes().unwrap().sha256.is_some());
    }

    #[test]
    fn test_vcs_requirement_with_rev() {
        let req: Requirement = "django @ git+https://example.com/django.git@3.2.1"
            .parse()
            .unwrap();
        let Requirement::Vcs(vcs) = req else {
            panic!("expected a VCS requirement");
        };
        assert_eq!(vcs.vcs, VcsKind::Git);
        assert_eq!(vcs.rev.as_deref(), Some("3.2.1"));
        assert_eq!(vcs.repo_url.as_str(), "https://example.com/django.git");
        assert!(req_is_pinned("django @ git+https://example.com/django.git@3.2.1"));
    }

    #[test]
    fn test_vcs_requirement_without_rev() {
        let req: Requirement = "pkg @ hg+https://example.com/repo#subdirectory=src"
            .parse()
            .unwrap();
        let Requirement::Vcs(vcs) = req else {
            panic!("expected a VCS requirement");
        };
        assert_eq!(vcs.vcs, VcsKind::Hg);
        assert_eq!(vcs.rev, None);
        assert_eq!(vcs.subdirectory.as_deref(), Some("src"));
    }

    #[test]
    fn test_vcs_requirement_empty_rev() {
        let result = "pkg @ git+https://example.com/repo.git@".parse::<Requirement>();
        assert!(matches!(
            result,
            Err(ParseRequirementError::EmptyRevision(_))
        ));
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = "pkg @ cvs+pserver://example.com/repo".parse::<Requirement>();
        assert!(matches!(
            result,
            Err(ParseRequirementError::UnsupportedScheme(_))
        ));
        let result = "pkg @ ftp://example.com/pkg-1.0.tar.gz".parse::<Requirement>();
        assert!(matches!(
            result,
            Err(ParseRequirementError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_malformed_requirement() {
        assert!("flask >=".parse::<Requirement>().is_err());
        assert!("-not-a-name".parse::<Requirement>().is_err());
    }

    #[test]
    fn test_pinned_inference() {
        assert!(req_is_pinned("baz==1.2"));
        assert!(req_is_pinned("baz===1.2"));
        assert!(!req_is_pinned("baz>=1.2"));
        assert!(!req_is_pinned("baz"));
    }

    fn req_is_pinned(s: &str) -> bool {
        s.parse::<Requirement>().unwrap().is_pinned()
    }
}
