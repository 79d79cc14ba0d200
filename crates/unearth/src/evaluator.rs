//! Turning links into ranked candidates: format policy, yank status,
//! requires-python, filename and tag checks, and the ordering that picks the
//! best candidate.

use indexmap::IndexSet;
use pep440_rs::{Version, VersionSpecifiers};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

use crate::tags::{WheelTag, WheelTags};
use crate::types::{
    ArtifactName, BuildTag, Link, NormalizedPackageName, ParseArtifactNameError,
    ParsePackageNameError, WheelFilename,
};
use crate::utils::fix_legacy_specifier;

/// A set of package names with an optional `:all:` wildcard, as accepted by
/// the no-binary / only-binary / prefer-binary options.
#[derive(Debug, Clone, Default)]
pub struct NameSet {
    all: bool,
    names: IndexSet<NormalizedPackageName>,
}

impl NameSet {
    /// Adds a name, or enables the wildcard when given `:all:`.
    pub fn add(&mut self, spec: &str) -> Result<(), ParsePackageNameError> {
        if spec == ":all:" {
            self.all = true;
        } else {
            self.names.insert(spec.parse()?);
        }
        Ok(())
    }

    /// True when the name is listed explicitly.
    pub fn contains_name(&self, name: &NormalizedPackageName) -> bool {
        self.names.contains(name)
    }

    /// True when the name is covered, explicitly or via `:all:`.
    pub fn covers(&self, name: &NormalizedPackageName) -> bool {
        self.all || self.names.contains(name)
    }
}

/// Restricts which artifact formats participate for which packages.
#[derive(Debug, Clone, Default)]
pub struct FormatControl {
    /// Packages restricted to wheels.
    pub only_binary: NameSet,
    /// Packages restricted to source distributions.
    pub no_binary: NameSet,
}

impl FormatControl {
    /// Checks a link's format against the policy. Explicit name entries take
    /// precedence over the `:all:` wildcard of the opposite set, and
    /// `only_binary` is the stricter rule when both mention a name.
    fn check(&self, name: &NormalizedPackageName, is_wheel: bool) -> Result<(), LinkMismatch> {
        let (binary_ok, source_ok) = if self.only_binary.contains_name(name) {
            (true, false)
        } else if self.no_binary.contains_name(name) {
            (false, true)
        } else if self.only_binary.all {
            (true, false)
        } else if self.no_binary.all {
            (false, true)
        } else {
            (true, true)
        };

        if is_wheel && !binary_ok {
            return Err(LinkMismatch::BinaryNotAllowed(name.clone()));
        }
        if !is_wheel && !source_ok {
            return Err(LinkMismatch::SourceNotAllowed(name.clone()));
        }
        Ok(())
    }
}

/// Why a link was dropped. Accumulated and handed back to the caller so a
/// "no matches" outcome explains itself.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum LinkMismatch {
    #[error("binary wheel is not allowed for {0}")]
    BinaryNotAllowed(NormalizedPackageName),

    #[error("source distribution is not allowed for {0}")]
    SourceNotAllowed(NormalizedPackageName),

    #[error("yanked{}", reason.as_deref().filter(|r| !r.is_empty()).map(|r| format!(" due to {r}")).unwrap_or_default())]
    Yanked { reason: Option<String> },

    #[error("invalid requires-python '{0}'")]
    InvalidRequiresPython(String),

    #[error("the target python {python} does not satisfy requires-python {requires}")]
    RequiresPythonMismatch { python: Version, requires: String },

    #[error("not a recognizable artifact filename: '{0}'")]
    UnrecognizedFilename(String),

    #[error("unsupported archive format: '{0}'")]
    UnsupportedFormat(String),

    #[error("invalid version in filename '{0}'")]
    InvalidVersion(String),

    #[error("the distribution name '{actual}' does not match '{expected}'")]
    NameMismatch {
        expected: NormalizedPackageName,
        actual: NormalizedPackageName,
    },

    #[error("none of the wheel tags ({tags}) match the target")]
    IncompatibleTags { tags: String },

    #[error("version {version} does not satisfy the specifier '{specifiers}'")]
    SpecifierMismatch {
        version: Version,
        specifiers: String,
    },

    #[error("the {algorithm} hash does not appear in the allow-list")]
    HashMismatch { algorithm: String },
}

/// A link that was rejected, together with the reason.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// The rejected link.
    pub link: Link,
    /// Why it was rejected.
    pub reason: LinkMismatch,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.link, self.reason)
    }
}

/// A link that survived evaluation: something we could actually install.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The normalized project name.
    pub name: NormalizedPackageName,
    /// The version parsed from the filename; absent for direct URL and VCS
    /// candidates.
    pub version: Option<Version>,
    /// The parsed artifact name; absent for direct URL and VCS candidates.
    pub artifact_name: Option<ArtifactName>,
    /// Where to get it.
    pub link: Link,
}

impl Display for Candidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.name, version),
            None => write!(f, "{} @ {}", self.name, self.link),
        }
    }
}

/// Evaluates links against a project name and a target environment.
#[derive(Debug, Clone)]
pub struct Evaluator<'a> {
    pub(crate) package_name: NormalizedPackageName,
    pub(crate) python_version: Version,
    pub(crate) tags: &'a WheelTags,
    pub(crate) ignore_compatibility: bool,
    pub(crate) allow_yanked: bool,
    pub(crate) format_control: &'a FormatControl,
}

impl<'a> Evaluator<'a> {
    /// Runs the filter pipeline over one link. The first failing check
    /// decides the rejection reason.
    pub fn evaluate_link(&self, link: &Link) -> Result<Candidate, LinkMismatch> {
        let filename = link.filename();
        let is_wheel = link.is_wheel();

        self.format_control.check(&self.package_name, is_wheel)?;

        if link.yanked.yanked && !self.allow_yanked {
            return Err(LinkMismatch::Yanked {
                reason: link.yanked.reason.clone(),
            });
        }

        self.check_requires_python(link)?;

        let artifact_name = if is_wheel {
            let wheel = WheelFilename::from_str(&filename)
                .map_err(|_| LinkMismatch::UnrecognizedFilename(filename.clone()))?;
            self.check_name(&wheel.distribution.clone().into())?;
            if !self.ignore_compatibility {
                self.check_tags(&wheel)?;
            }
            ArtifactName::Wheel(wheel)
        } else {
            let sdist = filename
                .parse::<crate::types::SDistFilename>()
                .map_err(|e| match e {
                    ParseArtifactNameError::InvalidExtension(name) => {
                        LinkMismatch::UnsupportedFormat(name)
                    }
                    ParseArtifactNameError::InvalidVersion(_) => {
                        LinkMismatch::InvalidVersion(filename.clone())
                    }
                    _ => LinkMismatch::UnrecognizedFilename(filename.clone()),
                })?;
            self.check_name(&sdist.distribution.clone().into())?;
            ArtifactName::SDist(sdist)
        };

        Ok(Candidate {
            name: self.package_name.clone(),
            version: Some(artifact_name.version().clone()),
            artifact_name: Some(artifact_name),
            link: link.clone(),
        })
    }

    fn check_name(&self, actual: &NormalizedPackageName) -> Result<(), LinkMismatch> {
        if actual != &self.package_name {
            return Err(LinkMismatch::NameMismatch {
                expected: self.package_name.clone(),
                actual: actual.clone(),
            });
        }
        Ok(())
    }

    fn check_requires_python(&self, link: &Link) -> Result<(), LinkMismatch> {
        if self.ignore_compatibility {
            return Ok(());
        }
        let Some(raw) = link.requires_python.as_deref() else {
            return Ok(());
        };
        let specifiers = VersionSpecifiers::from_str(&fix_legacy_specifier(raw))
            .map_err(|_| LinkMismatch::InvalidRequiresPython(raw.to_string()))?;
        if !specifiers.contains(&self.python_version) {
            return Err(LinkMismatch::RequiresPythonMismatch {
                python: self.python_version.clone(),
                requires: raw.to_string(),
            });
        }
        Ok(())
    }

    fn check_tags(&self, wheel: &WheelFilename) -> Result<(), LinkMismatch> {
        let mut tags: Vec<String> = wheel.all_tags().into_iter().collect();
        let compatible = tags.iter().any(|tag| {
            WheelTag::from_str(tag)
                .map(|tag| self.tags.is_compatible(&tag))
                .unwrap_or(false)
        });
        if !compatible {
            tags.sort();
            return Err(LinkMismatch::IncompatibleTags {
                tags: tags.join(", "),
            });
        }
        Ok(())
    }
}

/// Whether `version` satisfies `specifiers` under pip's pre-release policy:
/// pre-releases only participate when the caller opted in or the specifier
/// set itself mentions one.
pub fn specifier_matches(
    specifiers: &VersionSpecifiers,
    version: &Version,
    allow_prereleases: bool,
) -> bool {
    if version.any_prerelease()
        && !allow_prereleases
        && !specifiers.iter().any(|spec| spec.version().any_prerelease())
    {
        return false;
    }
    specifiers.contains(version)
}

/// The ordering that decides between applicable candidates; a larger key is
/// a better candidate.
///
/// Yanked links always lose. A candidate whose name is covered by the
/// prefer-binary set beats any sdist regardless of version. Within a version
/// the most specific matching wheel tag wins, sdists rank below every wheel,
/// and the numeric build tag breaks remaining ties. Candidates that still
/// compare equal keep their collection order under a stable sort, so the
/// earlier-configured source wins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    not_yanked: bool,
    prefer_binary: bool,
    version: Option<Version>,
    tag_priority: i64,
    build_tag: Option<BuildTag>,
}

impl SortKey {
    /// Computes the key for a candidate against the target's tag priorities.
    pub fn for_candidate(candidate: &Candidate, tags: &WheelTags, prefer_binary: bool) -> SortKey {
        // Sdists take a priority below any wheel; wheels that match none of
        // the target tags (possible with ignore-compatibility) rank just
        // above sdists.
        let mut tag_priority = i64::MIN;
        let mut build_tag = None;
        let mut is_binary = false;
        if let Some(ArtifactName::Wheel(wheel)) = &candidate.artifact_name {
            is_binary = true;
            build_tag = wheel.build_tag.clone();
            tag_priority = wheel
                .all_tags()
                .iter()
                .filter_map(|tag| {
                    WheelTag::from_str(tag)
                        .ok()
                        .and_then(|tag| tags.compatibility(&tag))
                })
                .max()
                .map(i64::from)
                .unwrap_or(-(tags.len() as i64));
        }

        SortKey {
            not_yanked: !candidate.link.yanked.yanked,
            prefer_binary: prefer_binary && is_binary,
            version: candidate.version.clone(),
            tag_priority,
            build_tag,
        }
    }
}
