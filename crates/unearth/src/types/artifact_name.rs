use crate::types::{PackageName, ParsePackageNameError};
use pep440_rs::Version;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The name of a distribution artifact and everything that can be derived
/// from it without opening the file.
///
/// An artifact is either a *wheel* (a binary distribution whose filename
/// encodes the python/abi/platform triples it supports) or a *source
/// distribution* (an archive of the project source). Everything the finder
/// needs for ranking — version, build tag, compatibility tags — lives in the
/// filename, which is why parsing it is the first evaluation step.
#[derive(Debug, Clone, PartialOrd, Ord, Eq, PartialEq)]
pub enum ArtifactName {
    /// A binary wheel.
    Wheel(WheelFilename),
    /// A source distribution archive.
    SDist(SDistFilename),
}

impl ArtifactName {
    /// Returns the version encoded in the artifact name.
    pub fn version(&self) -> &Version {
        match self {
            ArtifactName::Wheel(name) => &name.version,
            ArtifactName::SDist(name) => &name.version,
        }
    }

    /// Returns the distribution name encoded in the artifact name.
    pub fn distribution(&self) -> &PackageName {
        match self {
            ArtifactName::Wheel(name) => &name.distribution,
            ArtifactName::SDist(name) => &name.distribution,
        }
    }

    /// Returns this name as a wheel name, if it is one.
    pub fn as_wheel(&self) -> Option<&WheelFilename> {
        match self {
            ArtifactName::Wheel(wheel) => Some(wheel),
            ArtifactName::SDist(_) => None,
        }
    }

    /// Returns this name as an sdist name, if it is one.
    pub fn as_sdist(&self) -> Option<&SDistFilename> {
        match self {
            ArtifactName::Wheel(_) => None,
            ArtifactName::SDist(sdist) => Some(sdist),
        }
    }
}

impl Display for ArtifactName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactName::Wheel(name) => write!(f, "{}", name),
            ArtifactName::SDist(name) => write!(f, "{}", name),
        }
    }
}

/// The parsed form of a wheel filename.
///
/// See the [binary distribution format](https://packaging.python.org/specifications/binary-distribution-format/#file-name-convention)
/// specification: `{distribution}-{version}(-{build tag})?-{python}-{abi}-{platform}.whl`.
/// Each of the three tag fields may hold several `.`-separated values, which
/// produces the cross-product of supported tag triples.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct WheelFilename {
    /// Distribution name, with `-` escaped to `_` as the wheel spec requires.
    pub distribution: PackageName,

    /// Distribution version.
    pub version: Version,

    /// Optional build number, a tie-breaker between otherwise equal wheels.
    pub build_tag: Option<BuildTag>,

    /// Language implementation and version tags, e.g. `py3`, `cp310`.
    pub py_tags: Vec<String>,

    /// ABI tags, e.g. `cp310`, `abi3`, `none`.
    pub abi_tags: Vec<String>,

    /// Platform tags, e.g. `manylinux1_x86_64`, `any`.
    pub arch_tags: Vec<String>,
}

impl WheelFilename {
    /// Expands the tag fields into the full set of `py-abi-arch` triples this
    /// wheel claims to support.
    pub fn all_tags(&self) -> HashSet<String> {
        let mut retval = HashSet::new();
        for py in &self.py_tags {
            for abi in &self.abi_tags {
                for arch in &self.arch_tags {
                    retval.insert(format!("{}-{}-{}", py, abi, arch));
                }
            }
        }
        retval
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{dist}-{ver}{build}-{py_tags}-{abi_tags}-{arch_tags}.whl",
            dist = self.distribution.as_source_str(),
            ver = self.version,
            build = self
                .build_tag
                .as_ref()
                .map_or_else(String::new, |tag| format!("-{tag}")),
            py_tags = self.py_tags.join("."),
            abi_tags = self.abi_tags.join("."),
            arch_tags = self.arch_tags.join("."),
        )
    }
}

/// A wheel build number. Must start with a digit. Sorts by the numeric prefix
/// first and the remaining suffix second; a wheel without a build tag sorts
/// below any wheel with one.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct BuildTag {
    number: u32,
    name: String,
}

impl Display for BuildTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.number, &self.name)
    }
}

/// The parsed form of a source distribution filename:
/// `{distribution}-{version}.{extension}`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SDistFilename {
    /// Distribution name as spelled in the filename.
    pub distribution: PackageName,

    /// Distribution version.
    pub version: Version,

    /// The archive format of the file.
    pub format: SDistFormat,
}

impl Display for SDistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{dist}-{ver}{ext}",
            dist = self.distribution.as_source_str(),
            ver = self.version,
            ext = self.format.extension(),
        )
    }
}

/// The archive format of a source distribution.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[allow(missing_docs)]
pub enum SDistFormat {
    Zip,
    TarGz,
    Tgz,
    TarBz2,
    TarXz,
    Tar,
}

impl SDistFormat {
    /// The filename extension for this format, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            SDistFormat::Zip => ".zip",
            SDistFormat::TarGz => ".tar.gz",
            SDistFormat::Tgz => ".tgz",
            SDistFormat::TarBz2 => ".tar.bz2",
            SDistFormat::TarXz => ".tar.xz",
            SDistFormat::Tar => ".tar",
        }
    }

    /// Splits a filename into its stem and archive format, or `None` when the
    /// extension is not a recognized archive extension.
    pub fn split_extension(filename: &str) -> Option<(&str, SDistFormat)> {
        // .tgz must not be shadowed by a bare .gz check and .tar.gz must win
        // over .tar, so try the longest extensions first.
        for format in [
            SDistFormat::TarGz,
            SDistFormat::TarBz2,
            SDistFormat::TarXz,
            SDistFormat::Tgz,
            SDistFormat::Tar,
            SDistFormat::Zip,
        ] {
            if let Some(stem) = filename.strip_suffix(format.extension()) {
                return Some((stem, format));
            }
        }
        None
    }
}

/// Error when parsing an artifact filename.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum ParseArtifactNameError {
    #[error("invalid artifact name '{0}'")]
    InvalidName(String),

    #[error("unsupported archive extension (filename='{0}')")]
    InvalidExtension(String),

    #[error(transparent)]
    InvalidPackageName(#[from] ParsePackageNameError),

    #[error("invalid version: '{0}'")]
    InvalidVersion(String),

    #[error("build tag '{0}' must start with a digit")]
    BuildTagMustStartWithDigit(String),
}

impl FromStr for BuildTag {
    type Err = ParseArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let first_alpha_idx = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, name) = s.split_at(first_alpha_idx);
        Ok(Self {
            number: digits
                .parse()
                .map_err(|_| ParseArtifactNameError::BuildTagMustStartWithDigit(s.to_owned()))?,
            name: name.to_owned(),
        })
    }
}

impl FromStr for SDistFilename {
    type Err = ParseArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stem, format) = SDistFormat::split_extension(s)
            .ok_or_else(|| ParseArtifactNameError::InvalidExtension(s.to_string()))?;

        // Versions cannot contain hyphens, so the version is whatever follows
        // the last hyphen. Splitting there keeps hyphenated project names
        // intact, e.g. `zope-interface-5.4.0.tar.gz`.
        let (package_name, version) = stem
            .rsplit_once('-')
            .ok_or_else(|| ParseArtifactNameError::InvalidName(s.to_string()))?;

        let distribution = PackageName::from_str(package_name)
            .map_err(ParseArtifactNameError::InvalidPackageName)?;

        let version = Version::from_str(version)
            .map_err(|e| ParseArtifactNameError::InvalidVersion(e.to_string()))?;

        Ok(SDistFilename {
            distribution,
            version,
            format,
        })
    }
}

impl FromStr for WheelFilename {
    type Err = ParseArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(file_stem) = s.strip_suffix(".whl") else {
            return Err(ParseArtifactNameError::InvalidExtension(s.to_string()));
        };

        // The wheel spec escapes anything that is not alphanumeric to `_` in
        // the distribution field, so the first hyphen terminates it.
        let Some((distribution, rest)) = file_stem.split_once('-') else {
            return Err(ParseArtifactNameError::InvalidName(s.to_string()));
        };
        let distribution = PackageName::from_str(distribution)
            .map_err(ParseArtifactNameError::InvalidPackageName)?;

        let Some((version, rest)) = rest.split_once('-') else {
            return Err(ParseArtifactNameError::InvalidName(s.to_string()));
        };
        let version = Version::from_str(version)
            .map_err(|e| ParseArtifactNameError::InvalidVersion(e.to_string()))?;

        let Some((rest, platform_tags)) = rest.rsplit_once('-') else {
            return Err(ParseArtifactNameError::InvalidName(s.to_string()));
        };
        let arch_tags = platform_tags.split('.').map(ToOwned::to_owned).collect();

        let Some((rest, abi_tag)) = rest.rsplit_once('-') else {
            return Err(ParseArtifactNameError::InvalidName(s.to_string()));
        };
        let abi_tags = abi_tag.split('.').map(ToOwned::to_owned).collect();

        let (build_tag, python_tag) = match rest.rsplit_once('-') {
            Some((build_tag, python_tag)) => (Some(build_tag), python_tag),
            None => (None, rest),
        };
        let py_tags = python_tag.split('.').map(ToOwned::to_owned).collect();
        let build_tag = build_tag
            .map(BuildTag::from_str)
            .map_or_else(|| Ok(None), |result| result.map(Some))?;

        Ok(Self {
            distribution,
            version,
            build_tag,
            py_tags,
            abi_tags,
            arch_tags,
        })
    }
}

impl FromStr for ArtifactName {
    type Err = ParseArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.ends_with(".whl") {
            Ok(ArtifactName::Wheel(WheelFilename::from_str(s)?))
        } else if SDistFormat::split_extension(s).is_some() {
            Ok(ArtifactName::SDist(SDistFilename::from_str(s)?))
        } else {
            Err(ParseArtifactNameError::InvalidExtension(s.to_string()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sdist_name_from_str() {
        let sn: SDistFilename = "trio-0.19a0.tar.gz".parse().unwrap();
        assert_eq!(sn.distribution, "trio".parse().unwrap());
        assert_eq!(sn.version, "0.19a0".parse().unwrap());

        assert_eq!(sn.to_string(), "trio-0.19a0.tar.gz");
    }

    #[test]
    fn test_sdist_name_with_hyphens() {
        let sn: SDistFilename = "zope-interface-5.4.0.tar.gz".parse().unwrap();
        assert_eq!(sn.distribution.as_str(), "zope-interface");
        assert_eq!(sn.version, "5.4.0".parse().unwrap());
    }

    #[test]
    fn test_sdist_formats() {
        for name in [
            "pkg-1.0.zip",
            "pkg-1.0.tar.gz",
            "pkg-1.0.tgz",
            "pkg-1.0.tar.bz2",
            "pkg-1.0.tar.xz",
            "pkg-1.0.tar",
        ] {
            let sn: SDistFilename = name.parse().unwrap();
            assert_eq!(sn.to_string(), name);
        }
        assert!("pkg-1.0.rar".parse::<SDistFilename>().is_err());
        assert!("noversion.tar.gz".parse::<SDistFilename>().is_err());
    }

    #[test]
    fn test_wheel_name_from_str() {
        let n: WheelFilename = "trio-0.18.0-py3-none-any.whl".parse().unwrap();
        assert_eq!(n.distribution, "trio".parse().unwrap());
        assert_eq!(n.version, "0.18.0".parse().unwrap());
        assert_eq!(n.build_tag, None);
        assert_eq!(n.py_tags, vec!["py3"]);
        assert_eq!(n.abi_tags, vec!["none"]);
        assert_eq!(n.arch_tags, vec!["any"]);

        assert_eq!(n.to_string(), "trio-0.18.0-py3-none-any.whl");
    }

    #[test]
    fn test_wheel_name_from_str_harder() {
        let n: WheelFilename = "foo.bar-0.1b3-1local-py2.py3-none-any.whl".parse().unwrap();
        assert_eq!(n.distribution, "foo.bar".parse().unwrap());
        assert_eq!(n.version, "0.1b3".parse().unwrap());
        assert_eq!(
            n.build_tag,
            Some(BuildTag {
                number: 1,
                name: String::from("local")
            })
        );
        assert_eq!(n.py_tags, vec!["py2", "py3"]);
        assert_eq!(n.abi_tags, vec!["none"]);
        assert_eq!(n.arch_tags, vec!["any"]);

        assert_eq!(n.to_string(), "foo.bar-0.1b3-1local-py2.py3-none-any.whl");
    }

    #[test]
    fn test_wheel_tag_expansion() {
        let n: WheelFilename = "foo-1.0-py2.py3-none-manylinux1_x86_64.any.whl"
            .parse()
            .unwrap();
        let tags = n.all_tags();
        assert_eq!(tags.len(), 4);
        assert!(tags.contains("py3-none-any"));
        assert!(tags.contains("py2-none-manylinux1_x86_64"));
    }

    #[test]
    fn test_build_tag_ordering() {
        let a: BuildTag = "1".parse().unwrap();
        let b: BuildTag = "2local".parse().unwrap();
        let c: BuildTag = "10".parse().unwrap();
        assert!(a < b);
        assert!(b < c);
        assert!("local".parse::<BuildTag>().is_err());
    }
}
