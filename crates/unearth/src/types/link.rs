use rattler_digest::serde::SerializableHash;
use rattler_digest::{parse_digest_from_hex, Md5, Md5Hash, Sha256, Sha256Hash};
use sha2::Sha512;
type Sha512Hash = digest::Output<Sha512>;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, VecSkipError};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::vcs::VcsKind;

/// The hash algorithms a link or an allow-list can carry. All hashes are kept
/// as raw digests and rendered as lowercase hex on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// All supported algorithms.
    pub fn all() -> [HashAlgorithm; 3] {
        [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha512,
            HashAlgorithm::Md5,
        ]
    }

    /// The canonical name, as used in URL fragments and PEP 691 hash maps.
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = UnknownHashAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(UnknownHashAlgorithm(s.to_string())),
        }
    }
}

/// Error for an unrecognized hash algorithm name.
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic)]
#[error("unknown hash algorithm '{0}', expected one of md5, sha256, sha512")]
pub struct UnknownHashAlgorithm(
    /// The unrecognized name.
    pub String,
);

/// The set of digests known for an artifact. Indexes commonly publish only a
/// sha256 digest but older indexes and URL fragments may carry md5 or sha512.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArtifactHashes {
    /// The sha256 digest of the artifact.
    #[serde_as(as = "Option<SerializableHash<Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// The sha512 digest of the artifact.
    #[serde_as(as = "Option<SerializableHash<Sha512>>")]
    pub sha512: Option<Sha512Hash>,

    /// The md5 digest of the artifact.
    #[serde_as(as = "Option<SerializableHash<Md5>>")]
    pub md5: Option<Md5Hash>,
}

impl ArtifactHashes {
    /// Returns true if no digest is present.
    pub fn is_empty(&self) -> bool {
        self.sha256.is_none() && self.sha512.is_none() && self.md5.is_none()
    }

    /// Returns the digest for `algorithm` as a lowercase hex string.
    pub fn get_hex(&self, algorithm: HashAlgorithm) -> Option<String> {
        match algorithm {
            HashAlgorithm::Md5 => self.md5.as_ref().map(hex::encode),
            HashAlgorithm::Sha256 => self.sha256.as_ref().map(hex::encode),
            HashAlgorithm::Sha512 => self.sha512.as_ref().map(hex::encode),
        }
    }

    /// Stores a hex digest for `algorithm`. Returns false when the hex string
    /// does not decode to a digest of the right width.
    pub fn set_hex(&mut self, algorithm: HashAlgorithm, hex: &str) -> bool {
        match algorithm {
            HashAlgorithm::Md5 => {
                self.md5 = parse_digest_from_hex::<Md5>(hex);
                self.md5.is_some()
            }
            HashAlgorithm::Sha256 => {
                self.sha256 = parse_digest_from_hex::<Sha256>(hex);
                self.sha256.is_some()
            }
            HashAlgorithm::Sha512 => {
                self.sha512 = parse_digest_from_hex::<Sha512>(hex);
                self.sha512.is_some()
            }
        }
    }
}

/// Parses an `algorithm=hexdigest` pair, the format used in URL fragments and
/// `data-dist-info-metadata` attributes. Unknown algorithms and malformed
/// digests yield `None`.
pub fn parse_hash(s: &str) -> Option<ArtifactHashes> {
    let (name, hex) = s.split_once('=')?;
    let algorithm = HashAlgorithm::from_str(name).ok()?;
    let mut hashes = ArtifactHashes::default();
    hashes.set_hex(algorithm, hex).then_some(hashes)
}

/// Yank status of a link. An index yanks a release to signal it should only
/// be installed when explicitly pinned; the reason is optional and may be an
/// empty string.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(from = "RawYanked")]
pub struct Yanked {
    /// True if the link is yanked.
    pub yanked: bool,
    /// The reason the link was yanked, when one was given.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawYanked {
    NoReason(bool),
    WithReason(String),
}

impl From<RawYanked> for Yanked {
    fn from(raw: RawYanked) -> Self {
        match raw {
            RawYanked::NoReason(yanked) => Self {
                yanked,
                reason: None,
            },
            RawYanked::WithReason(reason) => Self {
                yanked: true,
                reason: Some(reason),
            },
        }
    }
}

/// Whether a metadata file is published next to the artifact as specified in
/// [PEP 658](https://peps.python.org/pep-0658/) (`{file_url}.metadata`),
/// optionally with its own hashes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(from = "Option<RawDistInfoMetadata>")]
pub struct DistInfoMetadata {
    /// True if the metadata file is available.
    pub available: bool,
    /// Hashes of the metadata file.
    pub hashes: ArtifactHashes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawDistInfoMetadata {
    NoHashes(bool),
    WithHashes(ArtifactHashes),
}

impl From<Option<RawDistInfoMetadata>> for DistInfoMetadata {
    fn from(maybe_raw: Option<RawDistInfoMetadata>) -> Self {
        match maybe_raw {
            None => Default::default(),
            Some(RawDistInfoMetadata::NoHashes(available)) => Self {
                available,
                hashes: Default::default(),
            },
            Some(RawDistInfoMetadata::WithHashes(hashes)) => Self {
                available: true,
                hashes,
            },
        }
    }
}

/// A link to a remote or local artifact, together with everything the index
/// page said about it.
///
/// Links are produced by the collector without any interpretation of the
/// filename; deciding whether a link is a usable candidate is the evaluator's
/// job. Two links are equal when their normalized URLs are equal.
#[derive(Debug, Clone, Serialize)]
pub struct Link {
    /// The absolute URL of the artifact.
    pub url: Url,
    /// The page that exposed this link, if any.
    pub comes_from: Option<Url>,
    /// Digests published for the artifact.
    pub hashes: Option<ArtifactHashes>,
    /// The raw `data-requires-python` / `requires-python` value. Kept as a
    /// string because legacy indexes publish values that need fixing up
    /// before they parse; the evaluator deals with that.
    pub requires_python: Option<String>,
    /// Yank status.
    pub yanked: Yanked,
    /// PEP 658 metadata availability.
    pub metadata: DistInfoMetadata,
}

impl Link {
    /// Creates a plain link with no index-provided attributes.
    pub fn new(url: Url) -> Self {
        let hashes = url.fragment().and_then(parse_hash);
        Link {
            url,
            comes_from: None,
            hashes,
            requires_python: None,
            yanked: Yanked::default(),
            metadata: DistInfoMetadata::default(),
        }
    }

    /// Creates a `file://` link for a local path. The path must be absolute.
    pub fn from_path(path: &Path) -> Option<Self> {
        Url::from_file_path(path).ok().map(Link::new)
    }

    /// The decoded final path segment of the URL.
    pub fn filename(&self) -> String {
        let segment = self
            .url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .unwrap_or_default();
        percent_encoding::percent_decode_str(segment)
            .decode_utf8_lossy()
            .into_owned()
    }

    /// True if the link points at a wheel.
    pub fn is_wheel(&self) -> bool {
        self.filename().ends_with(".whl")
    }

    /// True if the link uses the `file` scheme.
    pub fn is_file(&self) -> bool {
        self.url.scheme() == "file"
    }

    /// The local path for a `file://` link.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.is_file().then(|| self.url.to_file_path().ok())?
    }

    /// The version control system encoded in the URL scheme, e.g.
    /// `git+https://...` yields [`VcsKind::Git`].
    pub fn vcs(&self) -> Option<VcsKind> {
        let (prefix, _) = self.url.scheme().split_once('+')?;
        VcsKind::from_str(prefix).ok()
    }

    /// The `subdirectory=` fragment value, used by source trees whose project
    /// lives below the repository or archive root.
    pub fn subdirectory(&self) -> Option<String> {
        self.fragment_value("subdirectory")
    }

    /// The URL of the PEP 658 metadata file, when the index advertises one.
    pub fn metadata_url(&self) -> Option<Url> {
        if !self.metadata.available {
            return None;
        }
        let mut url = self.url.clone();
        url.set_fragment(None);
        let path = format!("{}.metadata", url.path());
        url.set_path(&path);
        Some(url)
    }

    /// Looks up a `key=value` pair in the URL fragment.
    fn fragment_value(&self, key: &str) -> Option<String> {
        self.url.fragment()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key && !v.is_empty()).then(|| v.to_string())
        })
    }

    /// The URL used for identity comparisons: the fragment is dropped unless
    /// it carries a digest. Scheme and host case as well as default ports are
    /// already normalized by the URL parser.
    pub fn normalized_url(&self) -> Url {
        let mut url = self.url.clone();
        let keep_fragment = url.fragment().map(parse_hash).map_or(false, |h| h.is_some());
        if !keep_fragment {
            url.set_fragment(None);
        }
        url
    }

    /// The URL with userinfo masked, for log output.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if !url.username().is_empty() || url.password().is_some() {
            let _ = url.set_username("***");
            let _ = url.set_password(None);
        }
        url.to_string()
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_url() == other.normalized_url()
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_url().as_str().hash(state)
    }
}

/// The response of a PEP 691 JSON index page.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectInfo {
    /// Repository API metadata.
    #[serde(default)]
    pub meta: Meta,

    /// All files published for the project. Entries that fail to deserialize
    /// are skipped rather than failing the whole page.
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    pub files: Vec<ProjectFile>,
}

/// Repository API version metadata of a PEP 691 response.
#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    /// Version of the simple API.
    #[serde(rename = "api-version")]
    pub version: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            version: "1.0".into(),
        }
    }
}

/// A single `files[]` entry of a PEP 691 response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectFile {
    /// Download URL, possibly relative to the page URL.
    pub url: String,
    /// Digests of the file.
    #[serde(default)]
    pub hashes: ArtifactHashes,
    /// Python version requirement.
    #[serde(default)]
    pub requires_python: Option<String>,
    /// Yank status: `false`, `true`, or a reason string.
    #[serde(default)]
    pub yanked: Yanked,
    /// PEP 658 metadata marker, under its PEP 714 name with a fallback to the
    /// original key.
    #[serde(default, alias = "dist-info-metadata")]
    pub core_metadata: DistInfoMetadata,
}

impl ProjectFile {
    /// Converts the entry into a [`Link`], resolving the URL against the page
    /// it came from. Returns `None` when the URL does not resolve.
    pub fn into_link(self, page_url: &Url) -> Option<Link> {
        let url = page_url.join(&self.url).ok()?;
        let fragment_hashes = url.fragment().and_then(parse_hash);
        let hashes = if self.hashes.is_empty() {
            fragment_hashes
        } else {
            Some(self.hashes)
        };
        Some(Link {
            url,
            comes_from: Some(page_url.clone()),
            hashes,
            requires_python: self.requires_python,
            yanked: self.yanked,
            metadata: self.core_metadata,
        })
    }
}
