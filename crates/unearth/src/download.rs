//! Artifact acquisition: downloading links with hash verification, unpacking
//! archives safely, and dispatching VCS links to their drivers.

use digest::Digest;
use futures::StreamExt;
use indexmap::IndexMap;
use miette::Diagnostic;
use rattler_digest::{Md5, Sha256};
use sha2::Sha512;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::index::{Session, SessionError};
use crate::types::{ArtifactHashes, HashAlgorithm, Link, SDistFormat};
use crate::vcs::{self, VcsError};

/// The hashes a caller is willing to accept, `algorithm -> allowed hex
/// digests`. A download matching any listed digest verifies.
#[derive(Debug, Clone, Default)]
pub struct HashAllowList {
    entries: IndexMap<HashAlgorithm, Vec<String>>,
}

impl HashAllowList {
    /// Adds an allowed digest for an algorithm.
    pub fn add(&mut self, algorithm: HashAlgorithm, hex: impl Into<String>) {
        self.entries
            .entry(algorithm)
            .or_default()
            .push(hex.into().to_ascii_lowercase());
    }

    /// True when no digest is listed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The algorithms with at least one allowed digest.
    pub fn algorithms(&self) -> impl Iterator<Item = HashAlgorithm> + '_ {
        self.entries.keys().copied()
    }

    /// Whether the digest is allowed for the algorithm.
    pub fn allows(&self, algorithm: HashAlgorithm, hex: &str) -> bool {
        self.entries
            .get(&algorithm)
            .map_or(false, |allowed| allowed.iter().any(|h| h == hex))
    }

    /// Builds an allow-list from the digests declared on a link.
    pub fn from_link(link: &Link) -> Self {
        let mut list = Self::default();
        if let Some(hashes) = &link.hashes {
            for algorithm in HashAlgorithm::all() {
                if let Some(hex) = hashes.get_hex(algorithm) {
                    list.add(algorithm, hex);
                }
            }
        }
        list
    }

    /// Checks the digests declared on a link against this list without
    /// touching the artifact. `None` means the link declares no digest for
    /// any listed algorithm and verification has to happen on the bytes.
    pub fn check_declared(&self, hashes: Option<&ArtifactHashes>) -> Option<bool> {
        let hashes = hashes?;
        for (algorithm, allowed) in &self.entries {
            if let Some(hex) = hashes.get_hex(*algorithm) {
                return Some(allowed.iter().any(|h| *h == hex));
            }
        }
        None
    }
}

/// An incremental hasher for one algorithm.
enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// The downloaded artifact did not match any allowed digest.
#[derive(Debug, Error, Diagnostic)]
#[error("hash mismatch for {url}: computed {computed}, allowed [{allowed}]")]
pub struct HashMismatch {
    /// The artifact that failed verification.
    pub url: Url,
    /// The digests computed from the downloaded bytes.
    pub computed: String,
    /// The digests that would have been accepted.
    pub allowed: String,
}

/// Verifies a byte stream against an allow-list, computing one digest per
/// listed algorithm while the bytes pass through.
struct HashValidator<'a> {
    url: Url,
    allowed: &'a HashAllowList,
    hashers: Vec<(HashAlgorithm, Hasher)>,
}

impl<'a> HashValidator<'a> {
    fn new(url: Url, allowed: &'a HashAllowList) -> Self {
        let hashers = allowed
            .algorithms()
            .map(|algorithm| (algorithm, Hasher::new(algorithm)))
            .collect();
        Self {
            url,
            allowed,
            hashers,
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(chunk);
        }
    }

    fn validate(self) -> Result<(), HashMismatch> {
        if self.allowed.is_empty() {
            return Ok(());
        }
        let mut computed = Vec::new();
        for (algorithm, hasher) in self.hashers {
            let hex = hasher.finalize_hex();
            if self.allowed.allows(algorithm, &hex) {
                return Ok(());
            }
            computed.push(format!("{algorithm}={hex}"));
        }
        let allowed = self
            .allowed
            .entries
            .iter()
            .flat_map(|(algorithm, hexes)| {
                hexes.iter().map(move |hex| format!("{algorithm}={hex}"))
            })
            .collect::<Vec<_>>()
            .join(", ");
        Err(HashMismatch {
            url: self.url,
            computed: computed.join(", "),
            allowed,
        })
    }

    fn validate_file(mut self, path: &Path) -> Result<(), DownloadError> {
        let mut file = fs_err::File::open(path).map_err(|source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut buffer = [0u8; 8192];
        loop {
            let read = file.read(&mut buffer).map_err(|source| DownloadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if read == 0 {
                break;
            }
            self.update(&buffer[..read]);
        }
        self.validate()?;
        Ok(())
    }
}

/// An archive is malformed or tries to escape the extraction target.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum UnpackError {
    #[error("unknown archive type: '{0}'")]
    UnknownArchive(String),

    #[error("the archive {} has an entry '{entry}' escaping the target directory", archive.display())]
    PathTraversal { archive: PathBuf, entry: String },

    #[error("malformed archive {}: {source}", archive.display())]
    Zip {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to unpack {}: {source}", archive.display())]
    Io {
        archive: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while acquiring an artifact.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum DownloadError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    HashMismatch(#[from] HashMismatch),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Unpack(#[from] UnpackError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Vcs(#[from] VcsError),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot download '{0}': unsupported scheme")]
    UnsupportedScheme(Url),
}

/// The outcome of [`download_and_unpack`].
#[derive(Debug)]
pub struct Unpacked {
    /// The installable file or directory.
    pub path: PathBuf,
    /// The immutable revision a VCS link resolved to.
    pub revision: Option<String>,
}

/// Downloads a link into `dest_dir` and returns the local path.
///
/// `file://` links pointing at directories are returned untouched, local
/// files are verified and copied. Remote links stream into a temporary file
/// that is atomically renamed to the link's basename once every requested
/// digest verified; the temporary file never survives an error. When the
/// caller lists no hashes, the digests declared on the link are enforced
/// instead.
pub async fn download(
    session: &Session,
    link: &Link,
    dest_dir: &Path,
    hashes: Option<&HashAllowList>,
) -> Result<PathBuf, DownloadError> {
    let allowed = effective_allow_list(link, hashes);

    if link.is_file() {
        let source = link
            .file_path()
            .ok_or_else(|| DownloadError::UnsupportedScheme(link.url.clone()))?;
        if source.is_dir() {
            tracing::info!("{} is a local directory, using it directly", source.display());
            return Ok(source);
        }
        HashValidator::new(link.url.clone(), &allowed).validate_file(&source)?;
        let dest = dest_dir.join(link.filename());
        if dest != source {
            fs_err::copy(&source, &dest).map_err(|source| DownloadError::Io {
                path: dest.clone(),
                source,
            })?;
        }
        return Ok(dest);
    }

    let dest = dest_dir.join(link.filename());
    if dest.is_file() {
        // A file from an earlier download is reused when it still verifies.
        match HashValidator::new(link.url.clone(), &allowed).validate_file(&dest) {
            Ok(()) => {
                tracing::debug!("{} is already downloaded", dest.display());
                return Ok(dest);
            }
            Err(DownloadError::HashMismatch(_)) => {
                tracing::debug!("{} exists but does not verify, re-downloading", dest.display());
                fs_err::remove_file(&dest).map_err(|source| DownloadError::Io {
                    path: dest.clone(),
                    source,
                })?;
            }
            Err(other) => return Err(other),
        }
    }

    let mut response = session.get_stream(&link.url).await?;
    tracing::info!(
        "downloading {} ({})",
        link,
        response
            .content_length
            .map(|len| format!("{len} bytes"))
            .unwrap_or_else(|| "unknown size".to_string())
    );

    let mut validator = HashValidator::new(link.url.clone(), &allowed);
    let mut temp = tempfile::NamedTempFile::new_in(dest_dir).map_err(|source| {
        DownloadError::Io {
            path: dest_dir.to_path_buf(),
            source,
        }
    })?;
    while let Some(chunk) = response.stream.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Io {
            path: dest.clone(),
            source,
        })?;
        validator.update(&chunk);
        temp.write_all(&chunk).map_err(|source| DownloadError::Io {
            path: dest.clone(),
            source,
        })?;
    }
    validator.validate()?;

    temp.persist(&dest)
        .map_err(|e| DownloadError::Io {
            path: dest.clone(),
            source: e.error,
        })?;
    Ok(dest)
}

/// The digests to enforce: the caller's allow-list when given, otherwise
/// whatever the link itself declares.
fn effective_allow_list(link: &Link, hashes: Option<&HashAllowList>) -> HashAllowList {
    match hashes {
        Some(list) => list.clone(),
        None => HashAllowList::from_link(link),
    }
}

/// Streams a link through a digest without keeping the bytes, for hash
/// checking links that declare no usable digest.
pub async fn stream_hash(
    session: &Session,
    link: &Link,
    algorithm: HashAlgorithm,
) -> Result<String, DownloadError> {
    let mut hasher = Hasher::new(algorithm);
    let mut response = session.get_stream(&link.url).await?;
    while let Some(chunk) = response.stream.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Io {
            path: PathBuf::from(link.filename()),
            source,
        })?;
        hasher.update(&chunk);
    }
    Ok(hasher.finalize_hex())
}

fn split_leading_dir(name: &str) -> (&str, &str) {
    let name = name.trim_start_matches('/');
    match name.split_once('/') {
        Some((first, rest)) => (first, rest),
        None => (name, ""),
    }
}

/// True when every entry lives under one shared top-level directory, the
/// layout source archives are expected to have.
fn has_leading_dir<'a>(names: impl Iterator<Item = &'a str>) -> bool {
    let mut common: Option<&str> = None;
    let mut any = false;
    for name in names {
        any = true;
        let (prefix, _) = split_leading_dir(name);
        if prefix.is_empty() {
            return false;
        }
        match common {
            None => common = Some(prefix),
            Some(current) if current != prefix => return false,
            Some(_) => {}
        }
    }
    any
}

/// Rejects absolute entry paths and `..` components.
fn safe_relative_path(archive: &Path, entry: &str) -> Result<PathBuf, UnpackError> {
    let path = Path::new(entry);
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => result.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(UnpackError::PathTraversal {
                    archive: archive.to_path_buf(),
                    entry: entry.to_string(),
                })
            }
        }
    }
    Ok(result)
}

/// Unpacks an archive into `dest`, detecting the format from the extension.
///
/// A shared leading directory is stripped so `dest` contains the source tree
/// itself. Every entry path is validated before anything is written; an
/// entry that would land outside `dest` fails the whole unpack.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), UnpackError> {
    let filename = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    fs_err::create_dir_all(dest).map_err(|source| UnpackError::Io {
        archive: archive.to_path_buf(),
        source,
    })?;

    if filename.ends_with(".whl") || filename.ends_with(".zip") {
        return unpack_zip(archive, dest);
    }
    match SDistFormat::split_extension(&filename) {
        Some((_, SDistFormat::Zip)) => unpack_zip(archive, dest),
        Some((_, format)) => unpack_tar(archive, dest, format),
        None => Err(UnpackError::UnknownArchive(filename)),
    }
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), UnpackError> {
    let zip_error = |source| UnpackError::Zip {
        archive: archive_path.to_path_buf(),
        source,
    };
    let io_error = |source| UnpackError::Io {
        archive: archive_path.to_path_buf(),
        source,
    };

    let file = fs_err::File::open(archive_path).map_err(io_error)?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_error)?;

    let names: Vec<String> = archive.file_names().map(ToOwned::to_owned).collect();
    let leading = has_leading_dir(names.iter().map(String::as_str));

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_error)?;

        // enclosed_name rejects absolute paths and parent-dir escapes.
        if entry.enclosed_name().is_none() {
            return Err(UnpackError::PathTraversal {
                archive: archive_path.to_path_buf(),
                entry: entry.name().to_string(),
            });
        }

        let name = entry.name().to_string();
        let stripped = if leading {
            split_leading_dir(&name).1.to_string()
        } else {
            name
        };
        if stripped.is_empty() {
            continue;
        }
        let relative = safe_relative_path(archive_path, &stripped)?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs_err::create_dir_all(&target).map_err(io_error)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent).map_err(io_error)?;
        }
        let mut out = fs_err::File::create(&target).map_err(io_error)?;
        std::io::copy(&mut entry, &mut out).map_err(io_error)?;

        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;

            if let Some(mode) = entry.unix_mode() {
                if mode & 0o111 != 0 {
                    fs_err::set_permissions(&target, Permissions::from_mode(0o755))
                        .map_err(io_error)?;
                }
            }
        }
    }
    Ok(())
}

fn tar_reader(
    archive_path: &Path,
    format: SDistFormat,
) -> Result<Box<dyn Read>, UnpackError> {
    let file = fs_err::File::open(archive_path).map_err(|source| UnpackError::Io {
        archive: archive_path.to_path_buf(),
        source,
    })?;
    Ok(match format {
        SDistFormat::TarGz | SDistFormat::Tgz => Box::new(flate2::read::GzDecoder::new(file)),
        SDistFormat::TarBz2 => Box::new(bzip2::read::BzDecoder::new(file)),
        SDistFormat::TarXz => Box::new(xz2::read::XzDecoder::new(file)),
        SDistFormat::Tar => Box::new(file),
        SDistFormat::Zip => unreachable!("zip archives do not go through the tar reader"),
    })
}

fn unpack_tar(archive_path: &Path, dest: &Path, format: SDistFormat) -> Result<(), UnpackError> {
    let io_error = |source| UnpackError::Io {
        archive: archive_path.to_path_buf(),
        source,
    };

    // First pass over the entry names to detect the shared leading directory;
    // tar streams cannot rewind, so the archive is opened twice.
    let mut names = Vec::new();
    {
        let mut archive = tar::Archive::new(tar_reader(archive_path, format)?);
        for entry in archive.entries().map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let path = entry.path().map_err(io_error)?;
            names.push(path.to_string_lossy().into_owned());
        }
    }
    let leading = has_leading_dir(names.iter().map(String::as_str));

    let mut archive = tar::Archive::new(tar_reader(archive_path, format)?);
    archive.set_preserve_permissions(true);
    for entry in archive.entries().map_err(io_error)? {
        let mut entry = entry.map_err(io_error)?;
        let name = entry.path().map_err(io_error)?.to_string_lossy().into_owned();

        let stripped = if leading {
            split_leading_dir(&name).1.to_string()
        } else {
            name.clone()
        };
        if stripped.is_empty() {
            continue;
        }
        let relative = safe_relative_path(archive_path, &stripped)?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent).map_err(io_error)?;
        }
        entry.unpack(&target).map_err(io_error)?;
    }
    Ok(())
}

/// Downloads a link and turns it into something installable at `location`.
///
/// Wheels are placed into `location` without unpacking (installing a wheel
/// is the installer's job), archives unpack into `location`, local
/// directories pass through, and VCS links check out into `location` and
/// report the resolved revision. A `subdirectory=` fragment joins the
/// returned path.
pub async fn download_and_unpack(
    session: &Session,
    link: &Link,
    location: &Path,
    download_dir: Option<&Path>,
    hashes: Option<&HashAllowList>,
) -> Result<Unpacked, DownloadError> {
    if let Some(parent) = location.parent() {
        fs_err::create_dir_all(parent).map_err(|source| DownloadError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if link.vcs().is_some() {
        let revision = vcs::fetch(link, location)?;
        let path = match link.subdirectory() {
            Some(sub) => location.join(sub),
            None => location.to_path_buf(),
        };
        return Ok(Unpacked {
            path,
            revision: Some(revision),
        });
    }

    // A wheel that already sits on the local filesystem is verified and used
    // in place; copying it into a scratch directory would lose it the moment
    // that directory is cleaned up.
    if link.is_wheel() {
        if let Some(source) = link.file_path().filter(|p| p.is_file()) {
            let allowed = effective_allow_list(link, hashes);
            HashValidator::new(link.url.clone(), &allowed).validate_file(&source)?;
            return Ok(Unpacked {
                path: source,
                revision: None,
            });
        }
    }

    // Downloads land in the caller's directory when given, otherwise in a
    // temporary directory that is cleaned up with this scope.
    let temp_dir;
    let download_dir = match download_dir {
        Some(dir) => dir,
        None => {
            temp_dir = tempfile::Builder::new()
                .prefix("unearth-download-")
                .tempdir()
                .map_err(|source| DownloadError::Io {
                    path: location.to_path_buf(),
                    source,
                })?;
            temp_dir.path()
        }
    };

    let artifact = download(session, link, download_dir, hashes).await?;

    if artifact.is_dir() {
        let path = match link.subdirectory() {
            Some(sub) => artifact.join(sub),
            None => artifact,
        };
        return Ok(Unpacked {
            path,
            revision: None,
        });
    }

    let path = if link.is_wheel() {
        fs_err::create_dir_all(location).map_err(|source| DownloadError::Io {
            path: location.to_path_buf(),
            source,
        })?;
        let target = location.join(link.filename());
        if target != artifact {
            move_file(&artifact, &target)?;
        }
        target
    } else {
        unpack_archive(&artifact, location)?;
        match link.subdirectory() {
            Some(sub) => location.join(sub),
            None => location.to_path_buf(),
        }
    };

    Ok(Unpacked {
        path,
        revision: None,
    })
}

/// Renames a file, falling back to copy+remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), DownloadError> {
    if fs_err::rename(from, to).is_ok() {
        return Ok(());
    }
    fs_err::copy(from, to).map_err(|source| DownloadError::Io {
        path: to.to_path_buf(),
        source,
    })?;
    fs_err::remove_file(from).map_err(|source| DownloadError::Io {
        path: from.to_path_buf(),
        source,
    })?;
    Ok(())
}
