//! Version control drivers: a uniform clone / checkout / resolve-revision
//! capability over git, mercurial, subversion and bazaar, each shelling out
//! to the respective client.

mod bzr;
mod git;
mod hg;
mod svn;

use miette::Diagnostic;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::process::Command;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::types::Link;

/// The supported version control systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum VcsKind {
    Git,
    Hg,
    Svn,
    Bzr,
}

impl VcsKind {
    /// The client executable for this system.
    pub fn command(self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Hg => "hg",
            VcsKind::Svn => "svn",
            VcsKind::Bzr => "bzr",
        }
    }
}

impl Display for VcsKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

/// Error for a scheme prefix that is not a supported VCS.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("unsupported version control system '{0}'")]
pub struct UnknownVcs(
    /// The unrecognized scheme.
    pub String,
);

impl FromStr for VcsKind {
    type Err = UnknownVcs;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(VcsKind::Git),
            "hg" => Ok(VcsKind::Hg),
            "svn" => Ok(VcsKind::Svn),
            "bzr" => Ok(VcsKind::Bzr),
            other => Err(UnknownVcs(other.to_string())),
        }
    }
}

/// Failures while splitting a revision off a VCS URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitRevError {
    /// The URL ends in `@` with nothing after it.
    EmptyRevision,
}

/// Splits a `vcs+scheme://...[@rev]` URL into the plain clone URL and the
/// optional revision. The `@` of the revision is the last one in the path,
/// so userinfo in the authority is never confused for a revision.
pub fn split_url_rev(url: &Url) -> Result<(Url, Option<String>), SplitRevError> {
    let plain = match url.as_str().split_once('+') {
        Some((prefix, rest)) if VcsKind::from_str(prefix).is_ok() => rest.to_string(),
        _ => url.as_str().to_string(),
    };
    let mut plain = Url::parse(&plain).map_err(|_| SplitRevError::EmptyRevision)?;
    plain.set_fragment(None);

    let rev = match plain.path().rsplit_once('@') {
        Some((path, rev)) => {
            if rev.is_empty() {
                return Err(SplitRevError::EmptyRevision);
            }
            let rev = rev.to_string();
            let path = path.to_string();
            plain.set_path(&path);
            Some(rev)
        }
        None => None,
    };
    Ok((plain, rev))
}

/// Errors raised by the VCS drivers.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum VcsError {
    #[error("the '{program}' client is not installed or not on PATH")]
    BackendMissing { program: String },

    #[error("command '{command}' failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("'{0}' is not a version control link")]
    NotAVcsLink(Url),

    #[error("the URL '{0}' has an empty revision after '@'")]
    EmptyRevision(Url),

    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a VCS client command and returns its stdout. A missing executable
/// maps to [`VcsError::BackendMissing`], a non-zero exit surfaces the
/// captured stderr.
pub(crate) fn run(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<String, VcsError> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    tracing::debug!("running {} {}", program, args.join(" "));

    let output = command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            VcsError::BackendMissing {
                program: program.to_string(),
            }
        } else {
            VcsError::Io {
                path: cwd.unwrap_or_else(|| Path::new(".")).to_path_buf(),
                source: e,
            }
        }
    })?;

    if !output.status.success() {
        return Err(VcsError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Checks out the repository a VCS link points at into `dest` and returns
/// the resolved immutable revision, so callers can record exactly what they
/// got even when the requested ref was a moving branch.
pub fn fetch(link: &Link, dest: &Path) -> Result<String, VcsError> {
    let kind = link
        .vcs()
        .ok_or_else(|| VcsError::NotAVcsLink(link.url.clone()))?;
    let (repo_url, rev) = split_url_rev(&link.url)
        .map_err(|SplitRevError::EmptyRevision| VcsError::EmptyRevision(link.url.clone()))?;

    // A stale checkout from an earlier run is replaced, not updated; the
    // destination is caller-scoped scratch space.
    if dest.exists() {
        fs_err::remove_dir_all(dest).map_err(|source| VcsError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
    }
    if let Some(parent) = dest.parent() {
        fs_err::create_dir_all(parent).map_err(|source| VcsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    tracing::info!(
        "checking out {} {} into {}",
        kind,
        link.redacted(),
        dest.display()
    );
    let revision = match kind {
        VcsKind::Git => git::fetch(&repo_url, rev.as_deref(), dest)?,
        VcsKind::Hg => hg::fetch(&repo_url, rev.as_deref(), dest)?,
        VcsKind::Svn => svn::fetch(&repo_url, rev.as_deref(), dest)?,
        VcsKind::Bzr => bzr::fetch(&repo_url, rev.as_deref(), dest)?,
    };
    tracing::info!("resolved {} to revision {}", link.redacted(), revision);
    Ok(revision)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vcs_kind_from_str() {
        assert_eq!("git".parse::<VcsKind>().unwrap(), VcsKind::Git);
        assert_eq!("bzr".parse::<VcsKind>().unwrap(), VcsKind::Bzr);
        assert!("cvs".parse::<VcsKind>().is_err());
    }

    #[test]
    fn test_split_url_rev() {
        let url = Url::parse("git+https://example.com/django.git@3.2.1").unwrap();
        let (repo, rev) = split_url_rev(&url).unwrap();
        assert_eq!(repo.as_str(), "https://example.com/django.git");
        assert_eq!(rev.as_deref(), Some("3.2.1"));
    }

    #[test]
    fn test_split_url_without_rev() {
        let url = Url::parse("hg+https://example.com/repo").unwrap();
        let (repo, rev) = split_url_rev(&url).unwrap();
        assert_eq!(repo.as_str(), "https://example.com/repo");
        assert_eq!(rev, None);
    }

    #[test]
    fn test_split_url_userinfo_is_not_a_rev() {
        let url = Url::parse("git+ssh://git@example.com/repo.git").unwrap();
        let (repo, rev) = split_url_rev(&url).unwrap();
        assert_eq!(repo.as_str(), "ssh://git@example.com/repo.git");
        assert_eq!(rev, None);
    }

    #[test]
    fn test_split_url_empty_rev() {
        let url = Url::parse("git+https://example.com/repo.git@").unwrap();
        assert_eq!(split_url_rev(&url), Err(SplitRevError::EmptyRevision));
    }

    #[test]
    fn test_split_url_drops_fragment() {
        let url = Url::parse("git+https://example.com/repo.git@main#subdirectory=pkg").unwrap();
        let (repo, rev) = split_url_rev(&url).unwrap();
        assert_eq!(repo.as_str(), "https://example.com/repo.git");
        assert_eq!(rev.as_deref(), Some("main"));
    }

    #[test]
    fn test_fetch_rejects_non_vcs_link() {
        let link = Link::new(Url::parse("https://example.com/pkg-1.0.tar.gz").unwrap());
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            fetch(&link, &dir.path().join("dest")),
            Err(VcsError::NotAVcsLink(_))
        ));
    }

    // Exercises the real git driver; silently skipped on machines without a
    // git client.
    #[test]
    fn test_git_fetch_local_repository() {
        if run("git", &["version"], None).is_err() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        fs_err::create_dir(&repo).unwrap();
        let git = |args: &[&str]| run("git", args, Some(&repo)).unwrap();
        git(&["init", "-q"]);
        git(&["config", "user.email", "test@example.com"]);
        git(&["config", "user.name", "test"]);
        fs_err::write(repo.join("setup.py"), b"# setup").unwrap();
        git(&["add", "."]);
        git(&["commit", "-q", "-m", "initial"]);

        let url = Url::parse(&format!(
            "git+{}",
            Url::from_file_path(&repo).unwrap()
        ))
        .unwrap();
        let link = Link::new(url);
        let dest = dir.path().join("checkout");
        let revision = fetch(&link, &dest).unwrap();
        assert_eq!(revision.len(), 40);
        assert!(dest.join("setup.py").is_file());

        // A second fetch replaces the stale checkout.
        let revision_again = fetch(&link, &dest).unwrap();
        assert_eq!(revision, revision_again);
    }
}
