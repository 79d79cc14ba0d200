use std::path::Path;
use url::Url;

use super::{run, VcsError};

/// Branches the repository at the requested revision and returns the revno
/// of the result.
pub(super) fn fetch(url: &Url, rev: Option<&str>, dest: &Path) -> Result<String, VcsError> {
    let dest_str = dest.to_string_lossy();
    match rev {
        Some(rev) => {
            run(
                "bzr",
                &["branch", "-q", "-r", rev, url.as_str(), &dest_str],
                None,
            )?;
        }
        None => {
            run("bzr", &["branch", "-q", url.as_str(), &dest_str], None)?;
        }
    }
    resolve_revision(dest)
}

/// The revision number of the branch.
pub(super) fn resolve_revision(dest: &Path) -> Result<String, VcsError> {
    let stdout = run("bzr", &["revno", "-q"], Some(dest))?;
    Ok(stdout.trim().to_string())
}
