use std::path::Path;
use url::Url;

use super::{run, VcsError};

/// Checks out the repository at the requested revision (or HEAD) and returns
/// the numeric revision of the working copy.
pub(super) fn fetch(url: &Url, rev: Option<&str>, dest: &Path) -> Result<String, VcsError> {
    let dest_str = dest.to_string_lossy();
    match rev {
        Some(rev) => {
            let pinned = format!("{}@{}", url, rev);
            run(
                "svn",
                &["checkout", "-q", "--non-interactive", &pinned, &dest_str],
                None,
            )?;
        }
        None => {
            run(
                "svn",
                &["checkout", "-q", "--non-interactive", url.as_str(), &dest_str],
                None,
            )?;
        }
    }
    resolve_revision(dest)
}

/// The revision number of the working copy.
pub(super) fn resolve_revision(dest: &Path) -> Result<String, VcsError> {
    let stdout = run("svn", &["info", "--show-item", "revision"], Some(dest))?;
    Ok(stdout.trim().to_string())
}
