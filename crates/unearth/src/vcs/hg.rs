use std::path::Path;
use url::Url;

use super::{run, VcsError};

/// Clones the repository, updates to the requested changeset and returns the
/// changeset id of the working directory.
pub(super) fn fetch(url: &Url, rev: Option<&str>, dest: &Path) -> Result<String, VcsError> {
    let dest_str = dest.to_string_lossy();
    run("hg", &["clone", "-q", url.as_str(), &dest_str], None)?;
    if let Some(rev) = rev {
        run("hg", &["update", "-q", "-r", rev], Some(dest))?;
    }
    resolve_revision(dest)
}

/// The changeset id of the working directory.
pub(super) fn resolve_revision(dest: &Path) -> Result<String, VcsError> {
    let stdout = run("hg", &["identify", "--id"], Some(dest))?;
    // A trailing '+' marks local modifications; a fresh clone has none.
    Ok(stdout.trim().trim_end_matches('+').to_string())
}
