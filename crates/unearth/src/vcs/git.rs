use std::path::Path;
use url::Url;

use super::{run, VcsError};

/// True for a full 40-hex commit id, which cannot be cloned by name.
fn is_commit_id(rev: &str) -> bool {
    rev.len() == 40 && rev.chars().all(|c| c.is_ascii_hexdigit())
}

/// Clones the repository at the requested revision and returns the commit id
/// of the resulting HEAD.
///
/// Branches and tags clone shallowly. A full commit id needs the complete
/// history before it can be checked out; a ref that fails the shallow clone
/// (e.g. an abbreviated commit id) falls back the same way.
pub(super) fn fetch(url: &Url, rev: Option<&str>, dest: &Path) -> Result<String, VcsError> {
    let dest_str = dest.to_string_lossy();
    match rev {
        None => {
            run(
                "git",
                &["clone", "-q", "--depth", "1", url.as_str(), &dest_str],
                None,
            )?;
        }
        Some(rev) if is_commit_id(rev) => {
            clone_and_checkout(url, rev, dest)?;
        }
        Some(rev) => {
            let shallow = run(
                "git",
                &[
                    "clone", "-q", "--depth", "1", "--branch", rev, url.as_str(), &dest_str,
                ],
                None,
            );
            match shallow {
                Ok(_) => {}
                Err(VcsError::CommandFailed { .. }) => {
                    if dest.exists() {
                        fs_err::remove_dir_all(dest).map_err(|source| VcsError::Io {
                            path: dest.to_path_buf(),
                            source,
                        })?;
                    }
                    clone_and_checkout(url, rev, dest)?;
                }
                Err(other) => return Err(other),
            }
        }
    }

    // Submodules, when present, belong to the checkout.
    if dest.join(".gitmodules").exists() {
        run(
            "git",
            &["submodule", "update", "--init", "-q", "--recursive"],
            Some(dest),
        )?;
    }

    resolve_revision(dest)
}

fn clone_and_checkout(url: &Url, rev: &str, dest: &Path) -> Result<(), VcsError> {
    let dest_str = dest.to_string_lossy();
    run("git", &["clone", "-q", url.as_str(), &dest_str], None)?;
    let _ = run(
        "git",
        &["config", "--local", "advice.detachedHead", "false"],
        Some(dest),
    );
    run("git", &["checkout", "-q", rev], Some(dest))?;
    Ok(())
}

/// The commit id of HEAD in the checkout.
pub(super) fn resolve_revision(dest: &Path) -> Result<String, VcsError> {
    let stdout = run("git", &["rev-parse", "HEAD"], Some(dest))?;
    Ok(stdout.trim().to_string())
}
