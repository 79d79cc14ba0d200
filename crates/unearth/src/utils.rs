//! Small shared helpers.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Ensures an index URL ends with a trailing slash. Index pages are joined
/// as `{index}/{name}/`; without the slash the final path segment would be
/// replaced instead of extended.
pub fn normalize_index_url(mut url: Url) -> Url {
    let path = url.path();
    if !path.ends_with('/') {
        url.set_path(&format!("{path}/"));
    }
    url
}

/// Rewrites legacy `requires-python` values like `>=3.5.*` into the form the
/// specifier grammar accepts (`>=3.5`). Wildcards are only valid with the
/// equality operators; old index pages carry them on ordered comparisons
/// anyway.
pub fn fix_legacy_specifier(specifier: &str) -> String {
    static LEGACY: OnceLock<Regex> = OnceLock::new();
    let legacy = LEGACY
        .get_or_init(|| Regex::new(r"(?P<op>>=|<=|>|<|~=)(?P<version>\s*[0-9][^,]*?)\.\*").unwrap());
    legacy.replace_all(specifier, "$op$version").into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_index_url() {
        let normalized = normalize_index_url(Url::parse("https://pypi.org/simple").unwrap());
        assert_eq!(normalized.as_str(), "https://pypi.org/simple/");

        let unchanged = normalize_index_url(Url::parse("https://pypi.org/simple/").unwrap());
        assert_eq!(unchanged.as_str(), "https://pypi.org/simple/");
    }

    #[test]
    fn test_fix_legacy_specifier() {
        assert_eq!(fix_legacy_specifier(">=3.5.*"), ">=3.5");
        assert_eq!(fix_legacy_specifier(">=2.7.*,<3.8"), ">=2.7,<3.8");
        // Wildcards on equality operators are valid and left alone.
        assert_eq!(fix_legacy_specifier("==3.5.*"), "==3.5.*");
        assert_eq!(fix_legacy_specifier(">=3.5"), ">=3.5");
    }
}
