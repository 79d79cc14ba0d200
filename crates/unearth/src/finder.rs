//! The finder facade: configuration, link collection, evaluation and best
//! match selection for a requirement.

use miette::Diagnostic;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::download::{self, DownloadError, HashAllowList};
use crate::evaluator::{
    specifier_matches, Candidate, Evaluator, FormatControl, LinkMismatch, NameSet, Rejection,
    SortKey,
};
use crate::index::{collect_links, AllSourcesFailed, FindLinks, Session, Source};
use crate::tags::{TargetPython, WheelTags};
use crate::types::{NormalizedPackageName, Requirement};

/// Failures of a find operation. Filtering that leaves nothing is not an
/// error; it produces an empty [`BestMatch`] with the rejection reasons.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum FindError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Collect(#[from] AllSourcesFailed),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Download(#[from] DownloadError),
}

/// The outcome of [`PackageFinder::find_best_match`].
#[derive(Debug)]
pub struct BestMatch {
    /// The best matching candidate, `None` when nothing was applicable.
    pub best: Option<Candidate>,
    /// Every applicable candidate, best first. The head is `best`.
    pub applicable: Vec<Candidate>,
    /// Every candidate that parsed, including versions the specifier
    /// excluded, best first.
    pub candidates: Vec<Candidate>,
    /// Links that were dropped, with the reason each one was dropped.
    pub rejections: Vec<Rejection>,
}

impl BestMatch {
    /// A human-readable explanation when no candidate was selected.
    pub fn failure_reason(&self) -> Option<String> {
        if self.best.is_some() {
            return None;
        }
        if !self.candidates.is_empty() {
            return Some(format!(
                "{} candidates were found but none matched the requirement",
                self.candidates.len()
            ));
        }
        if self.rejections.is_empty() {
            return Some("no links were found for the requirement".to_string());
        }
        let mut reasons: Vec<String> = self
            .rejections
            .iter()
            .map(|rejection| format!("{}: {}", rejection.link.filename(), rejection.reason))
            .collect();
        reasons.dedup();
        Some(format!("every link was rejected:\n  {}", reasons.join("\n  ")))
    }
}

/// Finds the distributions published for a requirement across the configured
/// sources and selects the best one for a target environment.
///
/// The finder holds configuration and the injected [`Session`] only; every
/// find call collects and evaluates from scratch, so repeated calls observe
/// index changes and two finders with different policies can share a
/// process.
pub struct PackageFinder {
    session: Session,
    sources: Vec<Source>,
    target_python: TargetPython,
    tags: WheelTags,
    ignore_compatibility: bool,
    format_control: FormatControl,
    prefer_binary: NameSet,
    allow_yanked: bool,
    allow_prereleases: Option<bool>,
    respect_source_order: bool,
}

impl PackageFinder {
    /// Creates a finder with no sources and a default target. Sources are
    /// added with [`add_index_url`](Self::add_index_url) and
    /// [`add_find_links`](Self::add_find_links).
    pub fn new(session: Session) -> Self {
        let target_python = TargetPython::default();
        let tags = target_python.supported_tags();
        Self {
            session,
            sources: Vec::new(),
            target_python,
            tags,
            ignore_compatibility: false,
            format_control: FormatControl::default(),
            prefer_binary: NameSet::default(),
            allow_yanked: false,
            allow_prereleases: None,
            respect_source_order: false,
        }
    }

    /// Adds an index queried per project name. Credentials embedded in the
    /// URL are remembered for the whole host.
    pub fn add_index_url(&mut self, url: Url) {
        self.session.add_index_credentials(&url);
        self.sources.push(Source::Index(url));
    }

    /// Adds a name-agnostic find-links location.
    pub fn add_find_links(&mut self, find_links: FindLinks) {
        self.sources.push(Source::FindLinks(find_links));
    }

    /// Replaces the target environment candidates must be compatible with.
    pub fn with_target_python(mut self, target_python: TargetPython) -> Self {
        self.tags = target_python.supported_tags();
        self.target_python = target_python;
        self
    }

    /// Restricts formats per package (no-binary / only-binary).
    pub fn with_format_control(mut self, format_control: FormatControl) -> Self {
        self.format_control = format_control;
        self
    }

    /// Packages whose wheels win over sdists even across versions.
    pub fn with_prefer_binary(mut self, prefer_binary: NameSet) -> Self {
        self.prefer_binary = prefer_binary;
        self
    }

    /// Admits yanked links even for unpinned requirements.
    pub fn with_allow_yanked(mut self, allow_yanked: bool) -> Self {
        self.allow_yanked = allow_yanked;
        self
    }

    /// Forces pre-release handling instead of inferring it from the
    /// specifier set.
    pub fn with_allow_prereleases(mut self, allow_prereleases: Option<bool>) -> Self {
        self.allow_prereleases = allow_prereleases;
        self
    }

    /// Admits every wheel tag, for debugging what an index serves.
    pub fn with_ignore_compatibility(mut self, ignore_compatibility: bool) -> Self {
        self.ignore_compatibility = ignore_compatibility;
        self
    }

    /// Ranks by source order first instead of globally by version.
    pub fn with_respect_source_order(mut self, respect_source_order: bool) -> Self {
        self.respect_source_order = respect_source_order;
        self
    }

    /// The injected session, for callers that want to download with it.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The configured sources, in query order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The target environment in use.
    pub fn target_python(&self) -> &TargetPython {
        &self.target_python
    }

    /// Finds every applicable candidate for the requirement, best first.
    pub async fn find_matches(
        &self,
        requirement: &Requirement,
        hashes: Option<&HashAllowList>,
    ) -> Result<Vec<Candidate>, FindError> {
        Ok(self.find_best_match(requirement, hashes).await?.applicable)
    }

    /// Finds the best match for the requirement, along with every applicable
    /// and every parsed candidate and the rejection reasons for the rest.
    pub async fn find_best_match(
        &self,
        requirement: &Requirement,
        hashes: Option<&HashAllowList>,
    ) -> Result<BestMatch, FindError> {
        let name: NormalizedPackageName = requirement.name().clone().into();
        let mut rejections = Vec::new();

        let candidates = match requirement.as_link() {
            // Direct URL and VCS requirements name their artifact; no index
            // is queried and no version is known up front.
            Some(link) => vec![Candidate {
                name: name.clone(),
                version: None,
                artifact_name: None,
                link,
            }],
            None => {
                self.collect_candidates(requirement, &name, &mut rejections)
                    .await?
            }
        };

        let mut applicable = match requirement {
            Requirement::Named(named) => {
                let matching = |allow_prereleases: bool| -> Vec<Candidate> {
                    candidates
                        .iter()
                        .filter(|candidate| {
                            candidate.version.as_ref().map_or(true, |version| {
                                specifier_matches(&named.specifiers, version, allow_prereleases)
                            })
                        })
                        .cloned()
                        .collect()
                };
                let mut applicable = matching(self.allow_prereleases.unwrap_or(false));
                if applicable.is_empty() && self.allow_prereleases.is_none() {
                    // When the index only has pre-releases, take them even
                    // though nothing asked for one.
                    applicable = matching(true);
                }

                let kept: HashSet<Url> = applicable
                    .iter()
                    .map(|candidate| candidate.link.normalized_url())
                    .collect();
                for candidate in &candidates {
                    if !kept.contains(&candidate.link.normalized_url()) {
                        rejections.push(Rejection {
                            link: candidate.link.clone(),
                            reason: LinkMismatch::SpecifierMismatch {
                                version: candidate
                                    .version
                                    .clone()
                                    .expect("named candidates always carry a version"),
                                specifiers: named.specifiers.to_string(),
                            },
                        });
                    }
                }
                applicable
            }
            Requirement::Url(_) | Requirement::Vcs(_) => candidates.clone(),
        };

        if let Some(allow) = hashes {
            if !allow.is_empty() {
                applicable = self
                    .filter_hashes(applicable, allow, &mut rejections)
                    .await?;
            }
        }

        Ok(BestMatch {
            best: applicable.first().cloned(),
            applicable,
            candidates,
            rejections,
        })
    }

    /// Collects links for a named requirement and evaluates them into a
    /// ranked candidate list.
    async fn collect_candidates(
        &self,
        requirement: &Requirement,
        name: &NormalizedPackageName,
        rejections: &mut Vec<Rejection>,
    ) -> Result<Vec<Candidate>, FindError> {
        // A pinned requirement may install a yanked release; that is the
        // whole point of yanking rather than deleting.
        let allow_yanked = self.allow_yanked || requirement.is_pinned();
        let evaluator = Evaluator {
            package_name: name.clone(),
            python_version: self.target_python.python_version(),
            tags: &self.tags,
            ignore_compatibility: self.ignore_compatibility,
            allow_yanked,
            format_control: &self.format_control,
        };
        let prefer_binary = self.prefer_binary.covers(name);

        let collected = collect_links(&self.session, &self.sources, name).await?;

        let mut groups: Vec<Vec<Candidate>> = Vec::new();
        for links in &collected.by_source {
            let mut group = Vec::new();
            for link in links {
                match evaluator.evaluate_link(link) {
                    Ok(candidate) => group.push(candidate),
                    Err(reason) => {
                        tracing::debug!("skipping link {}: {}", link, reason);
                        rejections.push(Rejection {
                            link: link.clone(),
                            reason,
                        });
                    }
                }
            }
            groups.push(group);
        }

        Ok(if self.respect_source_order {
            for group in &mut groups {
                sort_candidates(group, &self.tags, prefer_binary);
            }
            groups.into_iter().flatten().collect()
        } else {
            let mut all: Vec<Candidate> = groups.into_iter().flatten().collect();
            sort_candidates(&mut all, &self.tags, prefer_binary);
            all
        })
    }

    /// Drops candidates whose artifact does not match the allow-list. A link
    /// declaring a digest for a listed algorithm is judged on the spot;
    /// anything else is fetched through the session and hashed.
    async fn filter_hashes(
        &self,
        candidates: Vec<Candidate>,
        allowed: &HashAllowList,
        rejections: &mut Vec<Rejection>,
    ) -> Result<Vec<Candidate>, FindError> {
        let mut kept = Vec::new();
        for candidate in candidates {
            match allowed.check_declared(candidate.link.hashes.as_ref()) {
                Some(true) => kept.push(candidate),
                Some(false) => {
                    let algorithm = allowed
                        .algorithms()
                        .find(|algorithm| {
                            candidate
                                .link
                                .hashes
                                .as_ref()
                                .and_then(|h| h.get_hex(*algorithm))
                                .is_some()
                        })
                        .expect("a declared mismatch implies an overlapping algorithm");
                    rejections.push(Rejection {
                        reason: LinkMismatch::HashMismatch {
                            algorithm: algorithm.to_string(),
                        },
                        link: candidate.link,
                    });
                }
                None => {
                    if candidate.link.vcs().is_some() {
                        // Checkouts cannot be hash-verified up front.
                        kept.push(candidate);
                        continue;
                    }
                    let algorithm = allowed
                        .algorithms()
                        .next()
                        .expect("filter_hashes is only called with a non-empty allow-list");
                    let hex =
                        download::stream_hash(&self.session, &candidate.link, algorithm).await?;
                    if allowed.allows(algorithm, &hex) {
                        kept.push(candidate);
                    } else {
                        rejections.push(Rejection {
                            reason: LinkMismatch::HashMismatch {
                                algorithm: algorithm.to_string(),
                            },
                            link: candidate.link,
                        });
                    }
                }
            }
        }
        Ok(kept)
    }
}

fn sort_candidates(candidates: &mut [Candidate], tags: &WheelTags, prefer_binary: bool) {
    candidates.sort_by_cached_key(|candidate| {
        std::cmp::Reverse(SortKey::for_candidate(candidate, tags, prefer_binary))
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tags::TargetPython;
    use std::path::Path;

    fn write_page(dir: &Path, body: &str) -> FindLinks {
        let page = dir.join("links.html");
        fs_err::write(&page, body).unwrap();
        FindLinks::Path(fs_err::canonicalize(page).unwrap())
    }

    fn finder_for(dir: &Path, body: &str) -> PackageFinder {
        let mut finder = PackageFinder::new(Session::new().unwrap())
            .with_target_python(TargetPython::new(3, 10, vec!["any".to_string()]));
        finder.add_find_links(write_page(dir, body));
        finder
    }

    #[tokio::test]
    async fn test_best_match_prefers_newer_version() {
        let dir = tempfile::tempdir().unwrap();
        let finder = finder_for(
            dir.path(),
            r#"<html><body>
                <a href="https://example.com/Flask-2.1.2-py3-none-any.whl#sha256=fad5b446feb0d6d6f95297c2b8aba34d7cd3250a8fd0e80647726ac787fe04fe">wheel</a>
                <a href="https://example.com/Flask-1.1.4-py2.py3-none-any.whl">old wheel</a>
            </body></html>"#,
        );

        let requirement: Requirement = "flask>=2".parse().unwrap();
        let result = finder.find_best_match(&requirement, None).await.unwrap();
        let best = result.best.unwrap();
        assert_eq!(best.name.as_str(), "flask");
        assert_eq!(best.version, Some("2.1.2".parse().unwrap()));
        assert_eq!(result.applicable.len(), 1);
        assert_eq!(result.candidates.len(), 2);
        // The 1.1.4 wheel parses but fails the specifier.
        assert!(result
            .rejections
            .iter()
            .any(|r| matches!(r.reason, LinkMismatch::SpecifierMismatch { .. })));
    }

    #[tokio::test]
    async fn test_yanked_skipped_unless_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let page = r#"<html><body>
            <a href="https://example.com/baz-1.2-py3-none-any.whl" data-yanked="broken">yanked</a>
            <a href="https://example.com/baz-1.1-py3-none-any.whl">fine</a>
        </body></html>"#;
        let finder = finder_for(dir.path(), page);

        let requirement: Requirement = "baz".parse().unwrap();
        let result = finder.find_best_match(&requirement, None).await.unwrap();
        assert_eq!(result.best.unwrap().version, Some("1.1".parse().unwrap()));
        assert!(result
            .rejections
            .iter()
            .any(|r| matches!(r.reason, LinkMismatch::Yanked { .. })));

        // Pinning the yanked version admits it, and its yank status is
        // visible on the selected link.
        let pinned: Requirement = "baz==1.2".parse().unwrap();
        let result = finder.find_best_match(&pinned, None).await.unwrap();
        let best = result.best.unwrap();
        assert_eq!(best.version, Some("1.2".parse().unwrap()));
        assert!(best.link.yanked.yanked);
        assert_eq!(best.link.yanked.reason.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn test_prerelease_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        let finder = finder_for(
            dir.path(),
            r#"<html><body>
                <a href="https://example.com/pkg-2.0b1-py3-none-any.whl">beta</a>
            </body></html>"#,
        );

        let requirement: Requirement = "pkg".parse().unwrap();
        let result = finder.find_best_match(&requirement, None).await.unwrap();
        assert_eq!(result.best.unwrap().version, Some("2.0b1".parse().unwrap()));

        // With pre-releases explicitly disabled there is no fall-through.
        let no_pre = finder.with_allow_prereleases(Some(false));
        let result = no_pre.find_best_match(&requirement, None).await.unwrap();
        assert!(result.best.is_none());
        assert!(result.failure_reason().is_some());
    }

    #[tokio::test]
    async fn test_prerelease_not_taken_when_stable_exists() {
        let dir = tempfile::tempdir().unwrap();
        let finder = finder_for(
            dir.path(),
            r#"<html><body>
                <a href="https://example.com/pkg-1.0-py3-none-any.whl">stable</a>
                <a href="https://example.com/pkg-2.0b1-py3-none-any.whl">beta</a>
            </body></html>"#,
        );

        let requirement: Requirement = "pkg".parse().unwrap();
        let result = finder.find_best_match(&requirement, None).await.unwrap();
        assert_eq!(result.best.unwrap().version, Some("1.0".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_url_requirement_yields_direct_candidate() {
        let finder = PackageFinder::new(Session::new().unwrap());
        let requirement: Requirement =
            "pip @ https://example.com/pip-23.0.zip#sha256=00000000000000000000000000000000000000000000000000000000000000aa"
                .parse()
                .unwrap();
        let result = finder.find_best_match(&requirement, None).await.unwrap();
        let best = result.best.unwrap();
        assert_eq!(best.name.as_str(), "pip");
        assert_eq!(best.version, None);
        assert_eq!(
            best.link.url.as_str(),
            "https://example.com/pip-23.0.zip#sha256=00000000000000000000000000000000000000000000000000000000000000aa"
        );
    }

    #[tokio::test]
    async fn test_hash_allow_list_on_declared_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let finder = finder_for(
            dir.path(),
            r#"<html><body>
                <a href="https://example.com/pkg-1.0-py3-none-any.whl#sha256=00000000000000000000000000000000000000000000000000000000000000aa">good</a>
                <a href="https://example.com/pkg-2.0-py3-none-any.whl#sha256=00000000000000000000000000000000000000000000000000000000000000bb">bad</a>
            </body></html>"#,
        );

        let mut allowed = HashAllowList::default();
        allowed.add(
            crate::types::HashAlgorithm::Sha256,
            "00000000000000000000000000000000000000000000000000000000000000aa",
        );

        let requirement: Requirement = "pkg".parse().unwrap();
        let result = finder
            .find_best_match(&requirement, Some(&allowed))
            .await
            .unwrap();
        // 2.0 would win on version but its declared hash is not allowed.
        assert_eq!(result.best.unwrap().version, Some("1.0".parse().unwrap()));
        assert!(result
            .rejections
            .iter()
            .any(|r| matches!(r.reason, LinkMismatch::HashMismatch { .. })));
    }

    #[tokio::test]
    async fn test_source_order_breaks_ties() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs_err::create_dir(&first).unwrap();
        fs_err::create_dir(&second).unwrap();
        fs_err::write(first.join("bar-1.0.tar.gz"), b"first").unwrap();
        fs_err::write(second.join("bar-1.0.tar.gz"), b"second").unwrap();

        let mut finder = PackageFinder::new(Session::new().unwrap())
            .with_respect_source_order(true);
        finder.add_find_links(FindLinks::Path(fs_err::canonicalize(&first).unwrap()));
        finder.add_find_links(FindLinks::Path(fs_err::canonicalize(&second).unwrap()));

        let requirement: Requirement = "bar".parse().unwrap();
        let result = finder.find_best_match(&requirement, None).await.unwrap();
        let best = result.best.unwrap();
        assert!(best.link.url.path().contains("/first/"));
        assert_eq!(result.applicable.len(), 2);
    }
}
