//! Link collection: turning configured sources into a deduplicated stream of
//! candidate links for a project.

use futures::future::join_all;
use miette::Diagnostic;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::index::html::{parse_links_html, ParseHtmlError};
use crate::index::session::{Session, SessionError};
use crate::types::{Link, NormalizedPackageName, ProjectInfo, SDistFormat};
use crate::utils::normalize_index_url;

/// The Accept header sent to index pages: prefer the PEP 691 JSON form when
/// the server offers both representations.
const INDEX_ACCEPT: &str = "application/vnd.pypi.simple.v1+json, \
     application/vnd.pypi.simple.v1+html; q=0.1, text/html; q=0.01";

/// A place the finder looks for links.
#[derive(Debug, Clone)]
pub enum Source {
    /// A PEP 503 / PEP 691 index queried per project name.
    Index(Url),
    /// A name-agnostic flat page or local location.
    FindLinks(FindLinks),
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Index(url) => write!(f, "index {url}"),
            Source::FindLinks(FindLinks::Page(url)) => write!(f, "find-links page {url}"),
            Source::FindLinks(FindLinks::Path(path)) => {
                write!(f, "find-links path {}", path.display())
            }
        }
    }
}

/// A find-links location: either a page URL or a local path (a directory of
/// artifacts or an HTML file).
#[derive(Debug, Clone)]
pub enum FindLinks {
    /// A remote flat page.
    Page(Url),
    /// A local file or directory.
    Path(PathBuf),
}

impl FromStr for FindLinks {
    type Err = CollectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = Path::new(s);
        if path.exists() {
            let absolute = fs_err::canonicalize(path).map_err(|source| CollectError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(FindLinks::Path(absolute));
        }
        if s.contains("://") {
            let url = Url::parse(s).map_err(|_| CollectError::InvalidFindLinks(s.to_string()))?;
            return Ok(FindLinks::Page(url));
        }
        Err(CollectError::InvalidFindLinks(s.to_string()))
    }
}

/// A failure to collect links from a single source.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum CollectError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error("{url} returned unsupported content type '{content_type}'")]
    UnsupportedContentType { url: Url, content_type: String },

    #[error("failed to parse JSON index page {url}: {source}")]
    Json {
        url: Url,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse HTML page {url}: {source}")]
    Html {
        url: Url,
        #[source]
        source: ParseHtmlError,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("find-links location '{0}' is neither an existing path nor a URL")]
    InvalidFindLinks(String),
}

/// Raised when no source produced links because every source failed.
#[derive(Debug, Error, Diagnostic)]
#[error("every source failed while collecting links ({} failures)", errors.len())]
pub struct AllSourcesFailed {
    /// The individual per-source failures.
    #[related]
    pub errors: Vec<CollectError>,
}

/// The result of collecting links for one project.
#[derive(Debug, Default)]
pub struct CollectedLinks {
    /// Links grouped per source, in configuration order, deduplicated by
    /// normalized URL across all sources (first occurrence wins).
    pub by_source: Vec<Vec<Link>>,
    /// Sources that failed; already logged, kept for diagnostics.
    pub errors: Vec<CollectError>,
}

impl CollectedLinks {
    /// All collected links in source order.
    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.by_source.iter().flatten()
    }
}

/// Collects every link for `name` from the given sources.
///
/// Sources are fetched concurrently but their results keep configuration
/// order, so ranking ties resolve deterministically. A failing source is
/// demoted to a warning unless every source failed.
pub async fn collect_links(
    session: &Session,
    sources: &[Source],
    name: &NormalizedPackageName,
) -> Result<CollectedLinks, AllSourcesFailed> {
    let fetches = sources
        .iter()
        .map(|source| collect_source(session, source, name));
    let results = join_all(fetches).await;

    let mut collected = CollectedLinks::default();
    let mut seen: HashSet<Url> = HashSet::new();
    let mut failures = 0usize;
    for (source, result) in sources.iter().zip(results) {
        match result {
            Ok(links) => {
                let fresh: Vec<Link> = links
                    .into_iter()
                    .filter(|link| seen.insert(link.normalized_url()))
                    .collect();
                tracing::debug!("collected {} links from {source}", fresh.len());
                collected.by_source.push(fresh);
            }
            Err(err) => {
                tracing::warn!("failed to collect links from {source}: {err}");
                failures += 1;
                collected.by_source.push(Vec::new());
                collected.errors.push(err);
            }
        }
    }

    if failures > 0 && failures == sources.len() {
        return Err(AllSourcesFailed {
            errors: collected.errors,
        });
    }
    Ok(collected)
}

async fn collect_source(
    session: &Session,
    source: &Source,
    name: &NormalizedPackageName,
) -> Result<Vec<Link>, CollectError> {
    match source {
        Source::Index(index_url) => {
            // The trailing slash matters: without it indexes redirect or 404.
            let page_url = normalize_index_url(index_url.clone())
                .join(&format!("{}/", name.as_str()))
                .expect("a normalized index URL accepts a name segment");
            fetch_page(session, &page_url).await
        }
        Source::FindLinks(FindLinks::Page(url)) => {
            let link = Link::new(url.clone());
            if is_archive_file(&link.filename()) {
                // The location is an artifact itself, not a page of links.
                return Ok(vec![link]);
            }
            fetch_page(session, url).await
        }
        Source::FindLinks(FindLinks::Path(path)) => collect_from_path(session, path, name).await,
    }
}

/// Fetches an index or find-links page and parses it according to the
/// content type the server chose.
async fn fetch_page(session: &Session, page_url: &Url) -> Result<Vec<Link>, CollectError> {
    let response = session.get(page_url, &[("accept", INDEX_ACCEPT)]).await?;

    let content_type = response
        .content_type
        .as_deref()
        .unwrap_or("text/html")
        .parse::<mime::Mime>()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|_| "text/html".to_string());

    let body = String::from_utf8_lossy(&response.body);
    match content_type.as_str() {
        "application/vnd.pypi.simple.v1+json" | "application/json" => {
            let info: ProjectInfo =
                serde_json::from_str(&body).map_err(|source| CollectError::Json {
                    url: response.final_url.clone(),
                    source,
                })?;
            Ok(info
                .files
                .into_iter()
                .filter_map(|file| file.into_link(&response.final_url))
                .collect())
        }
        "application/vnd.pypi.simple.v1+html" | "text/html" => {
            parse_links_html(&response.final_url, &body).map_err(|source| CollectError::Html {
                url: response.final_url.clone(),
                source,
            })
        }
        other => Err(CollectError::UnsupportedContentType {
            url: response.final_url.clone(),
            content_type: other.to_string(),
        }),
    }
}

/// Collects links from a local find-links path.
///
/// A file is either parsed as an HTML page or taken as an artifact link. For
/// a directory every regular file becomes a link, HTML files expand into
/// pages, and a subdirectory matching the queried project name is enumerated
/// one level deep so checked-out source trees next to archives are found.
async fn collect_from_path(
    session: &Session,
    path: &Path,
    name: &NormalizedPackageName,
) -> Result<Vec<Link>, CollectError> {
    if path.is_file() {
        return collect_from_file(session, path).await;
    }

    let mut links = Vec::new();
    for entry in sorted_dir(path)? {
        if entry.is_file() {
            links.extend(collect_from_file(session, &entry).await?);
        } else if entry.is_dir() && directory_matches_name(&entry, name) {
            for nested in sorted_dir(&entry)? {
                if nested.is_file() {
                    if let Some(link) = Link::from_path(&nested) {
                        links.push(link);
                    }
                }
            }
        }
    }
    Ok(links)
}

async fn collect_from_file(session: &Session, path: &Path) -> Result<Vec<Link>, CollectError> {
    let is_html = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("html") | Some("htm")
    );
    let Some(link) = Link::from_path(path) else {
        return Ok(Vec::new());
    };
    if is_html {
        fetch_page(session, &link.url).await
    } else {
        Ok(vec![link])
    }
}

/// Directory entries sorted by name so collection order does not depend on
/// filesystem iteration order.
fn sorted_dir(path: &Path) -> Result<Vec<PathBuf>, CollectError> {
    let entries = fs_err::read_dir(path).map_err(|source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    Ok(paths)
}

fn directory_matches_name(path: &Path, name: &NormalizedPackageName) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse::<NormalizedPackageName>().ok())
        .map_or(false, |dir_name| &dir_name == name)
}

fn is_archive_file(filename: &str) -> bool {
    filename.ends_with(".whl") || SDistFormat::split_extension(filename).is_some()
}
