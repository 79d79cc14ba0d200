//! Parsing of PEP 503 "simple" HTML pages into links.

use miette::Diagnostic;
use thiserror::Error;
use tl::HTMLTag;
use url::Url;

use crate::types::{parse_hash, DistInfoMetadata, Link, Yanked};

/// Error produced when a page cannot be parsed at all. Individual anchors
/// that do not resolve are skipped, not errors.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to parse HTML page: {0}")]
pub struct ParseHtmlError(String);

fn attribute<'a>(tag: &'a HTMLTag, name: &'a str) -> Option<std::borrow::Cow<'a, str>> {
    tag.attributes().get(name).flatten().map(|a| a.as_utf8_str())
}

fn into_link(base: &Url, page_url: &Url, tag: &HTMLTag) -> Option<Link> {
    let href = attribute(tag, "href")?;
    let url = base.join(href.as_ref()).ok()?;

    let hashes = url.fragment().and_then(parse_hash);

    let requires_python = attribute(tag, "data-requires-python")
        .filter(|value| !value.is_empty())
        .map(|value| html_escape::decode_html_entities(value.as_ref()).into_owned());

    // PEP 714 renamed the attribute; honor the new name first.
    let metadata_attr =
        attribute(tag, "data-core-metadata").or_else(|| attribute(tag, "data-dist-info-metadata"));
    let metadata = match metadata_attr.as_deref() {
        None => DistInfoMetadata::default(),
        Some("true") => DistInfoMetadata {
            available: true,
            hashes: Default::default(),
        },
        Some(value) => DistInfoMetadata {
            available: true,
            hashes: parse_hash(value).unwrap_or_default(),
        },
    };

    let yanked = match attribute(tag, "data-yanked") {
        None => Yanked::default(),
        Some(reason) => Yanked {
            yanked: true,
            reason: Some(reason.into_owned()),
        },
    };

    Some(Link {
        url,
        comes_from: Some(page_url.clone()),
        hashes,
        requires_python,
        yanked,
        metadata,
    })
}

/// Parses every anchor of a simple-index or find-links page into a [`Link`].
///
/// Hrefs resolve against the first `<base href>` when present and the page
/// URL otherwise. No judgement is passed on the link targets here; filtering
/// unusable links is the evaluator's concern.
pub fn parse_links_html(page_url: &Url, body: &str) -> Result<Vec<Link>, ParseHtmlError> {
    let dom = tl::parse(body, tl::ParserOptions::default())
        .map_err(|e| ParseHtmlError(e.to_string()))?;

    // Only the first <base> counts, per the HTML spec.
    let base = dom
        .query_selector("base[href]")
        .and_then(|mut nodes| nodes.next())
        .and_then(|handle| handle.get(dom.parser()))
        .and_then(|node| node.as_tag())
        .and_then(|tag| attribute(tag, "href"))
        .and_then(|href| page_url.join(href.as_ref()).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut links = Vec::new();
    if let Some(anchors) = dom.query_selector("a") {
        for anchor in anchors {
            let Some(tag) = anchor.get(dom.parser()).and_then(|node| node.as_tag()) else {
                continue;
            };
            if let Some(link) = into_link(&base, page_url, tag) {
                links.push(link);
            }
        }
    }

    Ok(links)
}
