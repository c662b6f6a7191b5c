//! Response classification and handlers.
//!
//! A response is routed by its final URL into a [`ResponseKind`]; the
//! handler for that kind produces a summary record and the links worth
//! feeding back to the frontier. Site-specific record extraction plugs in
//! here; the stock handlers only differ in which links they keep.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::pipeline::{FetchedPage, PageRecord};
use crate::wire::types::TOPIC_LINK_MARKER;

/// Typed sum of the page families the crawl produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResponseKind {
    /// Trending-feed pages seeded by the hot seeder.
    Trending,
    /// Topic index pages.
    Topic,
    /// User profile / timeline pages.
    Profile,
    /// Anything else the crawl wandered into.
    Other,
}

static TRENDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"containerid=102803").expect("trending pattern"));
static PROFILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/u/\d+").expect("profile pattern"));

impl ResponseKind {
    #[must_use]
    pub fn classify(final_url: &str) -> Self {
        if final_url.contains(TOPIC_LINK_MARKER) {
            ResponseKind::Topic
        } else if TRENDING_RE.is_match(final_url) {
            ResponseKind::Trending
        } else if PROFILE_RE.is_match(final_url) {
            ResponseKind::Profile
        } else {
            ResponseKind::Other
        }
    }
}

/// What one handler invocation produced.
pub struct HandlerOutput {
    pub record: PageRecord,
    pub links: Vec<String>,
}

/// Dispatch to the handler for `kind`.
pub fn route(kind: ResponseKind, page: &FetchedPage) -> HandlerOutput {
    let links = match kind {
        // Index-style pages are link farms: keep everything.
        ResponseKind::Trending | ResponseKind::Topic => extract_links(&page.body),
        // Profile pages mostly link to themselves with paging params;
        // keep only other profiles and topic entry points.
        ResponseKind::Profile => extract_links(&page.body)
            .into_iter()
            .filter(|l| PROFILE_RE.is_match(l) || l.contains(TOPIC_LINK_MARKER))
            .collect(),
        ResponseKind::Other => Vec::new(),
    };
    debug!("{kind:?} page {} yielded {} links", page.url, links.len());

    HandlerOutput {
        record: PageRecord {
            kind,
            url: page.url.clone(),
            final_url: page.final_url.clone(),
            status: page.status,
            body_bytes: page.body.len(),
            links_found: links.len(),
            fetched_at: page.fetched_at,
        },
        links,
    }
}

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\\]+"#).expect("href pattern"));

/// Pull absolute http(s) URLs out of a body. Works on both HTML and the
/// JSON feed endpoints; trailing punctuation is trimmed and anything the
/// URL parser rejects is discarded.
pub fn extract_links(body: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for m in HREF_RE.find_iter(body) {
        let link = m.as_str().trim_end_matches([',', '.', ')', ';']).to_string();
        if Url::parse(&link).is_err() {
            continue;
        }
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page(url: &str, body: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            body: body.to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn classification_by_final_url() {
        assert_eq!(
            ResponseKind::classify("https://m.weibo.cn/p/100808ff/super_index"),
            ResponseKind::Topic
        );
        assert_eq!(
            ResponseKind::classify("https://m.weibo.cn/api/container/getIndex?containerid=102803"),
            ResponseKind::Trending
        );
        assert_eq!(
            ResponseKind::classify("https://m.weibo.cn/u/123456"),
            ResponseKind::Profile
        );
        assert_eq!(
            ResponseKind::classify("https://example.com/"),
            ResponseKind::Other
        );
    }

    #[test]
    fn extract_links_dedupes_and_trims() {
        let body = r#"{"a": "https://m.weibo.cn/u/1", "b": "https://m.weibo.cn/u/1",
            "c": "see https://m.weibo.cn/u/2."}"#;
        let links = extract_links(body);
        assert_eq!(
            links,
            vec!["https://m.weibo.cn/u/1", "https://m.weibo.cn/u/2"]
        );
    }

    #[test]
    fn profile_pages_keep_only_crawlable_links() {
        let body = r#"<a href="https://m.weibo.cn/u/99">x</a>
            <a href="https://cdn.example.com/img.jpg">y</a>
            <a href="https://m.weibo.cn/p/100808aa/index">z</a>"#;
        let out = route(ResponseKind::Profile, &page("https://m.weibo.cn/u/1", body));
        assert_eq!(out.links.len(), 2);
        assert_eq!(out.record.links_found, 2);
    }

    #[test]
    fn other_pages_yield_no_links() {
        let out = route(
            ResponseKind::Other,
            &page("https://example.com", "https://example.com/more"),
        );
        assert!(out.links.is_empty());
        assert_eq!(out.record.kind, ResponseKind::Other);
    }
}
