//! Resource normalizer
//!
//! Rewrites a detached clone so it renders without the live page:
//!
//! - `use[href^="#"]` references are replaced by a copy of the definition
//!   they point at in the live document
//! - `img[srcset]` gets one candidate fetched into a [`BlobStore`] and its
//!   `src` pointed at the blob; `srcset` is dropped once the fetch succeeds
//! - `time[datetime]` text is frozen to a fixed date format
//!
//! Fetch failures are best-effort: the image keeps its original attributes
//! and the failure is logged and counted. Running the normalizer over its own
//! output changes nothing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use postshot_types::{CaptureSettings, SourceSelection};
use tracing::{debug, warn};
use url::Url;

use crate::dom::{Document, DomError, NodeId};

// ─────────────────────────────────────────────────────────────────────────────
// Fetching
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
    #[error("no resource at `{0}`")]
    NotFound(String),
    #[error("`{url}` responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read `{url}`: {reason}")]
    Io { url: String, reason: String },
}

/// Bytes of a fetched resource
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Resource {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// Loads remote resources for the normalizer
#[async_trait(?Send)]
pub trait ResourceFetcher {
    async fn fetch(&self, url: &str) -> Result<Resource, FetchError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Blob URLs
// ─────────────────────────────────────────────────────────────────────────────

const BLOB_PREFIX: &str = "blob:postshot/";

/// Local, revocable object URLs for fetched resources
#[derive(Debug, Default)]
pub struct BlobStore {
    next: u64,
    blobs: BTreeMap<String, Resource>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a resource and return its `blob:` URL
    pub fn create(&mut self, resource: Resource) -> String {
        self.next += 1;
        let url = format!("{BLOB_PREFIX}{}", self.next);
        self.blobs.insert(url.clone(), resource);
        url
    }

    pub fn get(&self, url: &str) -> Option<&Resource> {
        self.blobs.get(url)
    }

    /// Returns true if the URL was live
    pub fn revoke(&mut self, url: &str) -> bool {
        self.blobs.remove(url).is_some()
    }

    pub fn revoke_all(&mut self) -> usize {
        let count = self.blobs.len();
        self.blobs.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn is_blob_url(url: &str) -> bool {
        url.starts_with(BLOB_PREFIX)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// srcset
// ─────────────────────────────────────────────────────────────────────────────

/// One `srcset` entry: URL plus its density (`2x`) or width (`640w`) descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct SrcCandidate {
    pub url: String,
    /// Descriptor value; a missing descriptor counts as `1x`
    pub size: f64,
}

/// Parse a `srcset` attribute. Malformed descriptors fall back to `1x`.
pub fn parse_srcset(srcset: &str) -> Vec<SrcCandidate> {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let url = parts.next()?.to_string();
            let size = parts
                .next()
                .and_then(|d| d.strip_suffix(['x', 'w']))
                .and_then(|n| n.parse::<f64>().ok())
                .unwrap_or(1.0);
            Some(SrcCandidate { url, size })
        })
        .collect()
}

/// Pick a candidate according to the selection policy.
///
/// `SecondHighest` on a single candidate returns that candidate.
pub fn choose_candidate(candidates: &[SrcCandidate], policy: SourceSelection) -> Option<&SrcCandidate> {
    let mut ranked: Vec<&SrcCandidate> = candidates.iter().collect();
    ranked.sort_by(|a, b| a.size.total_cmp(&b.size));
    match policy {
        SourceSelection::Highest => ranked.last().copied(),
        SourceSelection::Lowest => ranked.first().copied(),
        SourceSelection::SecondHighest => match ranked.len() {
            0 => None,
            1 => ranked.first().copied(),
            n => ranked.get(n - 2).copied(),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamps
// ─────────────────────────────────────────────────────────────────────────────

/// Format a `datetime` attribute value, accepting RFC 3339, a naive
/// date-time or a bare date.
pub fn format_timestamp(datetime: &str, format: &str) -> Option<String> {
    let value = datetime.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.format(format).to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.format(format).to_string());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.format(format).to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Normalizer
// ─────────────────────────────────────────────────────────────────────────────

/// What one normalization pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub graphics_inlined: usize,
    pub graphics_missing: usize,
    pub images_resolved: usize,
    pub images_failed: usize,
    pub timestamps_frozen: usize,
}

impl NormalizeReport {
    /// Deferred fetches attempted in this pass
    pub fn fetches(&self) -> usize {
        self.images_resolved + self.images_failed
    }
}

pub struct Normalizer<'a, F> {
    fetcher: &'a F,
    selection: SourceSelection,
    timestamp_format: String,
    /// Base for resolving relative candidate URLs
    base_url: Option<Url>,
}

/// Elements under the clone's root matching `tag` that carry `attr`,
/// optionally with a value prefix.
fn elements_with(doc: &Document, tag: &str, attr: &str, prefix: &str) -> Vec<NodeId> {
    let root = doc.root();
    std::iter::once(root)
        .chain(doc.descendants(root))
        .filter(|n| {
            doc.tag(*n) == Some(tag)
                && doc.attribute(*n, attr).is_some_and(|v| v.starts_with(prefix))
        })
        .collect()
}

impl<'a, F: ResourceFetcher> Normalizer<'a, F> {
    pub fn new(fetcher: &'a F, settings: &CaptureSettings) -> Self {
        Self {
            fetcher,
            selection: settings.source_selection,
            timestamp_format: settings.timestamp_format.clone(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    /// Normalize every node under `clone`'s root. `live` is the page the
    /// clone was taken from; graphic definitions are looked up there.
    ///
    /// `progress` receives `(completed, total)` as image fetches settle.
    pub async fn normalize(
        &self,
        live: &Document,
        clone: &mut Document,
        blobs: &mut BlobStore,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<NormalizeReport, DomError> {
        let mut report = NormalizeReport::default();
        self.inline_graphics(live, clone, &mut report)?;
        self.freeze_timestamps(clone, &mut report)?;
        self.resolve_images(clone, blobs, &mut report, progress)
            .await?;
        debug!(?report, "normalized clone");
        Ok(report)
    }

    fn inline_graphics(
        &self,
        live: &Document,
        clone: &mut Document,
        report: &mut NormalizeReport,
    ) -> Result<(), DomError> {
        for reference in elements_with(clone, "use", "href", "#") {
            let Some(id) = clone
                .attribute(reference, "href")
                .map(|href| href.trim_start_matches('#').to_string())
            else {
                continue;
            };
            let Some(definition) = live.find_by_id(&id) else {
                warn!(id = %id, "graphic definition not found; leaving reference");
                report.graphics_missing += 1;
                continue;
            };
            let copy = clone.import(live, definition, reference)?;
            clone.replace_with(reference, copy)?;
            report.graphics_inlined += 1;
        }
        Ok(())
    }

    fn freeze_timestamps(
        &self,
        clone: &mut Document,
        report: &mut NormalizeReport,
    ) -> Result<(), DomError> {
        for node in elements_with(clone, "time", "datetime", "") {
            let Some(datetime) = clone.attribute(node, "datetime").map(str::to_string) else {
                continue;
            };
            match format_timestamp(&datetime, &self.timestamp_format) {
                Some(text) => {
                    clone.set_text(node, &text)?;
                    report.timestamps_frozen += 1;
                }
                None => warn!(datetime = %datetime, "unparseable timestamp left as-is"),
            }
        }
        Ok(())
    }

    fn resolve_url(&self, candidate: &str) -> Result<String, FetchError> {
        match Url::parse(candidate) {
            Ok(url) => Ok(url.to_string()),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .as_ref()
                .and_then(|base| base.join(candidate).ok())
                .map(|u| u.to_string())
                .ok_or_else(|| FetchError::InvalidUrl(candidate.to_string())),
            Err(_) => Err(FetchError::InvalidUrl(candidate.to_string())),
        }
    }

    async fn resolve_images(
        &self,
        clone: &mut Document,
        blobs: &mut BlobStore,
        report: &mut NormalizeReport,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<(), DomError> {
        let mut requests: Vec<(NodeId, String)> = Vec::new();
        for image in elements_with(clone, "img", "srcset", "") {
            let srcset = clone.attribute(image, "srcset").unwrap_or_default();
            let candidates = parse_srcset(srcset);
            let Some(choice) = choose_candidate(&candidates, self.selection) else {
                continue;
            };
            requests.push((image, choice.url.clone()));
        }
        if requests.is_empty() {
            return Ok(());
        }

        let total = requests.len();
        progress(0, total);
        let mut pending: FuturesUnordered<_> = requests
            .into_iter()
            .map(|(image, candidate)| async move {
                let result = match self.resolve_url(&candidate) {
                    Ok(url) => self.fetcher.fetch(&url).await,
                    Err(err) => Err(err),
                };
                (image, candidate, result)
            })
            .collect();

        let mut completed = 0;
        while let Some((image, candidate, result)) = pending.next().await {
            completed += 1;
            match result {
                Ok(resource) => {
                    let blob = blobs.create(resource);
                    clone.remove_attribute(image, "srcset")?;
                    clone.set_attribute(image, "src", &blob)?;
                    report.images_resolved += 1;
                }
                Err(err) => {
                    warn!(url = %candidate, error = %err, "image fetch failed; keeping original source");
                    report.images_failed += 1;
                }
            }
            progress(completed, total);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::dom::{NodeSpec, PageSpec, Selector};
    use crate::geometry::Viewport;

    /// Serves canned bytes and records every request
    #[derive(Default)]
    struct CannedFetcher {
        resources: HashMap<String, Resource>,
        requested: RefCell<Vec<String>>,
    }

    impl CannedFetcher {
        fn with(mut self, url: &str, bytes: &[u8]) -> Self {
            self.resources
                .insert(url.to_string(), Resource::new(bytes.to_vec(), "image/png"));
            self
        }
    }

    #[async_trait(?Send)]
    impl ResourceFetcher for CannedFetcher {
        async fn fetch(&self, url: &str) -> Result<Resource, FetchError> {
            self.requested.borrow_mut().push(url.to_string());
            self.resources
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(url.to_string()))
        }
    }

    fn live_page() -> Document {
        PageSpec {
            viewport: Viewport::default(),
            body: vec![
                NodeSpec::new("svg").attr("id", "sprites").child(
                    NodeSpec::new("symbol")
                        .attr("id", "icon-like")
                        .child(NodeSpec::new("path").attr("d", "M0 0L1 1")),
                ),
                NodeSpec::new("article")
                    .attr("id", "post")
                    .rect(0.0, 0.0, 540.0, 400.0)
                    .child(
                        NodeSpec::new("svg")
                            .child(NodeSpec::new("use").attr("href", "#icon-like")),
                    )
                    .child(NodeSpec::new("use").attr("href", "#icon-missing"))
                    .child(
                        NodeSpec::new("img")
                            .attr("src", "https://media.example/a.png")
                            .attr(
                                "srcset",
                                "https://media.example/a.png 1x, https://media.example/b.png 2x, https://media.example/c.png 3x",
                            ),
                    )
                    .child(
                        NodeSpec::new("time")
                            .attr("datetime", "2023-03-05T10:00:00Z")
                            .text("2 hours ago"),
                    ),
            ],
        }
        .build()
        .unwrap()
    }

    fn settings() -> CaptureSettings {
        CaptureSettings::default()
    }

    #[test]
    fn srcset_parsing_and_policy() {
        let candidates = parse_srcset("a 1x, b 2x, c 3x");
        assert_eq!(candidates.len(), 3);
        let pick = |p| choose_candidate(&candidates, p).map(|c| c.url.as_str());
        assert_eq!(pick(SourceSelection::SecondHighest), Some("b"));
        assert_eq!(pick(SourceSelection::Highest), Some("c"));
        assert_eq!(pick(SourceSelection::Lowest), Some("a"));

        // Order in the attribute does not matter; width descriptors rank too
        let widths = parse_srcset("big 1280w,small 250w , mid 640w");
        assert_eq!(
            choose_candidate(&widths, SourceSelection::SecondHighest).map(|c| c.url.as_str()),
            Some("mid")
        );
        let single = parse_srcset("only.png");
        assert_eq!(
            choose_candidate(&single, SourceSelection::SecondHighest).map(|c| c.size),
            Some(1.0)
        );
        assert!(choose_candidate(&parse_srcset(" "), SourceSelection::Highest).is_none());
    }

    #[test]
    fn timestamps_accept_common_shapes() {
        assert_eq!(
            format_timestamp("2023-03-05T10:00:00Z", "%b %-d, %Y").as_deref(),
            Some("Mar 5, 2023")
        );
        assert_eq!(
            format_timestamp("2023-12-25", "%b %-d, %Y").as_deref(),
            Some("Dec 25, 2023")
        );
        assert!(format_timestamp("yesterday", "%b %-d, %Y").is_none());
    }

    #[test]
    fn blob_store_revokes() {
        let mut blobs = BlobStore::new();
        let url = blobs.create(Resource::new(vec![1, 2], "image/png"));
        assert!(BlobStore::is_blob_url(&url));
        assert_eq!(blobs.get(&url).map(|r| r.bytes.len()), Some(2));
        assert!(blobs.revoke(&url));
        assert!(!blobs.revoke(&url));
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn normalizes_clone_without_touching_live_page() {
        let live = live_page();
        let post = live.find_by_id("post").unwrap();
        let live_before = live.outer_html(post);
        let mut clone = live.clone_subtree(post).unwrap();

        let fetcher = CannedFetcher::default().with("https://media.example/b.png", b"bee");
        let mut blobs = BlobStore::new();
        let mut seen = Vec::new();
        let report = Normalizer::new(&fetcher, &settings())
            .normalize(&live, &mut clone, &mut blobs, &mut |c, t| seen.push((c, t)))
            .await
            .unwrap();

        assert_eq!(report.graphics_inlined, 1);
        assert_eq!(report.graphics_missing, 1);
        assert_eq!(report.images_resolved, 1);
        assert_eq!(report.timestamps_frozen, 1);
        assert_eq!(seen, vec![(0, 1), (1, 1)]);
        assert_eq!(*fetcher.requested.borrow(), vec!["https://media.example/b.png"]);

        let html = clone.outer_html(clone.root());
        assert!(html.contains("<symbol id=\"icon-like\"><path d=\"M0 0L1 1\"></path></symbol>"));
        assert!(html.contains("src=\"blob:postshot/1\""));
        assert!(!html.contains("srcset"));
        assert!(html.contains(">Mar 5, 2023</time>"));
        assert_eq!(blobs.get("blob:postshot/1").unwrap().bytes, b"bee");

        assert_eq!(live.outer_html(post), live_before);
    }

    #[tokio::test]
    async fn second_pass_is_byte_identical() {
        let live = live_page();
        let post = live.find_by_id("post").unwrap();
        let mut clone = live.clone_subtree(post).unwrap();
        let fetcher = CannedFetcher::default().with("https://media.example/b.png", b"bee");
        let mut blobs = BlobStore::new();
        let normalizer = Normalizer::new(&fetcher, &settings());

        normalizer
            .normalize(&live, &mut clone, &mut blobs, &mut |_, _| {})
            .await
            .unwrap();
        let first = clone.outer_html(clone.root());

        let report = normalizer
            .normalize(&live, &mut clone, &mut blobs, &mut |_, _| {})
            .await
            .unwrap();
        assert_eq!(clone.outer_html(clone.root()), first);
        assert_eq!(report.fetches(), 0);
        assert_eq!(report.graphics_inlined, 0);
        assert_eq!(fetcher.requested.borrow().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_best_effort() {
        let live = live_page();
        let post = live.find_by_id("post").unwrap();
        let mut clone = live.clone_subtree(post).unwrap();
        let fetcher = CannedFetcher::default();
        let mut blobs = BlobStore::new();

        let report = Normalizer::new(&fetcher, &settings())
            .normalize(&live, &mut clone, &mut blobs, &mut |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.images_failed, 1);
        assert_eq!(report.timestamps_frozen, 1);
        let img = clone
            .query(clone.root(), &Selector::parse("img").unwrap())
            .unwrap();
        assert_eq!(clone.attribute(img, "src"), Some("https://media.example/a.png"));
        assert!(clone.attribute(img, "srcset").is_some());
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn relative_candidates_resolve_against_base() {
        let mut live = Document::new(Viewport::default());
        let body = live.body();
        let post = live
            .build_node(
                &NodeSpec::new("article")
                    .child(NodeSpec::new("img").attr("srcset", "/s/small.png 1x, /s/large.png 2x")),
                body,
            )
            .unwrap();
        let mut clone = live.clone_subtree(post).unwrap();
        let fetcher = CannedFetcher::default().with("https://www.tumblr.com/s/small.png", b"s");
        let mut blobs = BlobStore::new();

        let report = Normalizer::new(&fetcher, &settings())
            .with_base_url(Url::parse("https://www.tumblr.com/blog/post/1").unwrap())
            .normalize(&live, &mut clone, &mut blobs, &mut |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.images_resolved, 1);
    }
}
