//! Presentation panel
//!
//! The panel hosts the capture scratch area and shows the latest bitmap.
//! There is at most one per page: [`PanelRegistry`] constructs it on first
//! use and hands back the same panel afterwards.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::capture::{Bitmap, CaptureError, JobTicket, Progress, RasterError};
use crate::dom::{Document, DomError, NodeId, NodeSpec};
use crate::geometry::Rect;

/// `id` of the panel's root element
pub const PANEL_MARKER_ID: &str = "ts-menu";
/// Element handed to the rasterizer
pub const RENDER_WRAPPER_ID: &str = "ts-render-wrapper";
/// Where the normalized clone is mounted
pub const SCRATCH_ID: &str = "ts-render-wrapper-inner";
const RENDER_CONTAINER_ID: &str = "ts-render-container";
const OUTPUT_ID: &str = "ts-output-inner";
const PROGRESS_ID: &str = "ts-progress-element";

/// Document-space top edge of the scratch area, far outside anything the
/// page lays out
pub const SCRATCH_TOP: f64 = -100_000.0;

// ─────────────────────────────────────────────────────────────────────────────
// Clipboard
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("clipboard write failed: {0}")]
pub struct ClipboardError(pub String);

/// System clipboard access
pub trait Clipboard {
    fn write_image(&mut self, png: &[u8]) -> Result<(), ClipboardError>;
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ClipboardContent {
    #[default]
    Empty,
    Image(Vec<u8>),
    Text(String),
}

/// In-process clipboard holding the last write
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    pub content: ClipboardContent,
    pub writes: usize,
}

impl Clipboard for MemoryClipboard {
    fn write_image(&mut self, png: &[u8]) -> Result<(), ClipboardError> {
        self.content = ClipboardContent::Image(png.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.content = ClipboardContent::Text(text.to_string());
        self.writes += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors and status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("nothing has been captured yet")]
    NoOutput,
    #[error("panel markup is missing #{0}")]
    Incomplete(&'static str),
    #[error("failed to encode png: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
    #[error(transparent)]
    Dom(#[from] DomError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelStatus {
    Empty,
    Rendering,
    Ready,
    Failed(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Panel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PresentationPanel {
    root: NodeId,
    render_wrapper: NodeId,
    scratch: NodeId,
    output: NodeId,
    progress: NodeId,
    open: bool,
    bitmap: Option<Bitmap>,
    status: PanelStatus,
    next_job: u64,
    active_job: Option<JobTicket>,
    export_filename: String,
}

impl PresentationPanel {
    fn markup() -> NodeSpec {
        NodeSpec::new("div")
            .attr("id", PANEL_MARKER_ID)
            .child(
                NodeSpec::new("div").attr("id", RENDER_CONTAINER_ID).child(
                    NodeSpec::new("div").attr("class", "ts-scroller").child(
                        NodeSpec::new("div")
                            .attr("id", RENDER_WRAPPER_ID)
                            .child(NodeSpec::new("div").attr("id", SCRATCH_ID)),
                    ),
                ),
            )
            .child(
                NodeSpec::new("div").attr("class", "ts-menu-layout").child(
                    NodeSpec::new("div")
                        .attr("id", "ts-output-container")
                        .attr("class", "ts-card")
                        .child(NodeSpec::new("div").attr("id", OUTPUT_ID))
                        .child(NodeSpec::new("p").attr("id", PROGRESS_ID)),
                ),
            )
    }

    fn create(doc: &mut Document, export_filename: &str) -> Result<Self, PanelError> {
        let body = doc.body();
        let root = doc.build_node(&Self::markup(), body)?;
        debug!(%root, "panel created");
        Self::adopt(doc, root, export_filename)
    }

    /// Bind to panel markup already present in the page
    fn adopt(doc: &Document, root: NodeId, export_filename: &str) -> Result<Self, PanelError> {
        let find = |id: &'static str| doc.find_by_id(id).ok_or(PanelError::Incomplete(id));
        Ok(Self {
            root,
            render_wrapper: find(RENDER_WRAPPER_ID)?,
            scratch: find(SCRATCH_ID)?,
            output: find(OUTPUT_ID)?,
            progress: find(PROGRESS_ID)?,
            open: doc.element(root).is_some_and(|el| el.has_class("open")),
            bitmap: None,
            status: PanelStatus::Empty,
            next_job: 0,
            active_job: None,
            export_filename: export_filename.to_string(),
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The element the rasterizer paints
    pub fn render_root(&self) -> NodeId {
        self.render_wrapper
    }

    pub fn scratch(&self) -> NodeId {
        self.scratch
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn status(&self) -> &PanelStatus {
        &self.status
    }

    /// Bitmap currently displayed
    pub fn output(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref()
    }

    pub fn active_job(&self) -> Option<JobTicket> {
        self.active_job
    }

    pub fn export_filename(&self) -> &str {
        &self.export_filename
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Visibility
    // ─────────────────────────────────────────────────────────────────────────

    pub fn open(&mut self, doc: &mut Document) -> Result<(), PanelError> {
        doc.toggle_class(self.root, "open", true)?;
        self.open = true;
        Ok(())
    }

    /// Hide the panel. Output and scratch content are kept.
    pub fn close(&mut self, doc: &mut Document) -> Result<(), PanelError> {
        doc.toggle_class(self.root, "open", false)?;
        self.open = false;
        Ok(())
    }

    /// Returns the new open state
    pub fn toggle(&mut self, doc: &mut Document) -> Result<bool, PanelError> {
        if self.open {
            self.close(doc)?;
        } else {
            self.open(doc)?;
        }
        Ok(self.open)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Jobs
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a job. Any job started earlier can no longer finish.
    pub fn begin_job(&mut self, doc: &mut Document) -> Result<JobTicket, PanelError> {
        self.next_job += 1;
        let ticket = JobTicket(self.next_job);
        if let Some(previous) = self.active_job.replace(ticket) {
            warn!(%previous, %ticket, "capture superseded before finishing");
        }
        self.status = PanelStatus::Rendering;
        doc.set_text(self.progress, "")?;
        Ok(ticket)
    }

    /// Replace the scratch content with `clone` and size the render root to it.
    /// Returns the render root.
    pub fn mount(&mut self, doc: &mut Document, clone: &Document) -> Result<NodeId, PanelError> {
        doc.clear_children(self.scratch)?;
        let rect = clone
            .layout_rect(clone.root())
            .map(|r| Rect::new(SCRATCH_TOP, 0.0, r.width, r.height));
        doc.set_layout(self.render_wrapper, rect)?;
        doc.set_layout(self.scratch, rect)?;
        doc.import(clone, clone.root(), self.scratch)?;
        Ok(self.render_wrapper)
    }

    pub fn show_progress(&mut self, doc: &mut Document, progress: Progress) -> Result<(), PanelError> {
        if self.status == PanelStatus::Rendering {
            doc.set_text(self.progress, &progress.to_string())?;
        }
        Ok(())
    }

    /// Complete a job. Results from a superseded job are discarded. A failed
    /// job clears the previous bitmap.
    pub fn finish(
        &mut self,
        doc: &mut Document,
        ticket: JobTicket,
        result: Result<Bitmap, RasterError>,
    ) -> Result<(), CaptureError> {
        if self.active_job != Some(ticket) {
            warn!(%ticket, "discarding result of superseded capture");
            return Err(CaptureError::Superseded(ticket));
        }
        self.active_job = None;
        doc.clear_children(self.output)?;

        match result {
            Ok(bitmap) => {
                let canvas = doc.create_element("canvas");
                doc.set_attribute(canvas, "width", &bitmap.width.to_string())?;
                doc.set_attribute(canvas, "height", &bitmap.height.to_string())?;
                doc.append_child(self.output, canvas)?;
                doc.toggle_class(self.root, "failed", false)?;
                self.bitmap = Some(bitmap);
                self.status = PanelStatus::Ready;
            }
            Err(err) => self.show_failure(doc, err.to_string())?,
        }
        Ok(())
    }

    /// End a job that failed before anything was rasterized. Like a failed
    /// render, the previous bitmap is cleared.
    pub fn fail(
        &mut self,
        doc: &mut Document,
        ticket: JobTicket,
        reason: &str,
    ) -> Result<(), CaptureError> {
        if self.active_job != Some(ticket) {
            warn!(%ticket, "discarding failure of superseded capture");
            return Err(CaptureError::Superseded(ticket));
        }
        self.active_job = None;
        doc.clear_children(self.output)?;
        self.show_failure(doc, reason.to_string())?;
        Ok(())
    }

    fn show_failure(&mut self, doc: &mut Document, message: String) -> Result<(), DomError> {
        doc.set_text(self.progress, &format!("Capture failed: {message}"))?;
        doc.toggle_class(self.root, "failed", true)?;
        self.bitmap = None;
        self.status = PanelStatus::Failed(message);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export
    // ─────────────────────────────────────────────────────────────────────────

    fn encoded_output(&self) -> Result<Vec<u8>, PanelError> {
        let bitmap = self.bitmap.as_ref().ok_or(PanelError::NoOutput)?;
        Ok(bitmap.encode_png()?)
    }

    /// Write the displayed bitmap as PNG into `dir` under the export filename
    pub fn save(&self, dir: &Path) -> Result<PathBuf, PanelError> {
        let png = self.encoded_output()?;
        let path = dir.join(&self.export_filename);
        std::fs::write(&path, &png).map_err(|source| PanelError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), bytes = png.len(), "saved capture");
        Ok(path)
    }

    /// Copy the displayed bitmap to the clipboard as an image
    pub fn copy(&self, clipboard: &mut dyn Clipboard) -> Result<usize, PanelError> {
        let png = self.encoded_output()?;
        clipboard.write_image(&png)?;
        Ok(png.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Constructs the page's panel once and hands it back afterwards
#[derive(Debug)]
pub struct PanelRegistry {
    panel: Option<PresentationPanel>,
    export_filename: String,
    constructed: u32,
}

impl PanelRegistry {
    pub fn new(export_filename: impl Into<String>) -> Self {
        Self {
            panel: None,
            export_filename: export_filename.into(),
            constructed: 0,
        }
    }

    /// Return the panel, creating it on first call. Markup already present in
    /// the page (found by its marker id) is adopted rather than duplicated.
    pub fn ensure(&mut self, doc: &mut Document) -> Result<&mut PresentationPanel, PanelError> {
        let panel = match self.panel.take() {
            Some(panel) => panel,
            None => {
                let panel = match doc.find_by_id(PANEL_MARKER_ID) {
                    Some(root) => PresentationPanel::adopt(doc, root, &self.export_filename)?,
                    None => PresentationPanel::create(doc, &self.export_filename)?,
                };
                self.constructed += 1;
                panel
            }
        };
        Ok(self.panel.insert(panel))
    }

    pub fn get(&self) -> Option<&PresentationPanel> {
        self.panel.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut PresentationPanel> {
        self.panel.as_mut()
    }

    /// How many times a panel handle was constructed
    pub fn constructed(&self) -> u32 {
        self.constructed
    }

    /// Forget the panel (its document is gone)
    pub fn reset(&mut self) {
        self.panel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Selector;
    use crate::geometry::Viewport;

    fn doc() -> Document {
        Document::new(Viewport::default())
    }

    fn count_markers(doc: &Document) -> usize {
        let sel = Selector::parse("#ts-menu").unwrap();
        doc.query_all(doc.root(), &sel).len()
    }

    #[test]
    fn second_ensure_is_a_no_op() {
        let mut doc = doc();
        let mut registry = PanelRegistry::new("post.png");
        let first = registry.ensure(&mut doc).unwrap().root();
        let second = registry.ensure(&mut doc).unwrap().root();
        assert_eq!(first, second);
        assert_eq!(registry.constructed(), 1);
        assert_eq!(count_markers(&doc), 1);
    }

    #[test]
    fn existing_markup_is_adopted() {
        let mut doc = doc();
        let root = PanelRegistry::new("post.png").ensure(&mut doc).unwrap().root();

        let mut fresh = PanelRegistry::new("post.png");
        assert_eq!(fresh.ensure(&mut doc).unwrap().root(), root);
        assert_eq!(count_markers(&doc), 1);
    }

    #[test]
    fn close_keeps_scratch_and_output() {
        let mut doc = doc();
        let mut registry = PanelRegistry::new("post.png");
        let panel = registry.ensure(&mut doc).unwrap();
        let ticket = panel.begin_job(&mut doc).unwrap();
        panel
            .finish(&mut doc, ticket, Ok(Bitmap::filled(2, 2, [0, 0, 0, 255])))
            .unwrap();
        let marker = doc.create_element("span");
        doc.append_child(panel.scratch(), marker).unwrap();

        assert!(panel.toggle(&mut doc).unwrap());
        assert!(doc.element(panel.root()).unwrap().has_class("open"));
        assert!(!panel.toggle(&mut doc).unwrap());
        assert!(!doc.element(panel.root()).unwrap().has_class("open"));

        assert!(panel.output().is_some());
        assert_eq!(doc.children(panel.scratch()), &[marker]);
    }

    #[test]
    fn exports_without_output_fail() {
        let mut doc = doc();
        let mut registry = PanelRegistry::new("post.png");
        let panel = registry.ensure(&mut doc).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(panel.save(dir.path()), Err(PanelError::NoOutput)));
        let mut clipboard = MemoryClipboard::default();
        assert!(matches!(panel.copy(&mut clipboard), Err(PanelError::NoOutput)));
        assert_eq!(clipboard.writes, 0);
    }

    #[test]
    fn save_and_copy_export_png() {
        let mut doc = doc();
        let mut registry = PanelRegistry::new("post.png");
        let panel = registry.ensure(&mut doc).unwrap();
        let ticket = panel.begin_job(&mut doc).unwrap();
        panel
            .finish(&mut doc, ticket, Ok(Bitmap::filled(4, 3, [10, 20, 30, 255])))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = panel.save(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "post.png");
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");

        let mut clipboard = MemoryClipboard::default();
        let written = panel.copy(&mut clipboard).unwrap();
        assert_eq!(clipboard.content, ClipboardContent::Image(bytes.clone()));
        assert_eq!(written, bytes.len());
    }

    #[test]
    fn superseded_job_cannot_finish() {
        let mut doc = doc();
        let mut registry = PanelRegistry::new("post.png");
        let panel = registry.ensure(&mut doc).unwrap();
        let stale = panel.begin_job(&mut doc).unwrap();
        let current = panel.begin_job(&mut doc).unwrap();

        let err = panel
            .finish(&mut doc, stale, Ok(Bitmap::filled(1, 1, [0; 4])))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Superseded(t) if t == stale));
        assert!(panel.output().is_none());

        panel
            .finish(&mut doc, current, Ok(Bitmap::filled(5, 5, [0; 4])))
            .unwrap();
        assert_eq!(panel.output().map(|b| b.width), Some(5));
    }

    #[test]
    fn failure_drops_previous_bitmap_and_reports() {
        let mut doc = doc();
        let mut registry = PanelRegistry::new("post.png");
        let panel = registry.ensure(&mut doc).unwrap();
        let ok = panel.begin_job(&mut doc).unwrap();
        panel
            .finish(&mut doc, ok, Ok(Bitmap::filled(2, 2, [0; 4])))
            .unwrap();

        let failing = panel.begin_job(&mut doc).unwrap();
        let root = panel.render_root();
        panel
            .finish(&mut doc, failing, Err(RasterError::EmptyRoot(root)))
            .unwrap();

        assert!(panel.output().is_none());
        assert!(matches!(panel.status(), PanelStatus::Failed(_)));
        assert!(doc.element(panel.root()).unwrap().has_class("failed"));
        let progress = doc.find_by_id("ts-progress-element").unwrap();
        assert!(doc.text_content(progress).starts_with("Capture failed:"));
        let output = doc.find_by_id("ts-output-inner").unwrap();
        assert!(doc.children(output).is_empty());
    }
}
