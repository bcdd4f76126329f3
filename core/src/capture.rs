//! Capture pipeline
//!
//! One run takes a live element to a bitmap on the presentation panel:
//! clone, normalize, mount the clone in the panel's off-screen scratch area,
//! rasterize, hand the bitmap to the panel. Normalization (including every
//! awaited fetch) completes before rasterization starts.
//!
//! A run borrows the document and the panel exclusively for its whole
//! duration, so two runs can never interleave on one panel. Job tickets
//! additionally let the panel reject a result from a job it has since
//! replaced.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use postshot_types::CaptureSettings;
use postshot_types::formatting::format_progress;
use tracing::{error, info, warn};
use url::Url;

use crate::dom::{Document, DomError, NodeId};
use crate::normalize::{BlobStore, NormalizeReport, Normalizer, ResourceFetcher};
use crate::panel::{PanelError, PresentationPanel};

// ─────────────────────────────────────────────────────────────────────────────
// Bitmap
// ─────────────────────────────────────────────────────────────────────────────

/// RGBA8 pixels, row-major, unpremultiplied
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

impl Bitmap {
    /// A bitmap filled with one color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            rgba: rgba.repeat(pixels),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.rgba.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Encode as PNG
    pub fn encode_png(&self) -> Result<Vec<u8>, png::EncodingError> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.rgba)?;
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    /// Deferred resources are being fetched
    Fetching,
    /// The rasterizer is painting nodes
    Rendering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: CapturePhase,
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn rendering(completed: usize, total: usize) -> Self {
        Self {
            phase: CapturePhase::Rendering,
            completed,
            total,
        }
    }

    pub fn fetching(completed: usize, total: usize) -> Self {
        Self {
            phase: CapturePhase::Fetching,
            completed,
            total,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_progress(self.completed, self.total))
    }
}

/// Latest-wins progress cell shared between a running job and whoever
/// displays it. Publishing overwrites; readers only ever see the newest pair.
#[derive(Debug, Clone, Default)]
pub struct ProgressSlot {
    latest: Rc<Cell<Option<Progress>>>,
    published: Rc<Cell<u64>>,
}

impl ProgressSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, progress: Progress) {
        self.latest.set(Some(progress));
        self.published.set(self.published.get() + 1);
    }

    /// Newest pair without consuming it
    pub fn latest(&self) -> Option<Progress> {
        self.latest.get()
    }

    /// Take the newest pair, leaving the slot empty until the next publish
    pub fn take(&self) -> Option<Progress> {
        self.latest.take()
    }

    /// How many pairs were published in total
    pub fn published(&self) -> u64 {
        self.published.get()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rasterizer capability
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RasterError {
    #[error("{0} has no laid-out area to paint")]
    EmptyRoot(NodeId),
    #[error("bitmap of {width}x{height} exceeds the supported size")]
    TooLarge { width: u32, height: u32 },
    #[error("rasterizer backend failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Dom(#[from] DomError),
}

/// Turns a laid-out subtree into pixels. `blobs` resolves `blob:` image sources.
#[async_trait(?Send)]
pub trait Rasterizer {
    async fn rasterize(
        &self,
        doc: &Document,
        root: NodeId,
        blobs: &BlobStore,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Bitmap, RasterError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Identifies one capture job on a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobTicket(pub(crate) u64);

impl fmt::Display for JobTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error("rasterization failed: {0}")]
    Raster(#[from] RasterError),
    #[error("{0} was superseded by a newer capture")]
    Superseded(JobTicket),
    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// What a finished run produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    pub job: JobTicket,
    pub width: u32,
    pub height: u32,
    pub normalize: NormalizeReport,
}

pub struct CapturePipeline<F, R> {
    fetcher: F,
    rasterizer: R,
    settings: CaptureSettings,
    base_url: Option<Url>,
    progress: ProgressSlot,
}

impl<F: ResourceFetcher, R: Rasterizer> CapturePipeline<F, R> {
    pub fn new(fetcher: F, rasterizer: R, settings: CaptureSettings) -> Self {
        Self {
            fetcher,
            rasterizer,
            settings,
            base_url: None,
            progress: ProgressSlot::new(),
        }
    }

    /// Base URL for relative image candidates (the live page's address)
    pub fn set_base_url(&mut self, base: Option<Url>) {
        self.base_url = base;
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    /// Slot the running job publishes progress into
    pub fn progress(&self) -> ProgressSlot {
        self.progress.clone()
    }

    /// Capture `element` from the live page onto `panel`.
    ///
    /// Any failure once the job has started is fatal: the panel drops any
    /// previous bitmap and shows a failed status, and the error is returned.
    pub async fn run(
        &self,
        doc: &mut Document,
        panel: &mut PresentationPanel,
        element: NodeId,
    ) -> Result<CaptureSummary, CaptureError> {
        let ticket = panel.begin_job(doc)?;
        let (render_root, mut blobs, report) = match self.prepare(doc, panel, element).await {
            Ok(prepared) => prepared,
            Err(err) => {
                error!(%ticket, error = %err, "capture failed before rendering");
                panel.fail(doc, ticket, &err.to_string())?;
                return Err(err);
            }
        };

        let slot = self.progress.clone();
        let result = self
            .rasterizer
            .rasterize(doc, render_root, &blobs, &mut |p| slot.publish(p))
            .await;
        blobs.revoke_all();
        if let Some(latest) = self.progress.latest()
            && let Err(err) = panel.show_progress(doc, latest)
        {
            warn!(%ticket, error = %err, "progress update failed");
        }

        match result {
            Ok(bitmap) => {
                let (width, height) = (bitmap.width, bitmap.height);
                panel.finish(doc, ticket, Ok(bitmap))?;
                info!(%ticket, width, height, "capture complete");
                Ok(CaptureSummary {
                    job: ticket,
                    width,
                    height,
                    normalize: report,
                })
            }
            Err(err) => {
                error!(%ticket, error = %err, "capture failed");
                panel.finish(doc, ticket, Err(err.clone()))?;
                Err(CaptureError::Raster(err))
            }
        }
    }

    /// Clone, normalize and mount `element`. Returns the render root, the
    /// blobs the clone points at and what normalization did.
    async fn prepare(
        &self,
        doc: &mut Document,
        panel: &mut PresentationPanel,
        element: NodeId,
    ) -> Result<(NodeId, BlobStore, NormalizeReport), CaptureError> {
        let mut clone = doc.clone_subtree(element)?;
        let mut blobs = BlobStore::new();

        let mut normalizer = Normalizer::new(&self.fetcher, &self.settings);
        if let Some(base) = &self.base_url {
            normalizer = normalizer.with_base_url(base.clone());
        }
        let slot = self.progress.clone();
        let report = normalizer
            .normalize(doc, &mut clone, &mut blobs, &mut |completed, total| {
                slot.publish(Progress::fetching(completed, total))
            })
            .await?;

        let render_root = panel.mount(doc, &clone)?;
        Ok((render_root, blobs, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_slot_keeps_only_latest() {
        let slot = ProgressSlot::new();
        let writer = slot.clone();
        for i in 1..=50 {
            writer.publish(Progress::rendering(i, 50));
        }
        assert_eq!(slot.published(), 50);
        assert_eq!(slot.take(), Some(Progress::rendering(50, 50)));
        assert_eq!(slot.take(), None);
        assert_eq!(Progress::rendering(3, 7).to_string(), "3/7");
    }

    #[test]
    fn bitmap_encodes_png() {
        let bitmap = Bitmap::filled(3, 2, [255, 0, 0, 255]);
        assert_eq!(bitmap.pixel(2, 1), Some([255, 0, 0, 255]));
        assert_eq!(bitmap.pixel(3, 0), None);
        let png = bitmap.encode_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
