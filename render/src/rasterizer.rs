//! tiny-skia rasterizer
//!
//! Paints a laid-out subtree in document order: element boxes (background,
//! then border), `<img>` content, then text flowed inside the nearest
//! laid-out ancestor. The output covers exactly the root's rectangle.

use std::collections::HashMap;

use async_trait::async_trait;
use postshot_core::dom::NodeData;
use postshot_core::{Bitmap, BlobStore, Document, NodeId, Progress, RasterError, Rasterizer, Rect};
use postshot_types::CaptureSettings;
use tiny_skia::{FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform};
use tracing::debug;

use crate::image::decode_png;
use crate::style::{BoxStyle, color_from_rgba, text_color};
use crate::text::{GLYPH_SIZE, LINE_HEIGHT, draw_line, wrap};

/// Largest bitmap edge in device pixels
pub const MAX_DIMENSION: u32 = 16_384;
/// Inset of flowed text from its box edge, CSS pixels
const TEXT_INSET: f64 = 4.0;

const PLACEHOLDER_FILL: [u8; 4] = [221, 221, 221, 255];
const PLACEHOLDER_EDGE: [u8; 4] = [170, 170, 170, 255];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkiaRasterizer {
    pixel_ratio: f32,
    page_color: [u8; 4],
}

impl Default for SkiaRasterizer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SkiaRasterizer {
    pub fn new(pixel_ratio: f32) -> Self {
        let pixel_ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
            pixel_ratio
        } else {
            1.0
        };
        Self {
            pixel_ratio,
            page_color: [255, 255, 255, 255],
        }
    }

    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self::new(settings.pixel_ratio)
    }

    /// Color under every box, white by default
    pub fn with_page_color(mut self, rgba: [u8; 4]) -> Self {
        self.page_color = rgba;
        self
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn paint(
        &self,
        doc: &Document,
        root: NodeId,
        blobs: &BlobStore,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Bitmap, RasterError> {
        let origin = doc
            .layout_rect(root)
            .filter(|r| r.has_area())
            .ok_or(RasterError::EmptyRoot(root))?;
        let width = (origin.width as f32 * self.pixel_ratio).ceil() as u32;
        let height = (origin.height as f32 * self.pixel_ratio).ceil() as u32;
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(RasterError::TooLarge { width, height });
        }
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| RasterError::Backend(format!("cannot allocate {width}x{height}")))?;
        pixmap.fill(color_from_rgba(self.page_color));

        let mut canvas = Canvas {
            pixmap: &mut pixmap,
            origin,
            ratio: self.pixel_ratio,
            text_cursor: HashMap::new(),
        };
        let nodes: Vec<NodeId> = std::iter::once(root).chain(doc.descendants(root)).collect();
        let total = nodes.len();
        for (i, node) in nodes.into_iter().enumerate() {
            match doc.data(node) {
                Some(NodeData::Element(el)) => {
                    if let Some(rect) = doc.layout_rect(node) {
                        canvas.paint_box(&BoxStyle::of(doc, node), rect);
                        if el.tag == "img" {
                            canvas.paint_image(doc.attribute(node, "src"), blobs, rect);
                        }
                    }
                }
                Some(NodeData::Text(text)) => canvas.paint_text(doc, node, text),
                None => {}
            }
            progress(Progress::rendering(i + 1, total));
        }
        debug!(width, height, nodes = total, "rasterized");
        Ok(to_bitmap(&pixmap))
    }
}

#[async_trait(?Send)]
impl Rasterizer for SkiaRasterizer {
    async fn rasterize(
        &self,
        doc: &Document,
        root: NodeId,
        blobs: &BlobStore,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Bitmap, RasterError> {
        self.paint(doc, root, blobs, progress)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Painting
// ─────────────────────────────────────────────────────────────────────────────

struct Canvas<'a> {
    pixmap: &'a mut Pixmap,
    origin: Rect,
    ratio: f32,
    /// Next free text line per laid-out box, document space
    text_cursor: HashMap<NodeId, f64>,
}

impl Canvas<'_> {
    /// Document-space rectangle to device pixels
    fn device(&self, rect: Rect) -> Option<tiny_skia::Rect> {
        tiny_skia::Rect::from_xywh(
            ((rect.left - self.origin.left) as f32) * self.ratio,
            ((rect.top - self.origin.top) as f32) * self.ratio,
            rect.width as f32 * self.ratio,
            rect.height as f32 * self.ratio,
        )
    }

    fn fill(&mut self, rect: tiny_skia::Rect, rgba: [u8; 4]) {
        let mut paint = Paint::default();
        paint.set_color(color_from_rgba(rgba));
        paint.anti_alias = false;
        self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }

    fn stroke(&mut self, rect: tiny_skia::Rect, rgba: [u8; 4], width: f32) {
        let path = PathBuilder::from_rect(rect);
        let mut paint = Paint::default();
        paint.set_color(color_from_rgba(rgba));
        let stroke = Stroke {
            width: width * self.ratio,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }

    fn paint_box(&mut self, style: &BoxStyle, rect: Rect) {
        let Some(device) = self.device(rect) else {
            return;
        };
        if let Some(bg) = style.background {
            self.fill(device, bg);
        }
        if let Some(border) = style.border {
            self.stroke(device, border, style.border_width);
        }
    }

    fn paint_image(&mut self, src: Option<&str>, blobs: &BlobStore, rect: Rect) {
        let Some(device) = self.device(rect) else {
            return;
        };
        let decoded = src
            .and_then(|src| blobs.get(src))
            .map(|resource| decode_png(&resource.bytes));
        match decoded {
            Some(Ok(image)) => {
                let transform = Transform::from_row(
                    device.width() / image.width() as f32,
                    0.0,
                    0.0,
                    device.height() / image.height() as f32,
                    device.x(),
                    device.y(),
                );
                let paint = PixmapPaint {
                    quality: FilterQuality::Bilinear,
                    ..PixmapPaint::default()
                };
                self.pixmap
                    .draw_pixmap(0, 0, image.as_ref(), &paint, transform, None);
            }
            other => {
                if let Some(Err(err)) = other {
                    debug!(src = src.unwrap_or_default(), error = %err, "undecodable image");
                }
                self.fill(device, PLACEHOLDER_FILL);
                self.stroke(device, PLACEHOLDER_EDGE, 1.0);
            }
        }
    }

    fn paint_text(&mut self, doc: &Document, node: NodeId, text: &str) {
        let Some((container, rect)) = doc
            .ancestors_inclusive(node)
            .into_iter()
            .skip(1)
            .find_map(|id| doc.layout_rect(id).map(|r| (id, r)))
        else {
            return;
        };
        let columns = ((rect.width - 2.0 * TEXT_INSET) / GLYPH_SIZE as f64).floor();
        if columns < 1.0 {
            return;
        }
        let color = text_color(doc, node);
        let cursor = self
            .text_cursor
            .entry(container)
            .or_insert(rect.top + TEXT_INSET);
        let mut y = *cursor;
        for line in wrap(text, columns as usize) {
            if y + GLYPH_SIZE as f64 > rect.bottom() {
                break;
            }
            let x = ((rect.left + TEXT_INSET - self.origin.left) as f32) * self.ratio;
            let dy = ((y - self.origin.top) as f32) * self.ratio;
            draw_line(self.pixmap, &line, x, dy, self.ratio, color);
            y += LINE_HEIGHT as f64;
        }
        self.text_cursor.insert(container, y);
    }
}

fn to_bitmap(pixmap: &Pixmap) -> Bitmap {
    let rgba = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    Bitmap {
        width: pixmap.width(),
        height: pixmap.height(),
        rgba,
    }
}
