//! Rectangles, the viewport, and the visibility filter.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    #[inline]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// Same size, moved by the given offsets
    pub fn translated(&self, dy: f64, dx: f64) -> Self {
        Self {
            top: self.top + dy,
            left: self.left + dx,
            ..*self
        }
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// The browser viewport: its size and the current scroll offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

/// Whether a client-space rectangle overlaps the viewport vertically.
///
/// The horizontal axis is ignored: the host layout is a single column.
#[inline]
pub fn is_visible(rect: &Rect, viewport_height: f64) -> bool {
    rect.bottom() >= 0.0 && rect.top < viewport_height
}

/// Strict intersection test used by intersection observers: an element that
/// only touches the viewport edge does not intersect.
#[inline]
pub fn intersects_viewport(rect: &Rect, viewport_height: f64) -> bool {
    rect.bottom() > 0.0 && rect.top < viewport_height
}
