//! Rasterization for postshot captures
//!
//! [`SkiaRasterizer`] implements the core `Rasterizer` capability with
//! tiny-skia. Boxes, PNG images and 8x8 bitmap-font text are painted; layout
//! comes entirely from the document's rectangles.

pub mod image;
pub mod rasterizer;
pub mod style;
pub mod text;

pub use image::{DecodeError, decode_png};
pub use rasterizer::{MAX_DIMENSION, SkiaRasterizer};
pub use style::{BoxStyle, parse_color};
