//! Bitmap-font text
//!
//! Glyphs come from the 8x8 basic set; anything outside it draws as `?`.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

use crate::style::color_from_rgba;

/// Glyph cell edge in CSS pixels
pub const GLYPH_SIZE: f32 = 8.0;
/// Vertical advance between lines in CSS pixels
pub const LINE_HEIGHT: f32 = 10.0;

/// Greedy word wrap to at most `max_chars` columns. Words longer than a line
/// are broken.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        loop {
            let used = line.chars().count();
            let needed = if used == 0 { word.len() } else { used + 1 + word.len() };
            if needed <= max_chars {
                if used > 0 {
                    line.push(' ');
                }
                line.extend(word.iter());
                break;
            }
            if used > 0 {
                lines.push(std::mem::take(&mut line));
                continue;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Draw one line of text with its top-left corner at (`x`, `y`) in device
/// pixels. `scale` is device pixels per font pixel.
pub fn draw_line(pixmap: &mut Pixmap, text: &str, x: f32, y: f32, scale: f32, color: [u8; 4]) {
    let mut pb = PathBuilder::new();
    let mut cursor_x = x;
    for ch in text.chars() {
        let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'));
        if let Some(glyph) = glyph {
            for (row_idx, row) in glyph.iter().copied().enumerate() {
                for col_idx in 0..8u32 {
                    if (row >> col_idx) & 1 == 0 {
                        continue;
                    }
                    let px = cursor_x + col_idx as f32 * scale;
                    let py = y + row_idx as f32 * scale;
                    if let Some(cell) = Rect::from_xywh(px, py, scale, scale) {
                        pb.push_rect(cell);
                    }
                }
            }
        }
        cursor_x += GLYPH_SIZE * scale;
    }
    let Some(path) = pb.finish() else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color(color_from_rgba(color));
    paint.anti_alias = false;
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_on_words_and_breaks_long_ones() {
        assert_eq!(wrap("the quick brown fox", 10), vec!["the quick", "brown fox"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap("  spaced   out  ", 20), vec!["spaced out"]);
        assert!(wrap("", 5).is_empty());
    }

    #[test]
    fn draws_glyph_pixels() {
        let mut pixmap = Pixmap::new(16, 8).unwrap();
        draw_line(&mut pixmap, "I", 0.0, 0.0, 1.0, [0, 0, 0, 255]);
        let inked = pixmap.pixels().iter().filter(|p| p.alpha() > 0).count();
        assert!(inked > 0);
        // Nothing past the first cell
        let spill = (0..8u32)
            .filter_map(|y| pixmap.pixel(8, y))
            .filter(|p| p.alpha() > 0)
            .count();
        assert_eq!(spill, 0);
    }
}
