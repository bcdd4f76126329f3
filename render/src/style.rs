//! Inline style reading
//!
//! Only the handful of properties the rasterizer paints are understood:
//! `background`, `background-color`, `border-color`, `border-width` and `color`.

use postshot_core::{Document, NodeId};
use tiny_skia::Color;

/// Convert [u8; 4] RGBA array to tiny_skia Color
#[inline]
pub fn color_from_rgba(rgba: [u8; 4]) -> Color {
    Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3])
}

/// Parse a CSS color: `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb()`,
/// `rgba()` or a basic keyword.
pub fn parse_color(value: &str) -> Option<[u8; 4]> {
    let value = value.trim().to_ascii_lowercase();
    if let Some(hex) = value.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_rgb_args(args);
    }
    named_color(&value)
}

fn parse_hex(hex: &str) -> Option<[u8; 4]> {
    let nibble = |c: char| c.to_digit(16).map(|d| d as u8);
    let chars: Vec<char> = hex.chars().collect();
    match chars.len() {
        3 | 4 => {
            let mut out = [255u8; 4];
            for (i, c) in chars.iter().enumerate() {
                let n = nibble(*c)?;
                out[i] = n * 17;
            }
            Some(out)
        }
        6 | 8 => {
            let mut out = [255u8; 4];
            for (i, pair) in chars.chunks(2).enumerate() {
                out[i] = nibble(pair[0])? * 16 + nibble(pair[1])?;
            }
            Some(out)
        }
        _ => None,
    }
}

fn parse_rgb_args(args: &str) -> Option<[u8; 4]> {
    let parts: Vec<&str> = args
        .split([',', ' ', '/'])
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |s: &str| -> Option<u8> {
        match s.strip_suffix('%') {
            Some(pct) => pct.parse::<f32>().ok().map(|p| (p.clamp(0.0, 100.0) * 2.55).round() as u8),
            None => s.parse::<f32>().ok().map(|v| v.clamp(0.0, 255.0).round() as u8),
        }
    };
    let alpha = match parts.get(3) {
        Some(a) => match a.strip_suffix('%') {
            Some(pct) => (pct.parse::<f32>().ok()?.clamp(0.0, 100.0) * 2.55).round() as u8,
            None => (a.parse::<f32>().ok()?.clamp(0.0, 1.0) * 255.0).round() as u8,
        },
        None => 255,
    };
    Some([channel(parts[0])?, channel(parts[1])?, channel(parts[2])?, alpha])
}

fn named_color(name: &str) -> Option<[u8; 4]> {
    Some(match name {
        "transparent" => [0, 0, 0, 0],
        "black" => [0, 0, 0, 255],
        "white" => [255, 255, 255, 255],
        "red" => [255, 0, 0, 255],
        "green" => [0, 128, 0, 255],
        "blue" => [0, 0, 255, 255],
        "gray" | "grey" => [128, 128, 128, 255],
        "lightgray" | "lightgrey" => [211, 211, 211, 255],
        "navy" => [0, 0, 128, 255],
        "orange" => [255, 165, 0, 255],
        "yellow" => [255, 255, 0, 255],
        _ => return None,
    })
}

/// `property: value` pairs of an element's `style` attribute
pub fn declarations(style: &str) -> impl Iterator<Item = (String, &str)> {
    style.split(';').filter_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        Some((name.trim().to_ascii_lowercase(), value.trim()))
    })
}

/// Resolved paint properties of one element box
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoxStyle {
    pub background: Option<[u8; 4]>,
    pub border: Option<[u8; 4]>,
    pub border_width: f32,
}

impl BoxStyle {
    pub fn of(doc: &Document, node: NodeId) -> Self {
        let mut style = Self::default();
        let Some(inline) = doc.attribute(node, "style") else {
            return style;
        };
        for (name, value) in declarations(inline) {
            match name.as_str() {
                "background-color" => style.background = parse_color(value),
                // Shorthand: the first token that reads as a color wins
                "background" => {
                    style.background = parse_color(value)
                        .or_else(|| value.split_whitespace().find_map(parse_color));
                }
                "border-color" => style.border = parse_color(value),
                "border-width" => {
                    style.border_width = value
                        .trim_end_matches("px")
                        .trim()
                        .parse()
                        .unwrap_or(0.0);
                }
                _ => {}
            }
        }
        if style.border.is_some() && style.border_width == 0.0 {
            style.border_width = 1.0;
        }
        style
    }
}

/// Text color inherited through the ancestor chain; black by default
pub fn text_color(doc: &Document, node: NodeId) -> [u8; 4] {
    doc.ancestors_inclusive(node)
        .into_iter()
        .filter_map(|id| doc.attribute(id, "style"))
        .find_map(|inline| {
            declarations(inline)
                .filter(|(name, _)| name == "color")
                .find_map(|(_, value)| parse_color(value))
        })
        .unwrap_or([0, 0, 0, 255])
}
