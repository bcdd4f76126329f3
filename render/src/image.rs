//! Image decoding for `<img>` boxes

use tiny_skia::{IntSize, Pixmap};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("png: {0}")]
    Png(#[from] png::DecodingError),
    #[error("unsupported color type {0:?}")]
    Unsupported(png::ColorType),
    #[error("image has no pixels")]
    Empty,
}

/// Decode PNG bytes into a premultiplied pixmap
pub fn decode_png(bytes: &[u8]) -> Result<Pixmap, DecodeError> {
    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    let data = &buf[..info.buffer_size()];

    let mut rgba: Vec<u8> = match info.color_type {
        png::ColorType::Rgba => data.to_vec(),
        png::ColorType::Rgb => data
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        png::ColorType::GrayscaleAlpha => data
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0], px[1]])
            .collect(),
        png::ColorType::Grayscale => data.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        other => return Err(DecodeError::Unsupported(other)),
    };
    premultiply(&mut rgba);

    let size = IntSize::from_wh(info.width, info.height).ok_or(DecodeError::Empty)?;
    Pixmap::from_vec(rgba, size).ok_or(DecodeError::Empty)
}

fn premultiply(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        for c in &mut px[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_rgb(width: u32, height: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out
    }

    #[test]
    fn decodes_rgb_to_opaque_pixmap() {
        let png = encode_rgb(2, 1, &[255, 0, 0, 0, 0, 255]);
        let pixmap = decode_png(&png).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (2, 1));
        let right = pixmap.pixel(1, 0).unwrap();
        assert_eq!((right.red(), right.blue(), right.alpha()), (0, 255, 255));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode_png(b"not a png"), Err(DecodeError::Png(_))));
    }

    #[test]
    fn premultiplies_alpha() {
        let mut px = [200, 100, 0, 128];
        premultiply(&mut px);
        assert_eq!(px, [100, 50, 0, 128]);
    }
}
