use base64::Engine as _;
use base64::engine::general_purpose;
use image::codecs::jpeg::JpegEncoder;
use tracing::warn;

const START_QUALITY: u8 = 85;
const MIN_QUALITY: u8 = 30;
const QUALITY_STEP: u8 = 10;

#[derive(Debug, Clone, Copy)]
pub struct PhotoLimits {
    /// Longest side of the thumbnail, in pixels.
    pub max_dimension: u32,
    /// Upper bound on the encoded JPEG size.
    pub max_bytes: usize,
}

/// Decodes an embedded portal photo and re-encodes it as a bounded JPEG
/// thumbnail. Failures are logged and yield `None`.
pub fn process_photo(encoded: &str, limits: PhotoLimits) -> Option<Vec<u8>> {
    let raw = match decode_base64(encoded) {
        Some(raw) => raw,
        None => {
            warn!("Photo is not valid base64, skipping");
            return None;
        }
    };

    match thumbnail_jpeg(&raw, limits) {
        Ok(Some(jpeg)) => Some(jpeg),
        Ok(None) => {
            warn!(max_bytes = limits.max_bytes, "Photo cannot fit the size cap, skipping");
            None
        }
        Err(e) => {
            warn!(error = %e, "Photo conversion failed, skipping");
            None
        }
    }
}

fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    let data = encoded.trim();
    // data:image/png;base64,....
    let data = match data.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    general_purpose::STANDARD
        .decode(&compact)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(&compact))
        .ok()
}

/// Smallest long side tried before giving up on the byte cap.
const MIN_DIMENSION: u32 = 32;

/// JPEG no larger than `max_bytes`, or `None` when even the smallest
/// thumbnail at the lowest quality does not fit.
fn thumbnail_jpeg(raw: &[u8], limits: PhotoLimits) -> Result<Option<Vec<u8>>, image::ImageError> {
    let img = image::load_from_memory(raw)?;
    let mut dimension = limits.max_dimension.max(1);

    loop {
        let sized = if img.width() > dimension || img.height() > dimension {
            img.thumbnail(dimension, dimension)
        } else {
            img.clone()
        };
        let rgb = sized.to_rgb8();

        let mut quality = START_QUALITY;
        loop {
            let mut buffer = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            rgb.write_with_encoder(encoder)?;

            if buffer.len() <= limits.max_bytes {
                return Ok(Some(buffer));
            }
            if quality <= MIN_QUALITY {
                break;
            }
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
        }

        let longest = sized.width().max(sized.height());
        if longest <= MIN_DIMENSION {
            return Ok(None);
        }
        dimension = (longest * 3 / 4).max(MIN_DIMENSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_base64(width: u32, height: u32) -> String {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(png)
    }

    const LIMITS: PhotoLimits = PhotoLimits {
        max_dimension: 300,
        max_bytes: 100 * 1024,
    };

    #[test]
    fn large_png_becomes_bounded_jpeg() {
        let jpeg = process_photo(&png_base64(800, 600), LIMITS).unwrap();

        assert!(!jpeg.is_empty());
        assert!(jpeg.len() <= LIMITS.max_bytes);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        assert_eq!(decoded.width(), 300);
        assert_eq!(decoded.height(), 225);
    }

    #[test]
    fn data_uri_prefix_is_accepted() {
        let uri = format!("data:image/png;base64,{}", png_base64(40, 40));
        let jpeg = process_photo(&uri, LIMITS).unwrap();

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 40));
    }

    fn noise_png_base64(side: u32) -> String {
        let mut seed: u32 = 0x2545_f491;
        let img = ImageBuffer::from_fn(side, side, |_, _| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let [r, g, b, _] = seed.to_le_bytes();
            Rgb([r, g, b])
        });
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(png)
    }

    #[test]
    fn noisy_photo_shrinks_until_it_fits() {
        let limits = PhotoLimits {
            max_dimension: 300,
            max_bytes: 8 * 1024,
        };
        let jpeg = process_photo(&noise_png_base64(300), limits).unwrap();

        assert!(jpeg.len() <= limits.max_bytes);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert!(decoded.width() < 300);
    }

    #[test]
    fn impossible_cap_yields_nothing() {
        let limits = PhotoLimits {
            max_dimension: 300,
            max_bytes: 64,
        };
        assert!(process_photo(&noise_png_base64(100), limits).is_none());
    }

    #[test]
    fn garbage_is_skipped() {
        assert!(process_photo("", LIMITS).is_none());
        assert!(process_photo("!!!not base64!!!", LIMITS).is_none());
        // valid base64, not an image
        let text = general_purpose::STANDARD.encode(b"hello world");
        assert!(process_photo(&text, LIMITS).is_none());
    }
}
