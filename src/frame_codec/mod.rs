//! FrameCodec - Image decode, annotate and encode
//!
//! ## Responsibilities
//!
//! - Unwrap data-URI frames sent by the client
//! - Decode JPEG/PNG bytes into pixels
//! - Draw detection boxes
//! - Re-encode annotated frames as JPEG data URIs
//!
//! All functions are synchronous and CPU bound; callers run them on
//! `tokio::task::spawn_blocking`.

use crate::detector::BoundingBox;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;

/// Extract the raw bytes of a `data:<mime>;base64,<payload>` frame.
///
/// A bare base64 string without the `data:` prefix is accepted as well.
pub fn parse_data_uri(frame: &str) -> Result<Vec<u8>> {
    let payload = match frame.split_once(',') {
        Some((header, payload)) => {
            if !header.starts_with("data:") || !header.ends_with(";base64") {
                return Err(Error::Decode(format!("unsupported frame header '{}'", header)));
            }
            payload
        }
        None => frame,
    };

    STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 frame: {}", e)))
}

/// Wrap JPEG bytes in a data URI
pub fn to_data_uri(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))
}

/// Decode encoded image bytes
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| Error::Decode(format!("image decode failed: {}", e)))
}

/// Draw a rectangle outline per detection
pub fn annotate(image: &mut RgbImage, boxes: &[BoundingBox]) {
    for b in boxes {
        draw_rectangle(
            image,
            b.x1.round() as i32,
            b.y1.round() as i32,
            b.x2.round() as i32,
            b.y2.round() as i32,
        );
    }
}

/// Encode RGB pixels as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG stores dimensions as u16
    if image.width() > u32::from(u16::MAX) || image.height() > u32::from(u16::MAX) {
        return Err(Error::Internal(format!(
            "{}x{} frame exceeds JPEG dimensions",
            image.width(),
            image.height()
        )));
    }

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| Error::Internal(format!("JPEG encode failed: {}", e)))?;
    Ok(buffer)
}

/// Annotate a decoded frame and return it as a JPEG data URI
pub fn render(image: DynamicImage, boxes: &[BoundingBox], quality: u8) -> Result<String> {
    let mut rgb = image.into_rgb8();
    annotate(&mut rgb, boxes);
    let jpeg = encode_jpeg(&rgb, quality)?;
    Ok(to_data_uri(&jpeg))
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }

    let (left, right) = (left.min(right), left.max(right));
    let (top, bottom) = (top.min(bottom), top.max(bottom));
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for t in 0..BOX_THICKNESS {
        let y_top = (top + t).min(bottom);
        let y_bottom = (bottom - t).max(top);
        for x in left..=right {
            image.put_pixel(x as u32, y_top as u32, BOX_COLOR);
            image.put_pixel(x as u32, y_bottom as u32, BOX_COLOR);
        }

        let x_left = (left + t).min(right);
        let x_right = (right - t).max(left);
        for y in top..=bottom {
            image.put_pixel(x_left as u32, y as u32, BOX_COLOR);
            image.put_pixel(x_right as u32, y as u32, BOX_COLOR);
        }
    }
}
