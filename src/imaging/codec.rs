//! Pixel work shared by the concrete backends.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Sniff format | `image::guess_format` |
//! | Read dimensions | `ImageReader::with_guessed_format` + `into_dimensions` |
//! | Decode | `image::load_from_memory` |
//! | Draw on canvas | `imageops::resize` (Lanczos3) + `imageops::overlay` |
//! | Encode | `JpegEncoder::new_with_quality` |
//!
//! Everything here is synchronous and CPU bound; backends call it through
//! [`blocking`] so the async runtime isn't stalled.

use super::backend::{MediaError, MediaInfo, is_supported_image};
use super::params::{Dimensions, Quality, TargetGeometry};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;

/// MIME type for an encoded buffer, by magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    Some(match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Avif => "image/avif",
        _ => return None,
    })
}

/// Read dimensions and type from the header without decoding pixels.
///
/// Recognized formats the pipeline doesn't thumbnail are reported by type
/// only, with zero dimensions.
pub fn probe(bytes: &[u8]) -> Result<MediaInfo, MediaError> {
    let mime = sniff_mime(bytes)
        .ok_or_else(|| MediaError::Decode("unrecognized image data".into()))?;
    if !is_supported_image(mime) {
        return Ok(MediaInfo {
            width: 0,
            height: 0,
            mime: mime.to_string(),
        });
    }
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(MediaError::Io)?
        .into_dimensions()
        .map_err(|e| MediaError::Decode(format!("failed to read dimensions: {e}")))?;
    Ok(MediaInfo {
        width,
        height,
        mime: mime.to_string(),
    })
}

/// Decode, draw onto the target canvas, and encode as JPEG.
pub fn render_jpeg(
    bytes: &[u8],
    geometry: TargetGeometry,
    quality: Quality,
) -> Result<Vec<u8>, MediaError> {
    if geometry.canvas.is_degenerate() {
        return Err(MediaError::CompressionFailed(format!(
            "cannot encode a {}x{} canvas",
            geometry.canvas.width, geometry.canvas.height
        )));
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| MediaError::Decode(format!("failed to decode image: {e}")))?;
    let canvas = place(&img, geometry);
    encode_jpeg(&canvas, quality)
}

/// Draw `img` at `geometry.placement` onto a white canvas of `geometry.canvas`.
///
/// Only the part of the source that lands on the canvas is cropped out and
/// resized, so a placement much larger than the canvas costs no more than
/// the canvas itself. JPEG has no alpha, so transparent sources are
/// flattened onto white.
fn place(img: &DynamicImage, geometry: TargetGeometry) -> RgbImage {
    let canvas = geometry.canvas;
    let mut background =
        image::RgbaImage::from_pixel(canvas.width, canvas.height, image::Rgba([255; 4]));

    let source = Dimensions::new(img.width(), img.height());
    if let Some(visible) = visible_region(source, geometry) {
        let region = image::imageops::crop_imm(
            img,
            visible.source_x,
            visible.source_y,
            visible.source_width,
            visible.source_height,
        )
        .to_image();
        let resized = if (region.width(), region.height()) == (visible.width, visible.height) {
            region
        } else {
            image::imageops::resize(&region, visible.width, visible.height, FilterType::Lanczos3)
        };
        image::imageops::overlay(&mut background, &resized, visible.x, visible.y);
    }
    DynamicImage::ImageRgba8(background).to_rgb8()
}

/// The part of a placed source that ends up on the canvas, in source pixels
/// and in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VisibleRegion {
    source_x: u32,
    source_y: u32,
    source_width: u32,
    source_height: u32,
    x: i64,
    y: i64,
    width: u32,
    height: u32,
}

fn visible_region(source: Dimensions, geometry: TargetGeometry) -> Option<VisibleRegion> {
    let TargetGeometry { canvas, placement } = geometry;
    if source.is_degenerate() || canvas.is_degenerate() {
        return None;
    }
    let (x0, x1) = visible_span(placement.x_offset, placement.width, canvas.width)?;
    let (y0, y1) = visible_span(placement.y_offset, placement.height, canvas.height)?;
    let (source_x, source_width) = source_span(x0, x1, placement.width, source.width);
    let (source_y, source_height) = source_span(y0, y1, placement.height, source.height);
    Some(VisibleRegion {
        source_x,
        source_y,
        source_width,
        source_height,
        x: x0 + placement.x_offset,
        y: y0 + placement.y_offset,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

/// Drawn-space interval `[start, end)` of a run `drawn` long, shifted by
/// `offset`, that falls inside `0..canvas`.
fn visible_span(offset: i64, drawn: u32, canvas: u32) -> Option<(i64, i64)> {
    let start = (-offset).max(0);
    let end = (canvas as i64 - offset).min(drawn as i64);
    (end > start).then_some((start, end))
}

/// Source pixels behind the drawn interval `[start, end)`, at least one.
fn source_span(start: i64, end: i64, drawn: u32, source: u32) -> (u32, u32) {
    let per_drawn = source as f64 / drawn as f64;
    let first = ((start as f64 * per_drawn).floor() as u32).min(source - 1);
    let last = ((end as f64 * per_drawn).ceil() as u32).clamp(first + 1, source);
    (first, last - first)
}

fn encode_jpeg(img: &RgbImage, quality: Quality) -> Result<Vec<u8>, MediaError> {
    let mut out = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.percent());
    encoder
        .encode_image(img)
        .map_err(|e| MediaError::CompressionFailed(format!("JPEG encode failed: {e}")))?;
    Ok(out)
}

/// Run CPU-bound codec work off the async executor.
pub async fn blocking<T, F>(work: F) -> Result<T, MediaError>
where
    F: FnOnce() -> Result<T, MediaError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MediaError::CompressionFailed(format!("codec task failed: {e}")))?
}
