//! End-to-end resolution through the real backends.
//!
//! Sources are generated in-test: gradients compress well and fit on the
//! first pass, noise compresses badly and forces the quality search.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use thumbfit::imaging::{
    CanvasBackend, ErrorKind, FitMode, MediaSource, MiniProgramBackend, NativeBackend, Resolver,
    SizeBudget, ThumbnailOverrides,
};

fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 96])
    })
}

fn noise(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503).rotate_left(7);
        let v = v ^ (v >> 13) ^ (v << 5);
        Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    })
}

fn animated_gif() -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = image::codecs::gif::GifEncoder::new(&mut out);
        for shade in [40u8, 200] {
            let frame = image::RgbaImage::from_pixel(30, 20, image::Rgba([shade, 0, 0, 255]));
            encoder.encode_frame(image::Frame::new(frame)).unwrap();
        }
    }
    out
}

fn decoded_size(base64: &str) -> (u32, u32) {
    let bytes = STANDARD.decode(base64).unwrap();
    let img = image::load_from_memory(&bytes).unwrap();
    (img.width(), img.height())
}

// =============================================================================
// Canvas backend
// =============================================================================

#[tokio::test]
async fn canvas_fits_tall_photo() {
    let backend = Arc::new(CanvasBackend::new());
    let resolver = Resolver::new(backend.clone());
    let source = MediaSource::bytes(encode(gradient(1000, 2000), ImageFormat::Jpeg), "image/jpeg");

    let resolved = resolver.resolve_with_info(&source, None).await.unwrap();

    assert_eq!((resolved.thumbnail.width, resolved.thumbnail.height), (120, 240));
    assert_eq!(resolved.iterations, 1);
    assert!(!resolved.thumbnail.thumbnail_base64.starts_with("data:"));
    assert_eq!(decoded_size(&resolved.thumbnail.thumbnail_base64), (120, 240));
    assert_eq!(backend.live_buffers(), 0);
}

#[tokio::test]
async fn canvas_fit_of_thin_strip_draws_only_the_visible_part() {
    // Zoomed to 160 wide, the strip is drawn 1,600,000 rows tall; only the
    // centered 240 may be rendered.
    let resolver = Resolver::new(Arc::new(CanvasBackend::new()));
    let source = MediaSource::bytes(encode(gradient(2, 20_000), ImageFormat::Png), "image/png");
    let overrides = ThumbnailOverrides {
        fit: Some(FitMode::Canvas),
        ..Default::default()
    };

    let started = std::time::Instant::now();
    let result = resolver.resolve(&source, Some(&overrides)).await.unwrap();

    assert_eq!((result.width, result.height), (160, 240));
    assert_eq!(decoded_size(&result.thumbnail_base64), (160, 240));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn canvas_thumbnails_extreme_panorama() {
    let resolver = Resolver::new(Arc::new(CanvasBackend::new()));
    let source = MediaSource::bytes(encode(gradient(10_000, 20), ImageFormat::Png), "image/png");

    let result = resolver.resolve(&source, None).await.unwrap();

    assert_eq!((result.width, result.height), (240, 1));
    assert_eq!(decoded_size(&result.thumbnail_base64), (240, 1));
}

#[tokio::test]
async fn canvas_passes_animated_gif_through() {
    let gif = animated_gif();
    let resolver = Resolver::new(Arc::new(CanvasBackend::new()));
    let source = MediaSource::bytes(gif.clone(), "gif");

    let resolved = resolver.resolve_with_info(&source, None).await.unwrap();

    assert!(resolved.passthrough);
    assert_eq!((resolved.thumbnail.width, resolved.thumbnail.height), (30, 20));
    assert_eq!(STANDARD.decode(&resolved.thumbnail.thumbnail_base64).unwrap(), gif);
}

#[tokio::test]
async fn canvas_rejects_paths_and_garbage() {
    let resolver = Resolver::new(Arc::new(CanvasBackend::new()));

    let path = MediaSource::path("/photos/a.jpg");
    let err = resolver.resolve(&path, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMediaReference);

    let text = MediaSource::bytes(b"hello, not an image".to_vec(), "image/jpeg");
    let err = resolver.resolve(&text, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeError);

    let tiff = MediaSource::bytes(b"II*\0\x08\0\0\0 tiff body".to_vec(), "image/tiff");
    let err = resolver.resolve(&tiff, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
}

// =============================================================================
// Native backend
// =============================================================================

#[tokio::test]
async fn native_steps_quality_until_payload_fits() {
    let tmp = tempfile::TempDir::new().unwrap();
    let budget = SizeBudget::with_reserve(48 * 1024, 0);
    let resolver =
        Resolver::new(Arc::new(NativeBackend::new(tmp.path().join("work")))).with_budget(budget);
    let source = MediaSource::bytes(encode(noise(240, 240), ImageFormat::Png), "image/png");

    let resolved = resolver.resolve_with_info(&source, None).await.unwrap();

    assert!(resolved.iterations > 1, "noise should not fit at full quality");
    assert!(resolved.quality.unwrap() < 1.0);
    // Base64 text is 4/3 of the bytes, under the 1.35 estimate that was budgeted.
    assert!(resolved.thumbnail.thumbnail_base64.len() as u64 <= budget.bytes());
    assert_eq!(decoded_size(&resolved.thumbnail.thumbnail_base64), (240, 240));
}

#[tokio::test]
async fn native_reports_hopeless_source_and_cleans_up() {
    let tmp = tempfile::TempDir::new().unwrap();
    let work = tmp.path().join("work");
    let resolver = Resolver::new(Arc::new(NativeBackend::new(&work)))
        .with_budget(SizeBudget::with_reserve(512, 0));
    let source = MediaSource::bytes(encode(noise(240, 240), ImageFormat::Png), "image/png");

    let err = resolver.resolve(&source, None).await.unwrap_err();

    assert!(err.is_too_large());
    let leftovers = std::fs::read_dir(&work).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn native_reads_from_path_with_overrides() {
    let tmp = tempfile::TempDir::new().unwrap();
    let photo = tmp.path().join("wide.jpg");
    std::fs::write(&photo, encode(gradient(1200, 600), ImageFormat::Jpeg)).unwrap();
    let resolver = Resolver::new(Arc::new(NativeBackend::new(tmp.path().join("work"))));
    let overrides = ThumbnailOverrides {
        max_width: Some(100),
        max_height: Some(100),
        ..Default::default()
    };

    let result = resolver
        .resolve(&MediaSource::path(&photo), Some(&overrides))
        .await
        .unwrap();

    assert_eq!((result.width, result.height), (100, 50));
    assert_eq!(decoded_size(&result.thumbnail_base64), (100, 50));
}

// =============================================================================
// Mini-program backend
// =============================================================================

#[tokio::test]
async fn mini_program_thumbnails_inside_sandbox() {
    let tmp = tempfile::TempDir::new().unwrap();
    let photo = tmp.path().join("usr/photo.png");
    std::fs::create_dir_all(photo.parent().unwrap()).unwrap();
    std::fs::write(&photo, encode(gradient(480, 640), ImageFormat::Png)).unwrap();
    let resolver = Resolver::new(Arc::new(MiniProgramBackend::new(tmp.path())));

    let result = resolver.resolve(&MediaSource::path(&photo), None).await.unwrap();

    assert_eq!((result.width, result.height), (180, 240));
    assert_eq!(decoded_size(&result.thumbnail_base64), (180, 240));
    let leftovers = std::fs::read_dir(tmp.path().join("tmp"))
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);

    let outside = MediaSource::path("/etc/hosts");
    let err = resolver.resolve(&outside, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMediaReference);
}
