//! Platform media backend trait and shared types.
//!
//! The [`MediaBackend`] trait defines the operations every platform must
//! provide: decode dimensions and type, compress to a quality, measure a
//! compressed output, and serialize it as base64. The engine and resolver only
//! ever talk to this trait; they never ask which platform they run on.
//!
//! Three implementations ship with the crate:
//!
//! | Backend | Sources | Base64 output | Size accounting |
//! |---|---|---|---|
//! | [`CanvasBackend`](super::CanvasBackend) | bytes | data URI | string length (×1.0) |
//! | [`NativeBackend`](super::NativeBackend) | bytes, paths | data URI | file bytes (×1.35) |
//! | [`MiniProgramBackend`](super::MiniProgramBackend) | sandboxed paths | raw | file bytes (×1.35) |
//!
//! What differs between them is declared through [`Capabilities`].

use super::params::{Dimensions, Quality, TargetGeometry};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid media reference: {0}")]
    InvalidMediaReference(String),
    #[error("Failed to decode media: {0}")]
    Decode(String),
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    #[error("Compressed output not found: {0}")]
    NotFound(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Failed to read encoded data: {0}")]
    Read(String),
}

/// Media handed to the pipeline by the caller.
///
/// Cloning is cheap: byte buffers are shared.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// In-memory media with its declared MIME type.
    Bytes { data: Arc<[u8]>, mime: String },
    /// Platform file path.
    Path(PathBuf),
}

impl MediaSource {
    pub fn bytes(data: impl Into<Arc<[u8]>>, mime: impl Into<String>) -> Self {
        Self::Bytes {
            data: data.into(),
            mime: mime.into(),
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// MIME type the caller declared, or guessed from the path's extension.
    pub fn declared_mime(&self) -> Option<String> {
        match self {
            Self::Bytes { mime, .. } if mime.trim().is_empty() => None,
            Self::Bytes { mime, .. } => Some(normalize_mime(mime)),
            Self::Path(path) => mime_from_extension(path).map(str::to_string),
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Bytes { data, mime } => format!("<{} bytes of {}>", data.len(), mime),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Opaque reference to one compressed output held by a backend.
///
/// Only the backend that issued a handle can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompressedHandle(String);

impl CompressedHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompressedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input to a backend operation: the caller's original media, or an output a
/// previous compression produced.
#[derive(Debug, Clone, Copy)]
pub enum MediaInput<'a> {
    Source(&'a MediaSource),
    Compressed(&'a CompressedHandle),
}

/// Result of decoding a source's header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub mime: String,
}

impl MediaInfo {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// What a backend can do, declared up front so callers never branch on the
/// platform itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub accepts_bytes: bool,
    pub accepts_paths: bool,
    /// Animated formats can be returned untouched.
    pub gif_passthrough: bool,
    /// Multiplier from [`MediaBackend::byte_size`] to the size the payload
    /// will occupy once embedded as text.
    pub encoding_overhead: f64,
}

impl Capabilities {
    /// Whether this backend can open `source` at all.
    pub fn accepts(&self, source: &MediaSource) -> bool {
        match source {
            MediaSource::Bytes { .. } => self.accepts_bytes,
            MediaSource::Path(_) => self.accepts_paths,
        }
    }
}

/// Trait for platform media backends.
///
/// Implementations must be stateless or synchronize internally: concurrent
/// resolutions share one instance.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Read dimensions and the actual MIME type.
    async fn decode_dimensions_and_type(
        &self,
        source: &MediaSource,
    ) -> Result<MediaInfo, MediaError>;

    /// Draw `input` onto `geometry` and encode at `quality`.
    async fn compress_to_quality(
        &self,
        input: MediaInput<'_>,
        geometry: TargetGeometry,
        quality: Quality,
    ) -> Result<CompressedHandle, MediaError>;

    /// Size of `input` as the backend accounts for it.
    async fn byte_size(&self, input: MediaInput<'_>) -> Result<u64, MediaError>;

    /// Serialize `input` as base64, with or without a data-URI prefix.
    async fn encode_base64(&self, input: MediaInput<'_>) -> Result<String, MediaError>;

    /// Drop a compressed output that is no longer needed. Unknown handles are ignored.
    async fn release(&self, _handle: &CompressedHandle) {}
}

/// Raster formats the pipeline thumbnails.
pub const SUPPORTED_IMAGE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
];

pub const GIF_MIME: &str = "image/gif";

/// Lowercase and expand bare type names: `"gif"` → `"image/gif"`,
/// `"jpg"` → `"image/jpeg"`.
pub fn normalize_mime(mime: &str) -> String {
    let mime = mime.trim().to_ascii_lowercase();
    let mime = mime.split(';').next().unwrap_or_default().trim().to_string();
    match mime.as_str() {
        "jpg" | "jpeg" | "image/jpg" => "image/jpeg".to_string(),
        "png" | "gif" | "bmp" | "webp" => format!("image/{mime}"),
        _ => mime,
    }
}

pub fn is_supported_image(mime: &str) -> bool {
    SUPPORTED_IMAGE_MIMES.contains(&mime)
}

pub fn is_video(mime: &str) -> bool {
    mime.starts_with("video/")
}

/// MIME type for a path, by extension.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        _ => return None,
    })
}

/// Last segment of a URL or filesystem path.
///
/// ```
/// # use thumbfit::imaging::backend::file_name;
/// assert_eq!(file_name("http://tmp/abc123.jpg"), "abc123.jpg");
/// assert_eq!(file_name("file:///var/mobile/doc/uni_media/1742.jpg"), "1742.jpg");
/// ```
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}
