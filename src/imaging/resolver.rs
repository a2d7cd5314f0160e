//! Image-info resolver: the public entry point of the pipeline.
//!
//! ```text
//! source ─▶ accepted? ─▶ video? ─▶ extract still ─┐
//!                          │                      ▼
//!                          └──────────────▶ decode dims + MIME
//!                                                 │
//!                         GIF + pass-through ◀────┤──▶ unsupported → error
//!                                 │               ▼
//!                                 │        plan geometry → engine
//!                                 ▼               ▼
//!                            original bytes   compressed output
//!                                 └──────┬────────┘
//!                                        ▼
//!                          base64 (data-URI prefix stripped)
//! ```
//!
//! Every failure below this layer arrives as a typed error and is mapped onto
//! exactly one [`ThumbnailError`] variant. Nothing is retried here; the
//! engine's quality loop is the only retry.

use super::backend::{
    Capabilities, GIF_MIME, MediaBackend, MediaError, MediaInfo, MediaInput, MediaSource,
    is_supported_image, is_video, normalize_mime,
};
use super::calculations::plan_geometry;
use super::engine::{CompressionEngine, EngineError, ReleaseGuard, bounded};
use super::params::{SizeBudget, ThumbnailConfig, ThumbnailOverrides, Timeouts};
use super::video::{DEFAULT_SEEK_OFFSET, FrameExtractor, seek_offset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

/// Message content limit of the host protocol the thumbnails travel in.
pub const DEFAULT_PROTOCOL_LIMIT: u64 = 128 * 1024;

/// Resolver-level failure. Callers branch on [`ThumbnailError::kind`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThumbnailError {
    #[error("Invalid media reference: {0}")]
    InvalidMediaReference(String),
    #[error("Failed to decode media: {0}")]
    DecodeError(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    #[error(
        "Too large to thumbnail: estimated {last_estimate:.0} bytes at quality {quality:.2}, budget is {budget} bytes"
    )]
    CompressionBudgetExceeded {
        last_estimate: f64,
        budget: u64,
        quality: f32,
    },
    #[error("Compression produced an empty output")]
    InvalidMedia,
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Failed to read thumbnail: {0}")]
    ReadError(String),
}

/// Stable discriminant of [`ThumbnailError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidMediaReference,
    DecodeError,
    UnsupportedFormat,
    CompressionFailed,
    CompressionBudgetExceeded,
    InvalidMedia,
    Timeout,
    ReadError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMediaReference => "invalid_media_reference",
            Self::DecodeError => "decode_error",
            Self::UnsupportedFormat => "unsupported_format",
            Self::CompressionFailed => "compression_failed",
            Self::CompressionBudgetExceeded => "compression_budget_exceeded",
            Self::InvalidMedia => "invalid_media",
            Self::Timeout => "timeout",
            Self::ReadError => "read_error",
        }
    }
}

impl ThumbnailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMediaReference(_) => ErrorKind::InvalidMediaReference,
            Self::DecodeError(_) => ErrorKind::DecodeError,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::CompressionFailed(_) => ErrorKind::CompressionFailed,
            Self::CompressionBudgetExceeded { .. } => ErrorKind::CompressionBudgetExceeded,
            Self::InvalidMedia => ErrorKind::InvalidMedia,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ReadError(_) => ErrorKind::ReadError,
        }
    }

    /// The source can't be made small enough; offer sending it as a file or
    /// shrinking it first.
    pub fn is_too_large(&self) -> bool {
        self.kind() == ErrorKind::CompressionBudgetExceeded
    }
}

impl From<MediaError> for ThumbnailError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::InvalidMediaReference(msg) => Self::InvalidMediaReference(msg),
            MediaError::NotFound(what) => {
                Self::InvalidMediaReference(format!("stale handle {what}"))
            }
            MediaError::Decode(msg) => Self::DecodeError(msg),
            MediaError::CompressionFailed(msg) => Self::CompressionFailed(msg),
            MediaError::Timeout { operation, after } => {
                Self::Timeout(format!("{operation} exceeded {after:?}"))
            }
            MediaError::Read(msg) => Self::ReadError(msg),
            MediaError::Io(e) => Self::ReadError(e.to_string()),
        }
    }
}

impl From<EngineError> for ThumbnailError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Media(e) => e.into(),
            EngineError::InvalidMedia => Self::InvalidMedia,
            EngineError::BudgetExceeded {
                last_estimate,
                budget,
                quality,
            } => Self::CompressionBudgetExceeded {
                last_estimate,
                budget,
                quality,
            },
        }
    }
}

/// Raw base64 thumbnail and its pixel size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailResult {
    pub thumbnail_base64: String,
    pub width: u32,
    pub height: u32,
}

/// A thumbnail together with what was learned about its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedImage {
    /// The decoded source (for video: the extracted frame).
    pub info: MediaInfo,
    pub thumbnail: ThumbnailResult,
    /// Quality of the final encode; `None` for pass-through.
    pub quality: Option<f32>,
    pub iterations: u32,
    /// The source bytes were returned untouched.
    pub passthrough: bool,
}

/// Strip a leading `data:<type>;base64,` wrapper.
///
/// ```
/// # use thumbfit::imaging::strip_data_uri_prefix;
/// assert_eq!(strip_data_uri_prefix("data:image/jpeg;base64,/9j/4A"), "/9j/4A");
/// assert_eq!(strip_data_uri_prefix("/9j/4A"), "/9j/4A");
/// ```
pub fn strip_data_uri_prefix(encoded: &str) -> &str {
    const MARKER: &str = ";base64,";
    if !encoded.starts_with("data:") {
        return encoded;
    }
    match encoded.find(MARKER) {
        Some(at) => &encoded[at + MARKER.len()..],
        None => encoded,
    }
}

/// Turns media sources into size-bounded thumbnails through one backend.
///
/// Cheap to clone; clones share the backend and the frame extractor.
#[derive(Clone)]
pub struct Resolver {
    backend: Arc<dyn MediaBackend>,
    defaults: ThumbnailConfig,
    budget: SizeBudget,
    timeouts: Timeouts,
    extractor: Option<Arc<dyn FrameExtractor>>,
    seek_offset: Duration,
}

impl Resolver {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            defaults: ThumbnailConfig::default(),
            budget: SizeBudget::from_protocol_limit(DEFAULT_PROTOCOL_LIMIT),
            timeouts: Timeouts::default(),
            extractor: None,
            seek_offset: DEFAULT_SEEK_OFFSET,
        }
    }

    pub fn with_defaults(mut self, defaults: ThumbnailConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_budget(mut self, budget: SizeBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Enable video sources.
    pub fn with_frame_extractor(mut self, extractor: Arc<dyn FrameExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_seek_offset(mut self, offset: Duration) -> Self {
        self.seek_offset = offset;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn budget(&self) -> SizeBudget {
        self.budget
    }

    pub fn defaults(&self) -> &ThumbnailConfig {
        &self.defaults
    }

    pub async fn resolve(
        &self,
        source: &MediaSource,
        overrides: Option<&ThumbnailOverrides>,
    ) -> Result<ThumbnailResult, ThumbnailError> {
        self.resolve_with_info(source, overrides)
            .await
            .map(|resolved| resolved.thumbnail)
    }

    /// Like [`resolve`](Self::resolve), also reporting the decoded source and
    /// how the thumbnail was produced.
    pub async fn resolve_with_info(
        &self,
        source: &MediaSource,
        overrides: Option<&ThumbnailOverrides>,
    ) -> Result<ResolvedImage, ThumbnailError> {
        let span = info_span!("resolve", source = %source.describe());
        let limit = self.timeouts.resolve;
        match tokio::time::timeout(limit, self.resolve_inner(source, overrides))
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(source = %source.describe(), ?limit, "resolve timed out");
                Err(ThumbnailError::Timeout(format!(
                    "resolve exceeded {limit:?}"
                )))
            }
        }
    }

    async fn resolve_inner(
        &self,
        source: &MediaSource,
        overrides: Option<&ThumbnailOverrides>,
    ) -> Result<ResolvedImage, ThumbnailError> {
        let capabilities = self.backend.capabilities();
        if !capabilities.accepts(source) {
            return Err(ThumbnailError::InvalidMediaReference(format!(
                "backend cannot open {}",
                source.describe()
            )));
        }

        let frame;
        let source = match source.declared_mime() {
            Some(mime) if is_video(&mime) => {
                frame = self.extract_still(source).await?;
                if !capabilities.accepts(&frame) {
                    return Err(ThumbnailError::InvalidMediaReference(
                        "backend cannot open extracted video frames".into(),
                    ));
                }
                &frame
            }
            _ => source,
        };

        let op_timeout = self.timeouts.per_operation;
        let mut info = bounded(
            "decode",
            op_timeout,
            self.backend.decode_dimensions_and_type(source),
        )
        .await?;
        info.mime = normalize_mime(&info.mime);
        if !is_supported_image(&info.mime) {
            return Err(ThumbnailError::UnsupportedFormat(info.mime));
        }
        if info.dimensions().is_degenerate() {
            return Err(ThumbnailError::DecodeError(format!(
                "source has no pixels ({}x{})",
                info.width, info.height
            )));
        }

        if info.mime == GIF_MIME && capabilities.gif_passthrough {
            return self.pass_through(source, info).await;
        }

        let config = match overrides {
            Some(overrides) => self.defaults.with_overrides(overrides),
            None => self.defaults,
        };
        let geometry = plan_geometry(info.dimensions(), &config);

        let guard = ReleaseGuard::new(Arc::clone(&self.backend));
        let engine = CompressionEngine::new(self.backend.as_ref(), self.budget, op_timeout)
            .with_release_guard(&guard);
        let output = engine.run(source, geometry, config.quality).await?;

        let encoded = bounded(
            "encode",
            op_timeout,
            self.backend
                .encode_base64(MediaInput::Compressed(&output.handle)),
        )
        .await;
        self.backend.release(&output.handle).await;
        guard.forget(&output.handle);
        let encoded = encoded?;

        info!(
            width = output.dimensions.width,
            height = output.dimensions.height,
            quality = output.quality.value(),
            attempts = output.attempts,
            estimate = output.estimated_size,
            "thumbnail ready"
        );
        Ok(ResolvedImage {
            info,
            thumbnail: ThumbnailResult {
                thumbnail_base64: strip_data_uri_prefix(&encoded).to_string(),
                width: output.dimensions.width,
                height: output.dimensions.height,
            },
            quality: Some(output.quality.value()),
            iterations: output.attempts,
            passthrough: false,
        })
    }

    /// Animated GIFs go out as-is; re-encoding would drop every frame but one.
    async fn pass_through(
        &self,
        source: &MediaSource,
        info: MediaInfo,
    ) -> Result<ResolvedImage, ThumbnailError> {
        let op_timeout = self.timeouts.per_operation;
        let size = bounded(
            "measure",
            op_timeout,
            self.backend.byte_size(MediaInput::Source(source)),
        )
        .await?;
        let estimate = size as f64 * self.backend.capabilities().encoding_overhead;
        if !self.budget.admits(estimate) {
            warn!(
                estimate,
                budget = self.budget.bytes(),
                "passing through GIF larger than the budget"
            );
        }
        let encoded = bounded(
            "encode",
            op_timeout,
            self.backend.encode_base64(MediaInput::Source(source)),
        )
        .await?;
        info!(width = info.width, height = info.height, size, "GIF passed through");
        Ok(ResolvedImage {
            thumbnail: ThumbnailResult {
                thumbnail_base64: strip_data_uri_prefix(&encoded).to_string(),
                width: info.width,
                height: info.height,
            },
            info,
            quality: None,
            iterations: 0,
            passthrough: true,
        })
    }

    async fn extract_still(&self, source: &MediaSource) -> Result<MediaSource, ThumbnailError> {
        let Some(extractor) = &self.extractor else {
            return Err(ThumbnailError::UnsupportedFormat(
                source
                    .declared_mime()
                    .unwrap_or_else(|| "video".to_string()),
            ));
        };
        let op_timeout = self.timeouts.per_operation;
        let duration = bounded("probe duration", op_timeout, extractor.duration(source)).await?;
        let at = seek_offset(self.seek_offset, duration);
        debug!(?duration, ?at, "extracting still from video");
        let still = bounded(
            "extract frame",
            op_timeout,
            extractor.extract_frame(source, at),
        )
        .await?;
        Ok(MediaSource::bytes(still, "image/jpeg"))
    }
}
