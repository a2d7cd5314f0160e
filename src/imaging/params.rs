//! Parameter types for thumbnail operations.
//!
//! These structs describe *what* to produce, not *how*. They are the interface
//! between the [`engine`](super::engine) / [`resolver`](super::resolver) (which
//! decide sizes, quality and budgets) and the [`backend`](super::backend)
//! (which does the actual pixel and file work).
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality in `(0, 1]`. Clamped on construction.
//! - [`ThumbnailConfig`]: Bounds, starting quality, scale threshold and fit mode.
//! - [`ThumbnailOverrides`]: Caller-supplied optional fields layered on a config.
//! - [`SizeBudget`]: Byte ceiling an accepted thumbnail's estimated encoding must fit.
//! - [`Timeouts`]: Per-operation and whole-resolution time bounds.
//! - [`TargetGeometry`] / [`Placement`]: Destination canvas and where the source lands on it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bounding box edge for thumbnails.
pub const DEFAULT_MAX_EDGE: u32 = 240;
/// Quality the engine starts from when the caller doesn't say otherwise.
pub const DEFAULT_QUALITY: f32 = 1.0;
/// Elongation threshold for [`FitMode::Canvas`] placement.
pub const DEFAULT_SCALE: f32 = 1.0;
/// The engine gives up once stepping would reach this quality.
pub const MIN_QUALITY: f32 = 0.1;
/// How much quality drops per engine iteration.
pub const QUALITY_STEP: f32 = 0.1;
/// Space kept free in a message for fields other than the thumbnail.
pub const DEFAULT_RESERVE_BYTES: u64 = 10 * 1024;
/// Bound applied to every single adapter operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Tolerance for float quality comparisons.
const QUALITY_EPSILON: f32 = 1e-4;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const ZERO: Dimensions = Dimensions {
        width: 0,
        height: 0,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero on either side means there is nothing to draw.
    pub fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Quality setting for lossy encoding, in `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Quality(f32);

impl Quality {
    /// Clamp into `[0.01, 1.0]`. Non-finite input falls back to the default.
    pub fn new(value: f32) -> Self {
        if !value.is_finite() {
            return Self::default();
        }
        Self(value.clamp(0.01, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Encoder scale, 1–100.
    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Quality after `steps` decrements from `self`, or `None` once the
    /// result would be at or below [`MIN_QUALITY`].
    ///
    /// Computed from the starting value rather than by repeated subtraction
    /// so float error doesn't accumulate over iterations.
    pub fn stepped(self, steps: u32) -> Option<Self> {
        let next = self.0 - QUALITY_STEP * steps as f32;
        if next <= MIN_QUALITY + QUALITY_EPSILON {
            None
        } else {
            Some(Self(next))
        }
    }

    /// Upper bound on compress attempts starting from this quality:
    /// `⌈(q − MIN_QUALITY) / QUALITY_STEP⌉ + 1`.
    pub fn max_attempts(self) -> u32 {
        let steps = ((self.0 - MIN_QUALITY) / QUALITY_STEP - QUALITY_EPSILON).ceil();
        steps.max(0.0) as u32 + 1
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY)
    }
}

/// How the target canvas is derived from the source size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMode {
    /// Scale to fit inside the bounds; the canvas is the scaled image.
    #[default]
    Proportional,
    /// Zoom toward a fixed baseline and crop the overflow, letterbox style.
    Canvas,
}

/// Thumbnail generation settings for one resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: Quality,
    /// Elongation threshold used by [`FitMode::Canvas`].
    pub scale: f32,
    pub fit: FitMode,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_EDGE,
            max_height: DEFAULT_MAX_EDGE,
            quality: Quality::default(),
            scale: DEFAULT_SCALE,
            fit: FitMode::default(),
        }
    }
}

impl ThumbnailConfig {
    /// Layer caller overrides on top of `self`. Bounds are kept at least 1px.
    pub fn with_overrides(self, overrides: &ThumbnailOverrides) -> Self {
        Self {
            max_width: overrides.max_width.unwrap_or(self.max_width).max(1),
            max_height: overrides.max_height.unwrap_or(self.max_height).max(1),
            quality: overrides.quality.map(Quality::new).unwrap_or(self.quality),
            scale: overrides
                .scale
                .filter(|s| s.is_finite() && *s > 0.0)
                .unwrap_or(self.scale),
            fit: overrides.fit.unwrap_or(self.fit),
        }
    }
}

/// Optional per-call settings. Each `Some` replaces one default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailOverrides {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub quality: Option<f32>,
    pub scale: Option<f32>,
    pub fit: Option<FitMode>,
}

/// Maximum bytes a thumbnail's estimated encoding may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBudget(u64);

impl SizeBudget {
    /// Budget for a protocol whose message content may hold `max_content_bytes`,
    /// keeping [`DEFAULT_RESERVE_BYTES`] free.
    pub fn from_protocol_limit(max_content_bytes: u64) -> Self {
        Self::with_reserve(max_content_bytes, DEFAULT_RESERVE_BYTES)
    }

    pub fn with_reserve(max_content_bytes: u64, reserve_bytes: u64) -> Self {
        Self(max_content_bytes.saturating_sub(reserve_bytes))
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Whether a payload whose estimated encoded size is `estimate` fits.
    pub fn admits(self, estimate: f64) -> bool {
        estimate <= self.0 as f64
    }
}

/// Time bounds for adapter work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Applied to each adapter operation independently.
    pub per_operation: Duration,
    /// Applied to a whole `resolve` call, retry loop included.
    pub resolve: Duration,
}

impl Timeouts {
    /// Per-operation bound with the resolve bound at ten times that.
    pub fn per_operation(per_operation: Duration) -> Self {
        Self {
            per_operation,
            resolve: per_operation.saturating_mul(10),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::per_operation(DEFAULT_OPERATION_TIMEOUT)
    }
}

/// Where the source is drawn on the destination canvas.
///
/// `width × height` is the drawn size of the whole source; negative offsets
/// push part of it outside the canvas, which crops it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub x_offset: i64,
    pub y_offset: i64,
}

impl Placement {
    /// Source stretched over exactly the canvas, nothing cropped.
    pub fn covering(canvas: Dimensions) -> Self {
        Self {
            width: canvas.width,
            height: canvas.height,
            x_offset: 0,
            y_offset: 0,
        }
    }
}

/// Destination canvas plus where the source lands on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub canvas: Dimensions,
    pub placement: Placement,
}

impl TargetGeometry {
    /// Geometry for re-encoding an already-placed buffer.
    pub fn identity(canvas: Dimensions) -> Self {
        Self {
            canvas,
            placement: Placement::covering(canvas),
        }
    }
}
