//! Configuration module.
//!
//! Handles loading, validating, and merging `thumbfit.toml`. Stock defaults
//! are serialized to a TOML table and the user file is deep-merged on top,
//! so a file only needs the keys it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [thumbnail]
//! max_width = 240
//! max_height = 240
//! quality = 1.0             # starting quality, (0, 1]
//! scale = 1.0               # elongation threshold for fit = "canvas"
//! fit = "proportional"      # or "canvas"
//!
//! [budget]
//! max_message_content_bytes = 131072
//! reserve_bytes = 10240
//!
//! [timeouts]
//! operation_secs = 10
//! # resolve_secs = 100      # defaults to 10 x operation_secs
//!
//! [video]
//! seek_offset_ms = 100
//!
//! [processing]
//! # max_concurrent = 4      # batch mode (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::params::{
    DEFAULT_MAX_EDGE, DEFAULT_OPERATION_TIMEOUT, DEFAULT_QUALITY, DEFAULT_RESERVE_BYTES,
    DEFAULT_SCALE,
};
use crate::imaging::resolver::DEFAULT_PROTOCOL_LIMIT;
use crate::imaging::video::DEFAULT_SEEK_OFFSET;
use crate::imaging::{
    FitMode, MediaBackend, Quality, Resolver, SizeBudget, ThumbnailConfig, Timeouts,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// File name looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = "thumbfit.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `thumbfit.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbfitConfig {
    /// Thumbnail bounds and starting quality.
    pub thumbnail: ThumbnailSection,
    /// Protocol limit the encoded thumbnail must fit in.
    pub budget: BudgetConfig,
    pub timeouts: TimeoutsConfig,
    pub video: VideoConfig,
    /// Batch-mode concurrency.
    pub processing: ProcessingConfig,
}

impl ThumbfitConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thumbnail;
        if !(t.quality > 0.0 && t.quality <= 1.0) {
            return Err(ConfigError::Validation(
                "thumbnail.quality must be in (0, 1]".into(),
            ));
        }
        if t.max_width == 0 || t.max_height == 0 {
            return Err(ConfigError::Validation(
                "thumbnail.max_width and max_height must be non-zero".into(),
            ));
        }
        if !(t.scale.is_finite() && t.scale > 0.0) {
            return Err(ConfigError::Validation(
                "thumbnail.scale must be positive".into(),
            ));
        }
        if self.budget.reserve_bytes >= self.budget.max_message_content_bytes {
            return Err(ConfigError::Validation(
                "budget.reserve_bytes must be smaller than max_message_content_bytes".into(),
            ));
        }
        if self.timeouts.operation_secs == 0 || self.timeouts.resolve_secs == Some(0) {
            return Err(ConfigError::Validation(
                "timeouts must be non-zero".into(),
            ));
        }
        if self.processing.max_concurrent == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_concurrent must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn to_thumbnail_config(&self) -> ThumbnailConfig {
        ThumbnailConfig {
            max_width: self.thumbnail.max_width,
            max_height: self.thumbnail.max_height,
            quality: Quality::new(self.thumbnail.quality),
            scale: self.thumbnail.scale,
            fit: self.thumbnail.fit,
        }
    }

    pub fn size_budget(&self) -> SizeBudget {
        SizeBudget::with_reserve(
            self.budget.max_message_content_bytes,
            self.budget.reserve_bytes,
        )
    }

    pub fn timeouts(&self) -> Timeouts {
        let per_operation = Duration::from_secs(self.timeouts.operation_secs);
        match self.timeouts.resolve_secs {
            Some(secs) => Timeouts {
                per_operation,
                resolve: Duration::from_secs(secs),
            },
            None => Timeouts::per_operation(per_operation),
        }
    }

    pub fn seek_offset(&self) -> Duration {
        Duration::from_millis(self.video.seek_offset_ms)
    }

    /// A resolver over `backend` with every setting from this config applied.
    pub fn resolver(&self, backend: Arc<dyn MediaBackend>) -> Resolver {
        Resolver::new(backend)
            .with_defaults(self.to_thumbnail_config())
            .with_budget(self.size_budget())
            .with_timeouts(self.timeouts())
            .with_seek_offset(self.seek_offset())
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailSection {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: f32,
    pub scale: f32,
    pub fit: FitMode,
}

impl Default for ThumbnailSection {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_EDGE,
            max_height: DEFAULT_MAX_EDGE,
            quality: DEFAULT_QUALITY,
            scale: DEFAULT_SCALE,
            fit: FitMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetConfig {
    pub max_message_content_bytes: u64,
    /// Kept free for the rest of the message.
    pub reserve_bytes: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_message_content_bytes: DEFAULT_PROTOCOL_LIMIT,
            reserve_bytes: DEFAULT_RESERVE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Bound on each backend operation.
    pub operation_secs: u64,
    /// Bound on a whole resolution. When absent, ten times `operation_secs`.
    pub resolve_secs: Option<u64>,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            operation_secs: DEFAULT_OPERATION_TIMEOUT.as_secs(),
            resolve_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfig {
    /// Preferred frame position; short clips use their midpoint instead.
    pub seek_offset_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            seek_offset_ms: DEFAULT_SEEK_OFFSET.as_millis() as u64,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of resolutions in flight during batch mode.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_concurrent: Option<usize>,
}

/// Resolve the effective concurrency from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_concurrency(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_concurrent
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(ThumbfitConfig::default())
        .map_err(|e| ConfigError::Validation(format!("defaults do not serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist and `Err` if it exists but
/// is not valid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ThumbfitConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ThumbfitConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`, falling back to stock defaults when
/// it does not exist.
pub fn load_config(path: &Path) -> Result<ThumbfitConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `thumbfit.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbfit Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Thumbnail geometry and starting quality
# ---------------------------------------------------------------------------
[thumbnail]
# Bounds the thumbnail must fit inside, in pixels.
max_width = 240
max_height = 240

# Quality of the first encode, in (0, 1]. Lowered in 0.1 steps until the
# encoded thumbnail fits the budget; gives up at 0.1.
quality = 1.0

# Elongation threshold for fit = "canvas". Images whose aspect ratio
# exceeds it are cropped to the baseline edge instead of fitted.
scale = 1.0

# "proportional": scale to fit inside the bounds.
# "canvas": draw onto a fixed canvas at computed offsets, cropping overflow.
fit = "proportional"

# ---------------------------------------------------------------------------
# Size budget
# ---------------------------------------------------------------------------
[budget]
# Content limit of one protocol message, in bytes.
max_message_content_bytes = 131072

# Bytes kept free for the rest of the message.
# The thumbnail's estimated encoded size must not exceed limit - reserve.
reserve_bytes = 10240

# ---------------------------------------------------------------------------
# Timeouts
# ---------------------------------------------------------------------------
[timeouts]
# Bound on each decode / compress / measure / encode step.
operation_secs = 10

# Bound on a whole resolution, quality retries included.
# Defaults to 10 x operation_secs.
# resolve_secs = 100

# ---------------------------------------------------------------------------
# Video
# ---------------------------------------------------------------------------
[video]
# Frame position used for video thumbnails (first frames are often black).
# Clips shorter than twice this use their midpoint.
seek_offset_ms = 100

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum thumbnails generated at once in batch mode.
# Omit to use all CPU cores. Values above the core count are clamped.
# max_concurrent = 4
"##
}
