//! Size-bounded thumbnail generation.
//!
//! | Stage | Where |
//! |---|---|
//! | **Geometry** | [`calculate_size`], [`calc_position`], [`plan_geometry`] |
//! | **Platform work** | [`MediaBackend`]: canvas, native, mini-program |
//! | **Quality search** | [`CompressionEngine`] |
//! | **Entry point** | [`Resolver`] |
//! | **Video** | [`FrameExtractor`] → one still frame |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Quality, budget, timeouts and geometry types
//! - **Backend**: [`MediaBackend`] trait + the three platform backends
//! - **Engine / Resolver**: the compression loop and the pipeline around it

pub mod backend;
mod calculations;
mod canvas_backend;
pub(crate) mod codec;
pub mod engine;
mod file_store;
mod mini_program_backend;
mod native_backend;
pub mod params;
pub mod resolver;
pub mod video;

pub use backend::{
    Capabilities, CompressedHandle, MediaBackend, MediaError, MediaInfo, MediaInput, MediaSource,
};
pub use calculations::{calc_position, calculate_display_size, calculate_size, plan_geometry};
pub use canvas_backend::CanvasBackend;
pub use engine::{CompressionEngine, EngineError, EngineOutput, ReleaseGuard};
pub use mini_program_backend::MiniProgramBackend;
pub use native_backend::NativeBackend;
pub use params::{
    Dimensions, FitMode, Placement, Quality, SizeBudget, TargetGeometry, ThumbnailConfig,
    ThumbnailOverrides, Timeouts,
};
pub use resolver::{
    ErrorKind, ResolvedImage, Resolver, ThumbnailError, ThumbnailResult, strip_data_uri_prefix,
};
pub use video::{FfmpegFrameExtractor, FrameExtractor};
