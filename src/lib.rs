//! # thumbfit
//!
//! Thumbnails that fit a message protocol's size limit.
//!
//! A chat message carrying an image preview has a hard content limit. The
//! thumbnail is embedded as base64 text, so it must be small in pixels *and*
//! small in bytes once encoded. thumbfit produces such thumbnails from images
//! (and from a single frame of a video) on any of several platform backends.
//!
//! # Architecture: Resolve → Plan → Compress
//!
//! ```text
//! 1. Resolve   source    →  dimensions + MIME      (via the platform backend)
//! 2. Plan      dims      →  target geometry        (pure functions)
//! 3. Compress  geometry  →  JPEG under the budget  (quality search, 1.0 → 0.1)
//! ```
//!
//! Only stage 2 is pure; stages 1 and 3 go through the [`imaging::MediaBackend`]
//! trait, so the same pipeline runs against in-memory buffers, a native file
//! store, or a sandboxed mini-program file system.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Geometry, backends, compression engine, resolver, video frames |
//! | [`config`] | `thumbfit.toml` loading, validation, and merging |
//! | [`batch`] | Directory walking and concurrent resolution |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Quality-Only Search
//!
//! Pixel dimensions are fixed once, up front. The search then only lowers
//! JPEG quality in 0.1 steps, re-encoding the previous output each pass. A
//! one-dimensional monotone search is bounded (at most ten passes from 1.0)
//! and in practice fits within one to three passes.
//!
//! ## Budgeting the Encoded Size
//!
//! The budget is the protocol limit minus a reserve for the rest of the
//! message (128 KiB − 10 KiB by default). Backends that measure raw bytes
//! declare a 1.35 overhead factor for base64 expansion; the canvas backend
//! measures the data-URI string itself and declares 1.0.
//!
//! ## Animated GIFs Pass Through
//!
//! Re-encoding an animated GIF as JPEG would keep one frame. GIFs are
//! returned as-is when the backend supports it.
//!
//! ## Capabilities, Not Platform Checks
//!
//! Backends declare what they accept and how they measure in
//! [`imaging::Capabilities`]. Nothing above the backend asks which platform
//! it is running on.

pub mod batch;
pub mod config;
pub mod imaging;
pub mod output;
