//! Video thumbnails via a single still frame.
//!
//! Video never enters the compression engine directly. A [`FrameExtractor`]
//! seeks a little way into the clip (first frames are often black), grabs one
//! frame as a JPEG still, and that still is thumbnailed like any image.

use super::backend::{MediaError, MediaSource};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// How far into a clip the frame is taken by default.
pub const DEFAULT_SEEK_OFFSET: Duration = Duration::from_millis(100);

/// Where to grab the frame: `preferred`, but never past the middle of the clip.
///
/// A fixed offset would seek beyond the only frame of a very short clip.
pub fn seek_offset(preferred: Duration, duration: Duration) -> Duration {
    preferred.min(duration / 2)
}

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Length of the clip.
    async fn duration(&self, source: &MediaSource) -> Result<Duration, MediaError>;

    /// Encoded still (JPEG) of the frame at `at`.
    async fn extract_frame(&self, source: &MediaSource, at: Duration)
    -> Result<Vec<u8>, MediaError>;
}

/// Extracts frames by running `ffprobe` and `ffmpeg` from `PATH`.
///
/// Only file paths are supported; in-memory clips are rejected.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl FfmpegFrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use specific binaries instead of looking them up on `PATH`.
    pub fn with_binaries(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn clip_path(source: &MediaSource) -> Result<&Path, MediaError> {
        match source {
            MediaSource::Path(path) => Ok(path),
            MediaSource::Bytes { .. } => Err(MediaError::InvalidMediaReference(
                "ffmpeg frame extraction needs a file path".into(),
            )),
        }
    }

    async fn run(program: &str, args: &[&str]) -> Result<Vec<u8>, MediaError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MediaError::Decode(format!("failed to run {program}: {e}")))?;
        if !output.status.success() {
            return Err(MediaError::Decode(format!(
                "{program} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Parse `ffprobe`'s plain seconds output, e.g. `"12.345000\n"`.
fn parse_duration(stdout: &[u8]) -> Result<Duration, MediaError> {
    let text = String::from_utf8_lossy(stdout);
    let seconds: f64 = text
        .trim()
        .parse()
        .map_err(|_| MediaError::Decode(format!("unexpected duration: {:?}", text.trim())))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| MediaError::Decode(format!("invalid duration {seconds}: {e}")))
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn duration(&self, source: &MediaSource) -> Result<Duration, MediaError> {
        let path = Self::clip_path(source)?.to_string_lossy().into_owned();
        let stdout = Self::run(
            &self.ffprobe,
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                &path,
            ],
        )
        .await?;
        parse_duration(&stdout)
    }

    async fn extract_frame(
        &self,
        source: &MediaSource,
        at: Duration,
    ) -> Result<Vec<u8>, MediaError> {
        let path = Self::clip_path(source)?.to_string_lossy().into_owned();
        let seek = format!("{:.3}", at.as_secs_f64());
        debug!(clip = %path, seek = %seek, "extracting video frame");
        let frame = Self::run(
            &self.ffmpeg,
            &[
                "-v", "error", "-ss", &seek, "-i", &path, "-frames:v", "1", "-f", "image2pipe",
                "-vcodec", "mjpeg", "-",
            ],
        )
        .await?;
        if frame.is_empty() {
            return Err(MediaError::Decode(format!("no frame at {seek}s in {path}")));
        }
        Ok(frame)
    }
}
