//! Host-native backend.
//!
//! Compresses through the OS-level codec path (here: the `image` crate on a
//! blocking thread), keeps outputs as files in a working directory, and reads
//! them back as a data URI. The read is wrapped in its own timeout because
//! native file readers offer no cancellation.
//!
//! Accepts both byte buffers and file paths. Sizes are raw file bytes, so the
//! declared encoding overhead covers the base64 expansion (×1.35).

use super::backend::{
    Capabilities, CompressedHandle, MediaBackend, MediaError, MediaInfo, MediaInput, MediaSource,
};
use super::codec;
use super::file_store::FileStore;
use super::params::{DEFAULT_OPERATION_TIMEOUT, Quality, TargetGeometry};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Base64 text is 4/3 of the binary size plus framing; measured at about 1.35.
pub const BASE64_OVERHEAD: f64 = 1.35;

pub struct NativeBackend {
    store: FileStore,
    read_timeout: Duration,
    /// Owns the work dir when it was created for this backend; removed on drop.
    scratch: Option<tempfile::TempDir>,
}

impl NativeBackend {
    /// Backend writing its outputs under `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: FileStore::new(work_dir, "native"),
            read_timeout: DEFAULT_OPERATION_TIMEOUT,
            scratch: None,
        }
    }

    /// Backend using a fresh directory under the system temp dir. The
    /// directory is deleted, with anything left in it, when the backend is
    /// dropped.
    pub fn in_temp_dir() -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new().prefix("thumbfit-").tempdir()?;
        let mut backend = Self::new(scratch.path());
        backend.scratch = Some(scratch);
        Ok(backend)
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn work_dir(&self) -> &Path {
        self.store.dir()
    }

    async fn read_input(&self, input: MediaInput<'_>) -> Result<Arc<[u8]>, MediaError> {
        match input {
            MediaInput::Source(source) => read_source(source).await,
            MediaInput::Compressed(handle) => Ok(self.store.read(handle).await?.into()),
        }
    }
}

/// Bytes of a caller's source, from memory or disk.
pub(crate) async fn read_source(source: &MediaSource) -> Result<Arc<[u8]>, MediaError> {
    match source {
        MediaSource::Bytes { data, .. } => Ok(data.clone()),
        MediaSource::Path(path) => tokio::fs::read(path).await.map(Into::into).map_err(|e| {
            MediaError::InvalidMediaReference(format!("{}: {e}", path.display()))
        }),
    }
}

#[async_trait]
impl MediaBackend for NativeBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accepts_bytes: true,
            accepts_paths: true,
            gif_passthrough: true,
            encoding_overhead: BASE64_OVERHEAD,
        }
    }

    async fn decode_dimensions_and_type(
        &self,
        source: &MediaSource,
    ) -> Result<MediaInfo, MediaError> {
        let bytes = read_source(source).await?;
        codec::blocking(move || codec::probe(&bytes)).await
    }

    async fn compress_to_quality(
        &self,
        input: MediaInput<'_>,
        geometry: TargetGeometry,
        quality: Quality,
    ) -> Result<CompressedHandle, MediaError> {
        let bytes = self.read_input(input).await?;
        let encoded = codec::blocking(move || codec::render_jpeg(&bytes, geometry, quality)).await?;
        let handle = self.store.write(encoded).await?;
        debug!(%handle, "native output written");
        Ok(handle)
    }

    async fn byte_size(&self, input: MediaInput<'_>) -> Result<u64, MediaError> {
        match input {
            MediaInput::Source(MediaSource::Bytes { data, .. }) => Ok(data.len() as u64),
            MediaInput::Source(MediaSource::Path(path)) => tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .map_err(|_| MediaError::NotFound(path.display().to_string())),
            MediaInput::Compressed(handle) => self.store.len(handle).await,
        }
    }

    async fn encode_base64(&self, input: MediaInput<'_>) -> Result<String, MediaError> {
        let mime = match input {
            MediaInput::Source(source) => source
                .declared_mime()
                .unwrap_or_else(|| "image/jpeg".to_string()),
            MediaInput::Compressed(_) => "image/jpeg".to_string(),
        };
        let bytes = tokio::time::timeout(self.read_timeout, self.read_input(input))
            .await
            .map_err(|_| MediaError::Timeout {
                operation: "read as data URI",
                after: self.read_timeout,
            })?
            .map_err(|e| match e {
                MediaError::NotFound(what) => MediaError::Read(format!("missing output {what}")),
                other => other,
            })?;
        Ok(format!("data:{};base64,{}", mime, STANDARD.encode(&bytes)))
    }

    async fn release(&self, handle: &CompressedHandle) {
        self.store.remove(handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::codec::tests::jpeg_bytes;
    use crate::imaging::params::Dimensions;

    #[tokio::test]
    async fn decode_from_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("photo.jpg");
        std::fs::write(&path, jpeg_bytes(200, 150, false)).unwrap();

        let backend = NativeBackend::new(tmp.path().join("work"));
        let info = backend
            .decode_dimensions_and_type(&MediaSource::path(&path))
            .await
            .unwrap();
        assert_eq!(info.dimensions(), Dimensions::new(200, 150));
    }

    #[tokio::test]
    async fn temp_work_dir_is_removed_on_drop() {
        let backend = NativeBackend::in_temp_dir().unwrap();
        let work_dir = backend.work_dir().to_path_buf();
        let source = MediaSource::bytes(jpeg_bytes(64, 48, false), "image/jpeg");
        let handle = backend
            .compress_to_quality(
                MediaInput::Source(&source),
                TargetGeometry::identity(Dimensions::new(32, 24)),
                Quality::new(0.9),
            )
            .await
            .unwrap();
        assert!(PathBuf::from(handle.key()).exists());

        drop(backend);
        assert!(!work_dir.exists());
    }

    #[tokio::test]
    async fn missing_path_is_invalid_reference() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = NativeBackend::new(tmp.path().join("work"));
        let result = backend
            .decode_dimensions_and_type(&MediaSource::path("/nonexistent/image.jpg"))
            .await;
        assert!(matches!(result, Err(MediaError::InvalidMediaReference(_))));
    }

    #[tokio::test]
    async fn outputs_are_files_in_work_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = NativeBackend::new(tmp.path().join("work"));
        let source = MediaSource::bytes(jpeg_bytes(400, 300, false), "image/jpeg");

        let handle = backend
            .compress_to_quality(
                MediaInput::Source(&source),
                TargetGeometry::identity(Dimensions::new(200, 150)),
                Quality::new(0.9),
            )
            .await
            .unwrap();
        let path = PathBuf::from(handle.key());
        assert!(path.starts_with(backend.work_dir()));

        let size = backend
            .byte_size(MediaInput::Compressed(&handle))
            .await
            .unwrap();
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());

        let encoded = backend
            .encode_base64(MediaInput::Compressed(&handle))
            .await
            .unwrap();
        assert!(encoded.starts_with("data:image/jpeg;base64,"));

        backend.release(&handle).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn encoding_a_released_output_is_a_read_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = NativeBackend::new(tmp.path().join("work"));
        let source = MediaSource::bytes(jpeg_bytes(64, 64, false), "image/jpeg");
        let handle = backend
            .compress_to_quality(
                MediaInput::Source(&source),
                TargetGeometry::identity(Dimensions::new(32, 32)),
                Quality::default(),
            )
            .await
            .unwrap();
        backend.release(&handle).await;

        let result = backend.encode_base64(MediaInput::Compressed(&handle)).await;
        assert!(matches!(result, Err(MediaError::Read(_))));
    }

    #[tokio::test]
    async fn source_size_for_path_is_file_length() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a.gif");
        std::fs::write(&path, b"GIF89a-not-really").unwrap();
        let backend = NativeBackend::new(tmp.path().join("work"));

        let source = MediaSource::path(&path);
        let size = backend.byte_size(MediaInput::Source(&source)).await.unwrap();
        assert_eq!(size, 17);
    }
}
