//! Mini-program backend.
//!
//! Mini-program hosts expose a sandboxed file system: every readable path
//! lives under one user-data root, temporary outputs go to a subdirectory of
//! it, and the file manager returns base64 directly (no data-URI wrapper).

use super::backend::{
    Capabilities, CompressedHandle, MediaBackend, MediaError, MediaInfo, MediaInput, MediaSource,
};
use super::codec;
use super::file_store::FileStore;
use super::native_backend::BASE64_OVERHEAD;
use super::params::{Quality, TargetGeometry};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Component, Path, PathBuf};

pub struct MiniProgramBackend {
    root: PathBuf,
    store: FileStore,
}

impl MiniProgramBackend {
    /// Sandbox rooted at `root`; outputs go to `root/tmp`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let store = FileStore::new(root.join("tmp"), "mp");
        Self { root, store }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject anything that could escape the sandbox.
    fn sandboxed<'a>(&self, path: &'a Path) -> Result<&'a Path, MediaError> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(MediaError::InvalidMediaReference(format!(
                "{} is outside the sandbox {}",
                path.display(),
                self.root.display()
            )));
        }
        Ok(path)
    }

    async fn read_source(&self, source: &MediaSource) -> Result<Vec<u8>, MediaError> {
        match source {
            MediaSource::Path(path) => {
                let path = self.sandboxed(path)?;
                tokio::fs::read(path).await.map_err(|e| {
                    MediaError::InvalidMediaReference(format!("{}: {e}", path.display()))
                })
            }
            MediaSource::Bytes { .. } => Err(MediaError::InvalidMediaReference(
                "mini-program backend only opens sandbox paths".into(),
            )),
        }
    }

    async fn read_input(&self, input: MediaInput<'_>) -> Result<Vec<u8>, MediaError> {
        match input {
            MediaInput::Source(source) => self.read_source(source).await,
            MediaInput::Compressed(handle) => self.store.read(handle).await,
        }
    }
}

#[async_trait]
impl MediaBackend for MiniProgramBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accepts_bytes: false,
            accepts_paths: true,
            gif_passthrough: true,
            encoding_overhead: BASE64_OVERHEAD,
        }
    }

    async fn decode_dimensions_and_type(
        &self,
        source: &MediaSource,
    ) -> Result<MediaInfo, MediaError> {
        let bytes = self.read_source(source).await?;
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
        self.store.write(encoded).await
    }

    async fn byte_size(&self, input: MediaInput<'_>) -> Result<u64, MediaError> {
        match input {
            MediaInput::Source(MediaSource::Path(path)) => {
                let path = self.sandboxed(path)?;
                tokio::fs::metadata(path)
                    .await
                    .map(|m| m.len())
                    .map_err(|_| MediaError::NotFound(path.display().to_string()))
            }
            MediaInput::Source(MediaSource::Bytes { .. }) => Err(MediaError::InvalidMediaReference(
                "mini-program backend only opens sandbox paths".into(),
            )),
            MediaInput::Compressed(handle) => self.store.len(handle).await,
        }
    }

    async fn encode_base64(&self, input: MediaInput<'_>) -> Result<String, MediaError> {
        let bytes = self.read_input(input).await.map_err(|e| match e {
            MediaError::NotFound(what) => MediaError::Read(format!("failed to read {what}")),
            other => other,
        })?;
        Ok(STANDARD.encode(bytes))
    }

    async fn release(&self, handle: &CompressedHandle) {
        self.store.remove(handle).await;
    }
}
