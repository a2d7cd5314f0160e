//! Compressed outputs kept as files in a working directory.
//!
//! Shared by the file-based backends. Each handle is the path of one output
//! file; only paths under the store's directory are ever read or deleted.

use super::backend::{CompressedHandle, MediaError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct FileStore {
    dir: PathBuf,
    prefix: &'static str,
    next_id: AtomicU64,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: &'static str) -> Self {
        Self {
            dir: dir.into(),
            prefix,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path behind a handle, if this store issued it.
    pub fn path_of(&self, handle: &CompressedHandle) -> Result<PathBuf, MediaError> {
        let path = PathBuf::from(handle.key());
        if path.parent() == Some(self.dir.as_path()) {
            Ok(path)
        } else {
            Err(MediaError::NotFound(handle.to_string()))
        }
    }

    pub async fn write(&self, bytes: Vec<u8>) -> Result<CompressedHandle, MediaError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = self
            .dir
            .join(format!("{}-{}-{}.jpg", self.prefix, std::process::id(), id));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| MediaError::CompressionFailed(format!("failed to write output: {e}")))?;
        Ok(CompressedHandle::new(path.to_string_lossy()))
    }

    pub async fn len(&self, handle: &CompressedHandle) -> Result<u64, MediaError> {
        let path = self.path_of(handle)?;
        tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|_| MediaError::NotFound(handle.to_string()))
    }

    pub async fn read(&self, handle: &CompressedHandle) -> Result<Vec<u8>, MediaError> {
        let path = self.path_of(handle)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::NotFound(handle.to_string()),
            _ => MediaError::Read(format!("{}: {e}", path.display())),
        })
    }

    pub async fn remove(&self, handle: &CompressedHandle) {
        if let Ok(path) = self.path_of(handle) {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}
