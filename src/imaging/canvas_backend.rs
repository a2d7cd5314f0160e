//! Off-screen canvas backend.
//!
//! Works purely in memory, the way a browser draws into a hidden canvas and
//! serializes it with `toDataURL`. Sources must be byte buffers; there is no
//! file access. Compressed outputs live in an internal table keyed by handle.
//!
//! Size accounting measures the data-URI *string* that will be embedded, so
//! the encoding overhead is already included and the declared factor is 1.0.

use super::backend::{
    Capabilities, CompressedHandle, MediaBackend, MediaError, MediaInfo, MediaInput, MediaSource,
};
use super::codec;
use super::params::{Quality, TargetGeometry};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

const OUTPUT_MIME: &str = "image/jpeg";

/// In-memory backend with data-URI output.
#[derive(Default)]
pub struct CanvasBackend {
    buffers: Mutex<HashMap<String, Arc<[u8]>>>,
    next_id: AtomicU64,
}

impl CanvasBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of compressed buffers currently held.
    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or_default()
    }

    fn lookup(&self, handle: &CompressedHandle) -> Result<Arc<[u8]>, MediaError> {
        let buffers = self
            .buffers
            .lock()
            .map_err(|_| MediaError::NotFound(handle.to_string()))?;
        buffers
            .get(handle.key())
            .cloned()
            .ok_or_else(|| MediaError::NotFound(handle.to_string()))
    }

    /// Bytes and MIME type behind an input.
    fn resolve_input(&self, input: MediaInput<'_>) -> Result<(Arc<[u8]>, String), MediaError> {
        match input {
            MediaInput::Source(MediaSource::Bytes { data, mime }) => {
                let mime = codec::sniff_mime(data)
                    .map(str::to_string)
                    .unwrap_or_else(|| mime.clone());
                Ok((data.clone(), mime))
            }
            MediaInput::Source(MediaSource::Path(path)) => Err(MediaError::InvalidMediaReference(
                format!("canvas backend cannot open paths: {}", path.display()),
            )),
            MediaInput::Compressed(handle) => Ok((self.lookup(handle)?, OUTPUT_MIME.to_string())),
        }
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Length of `data:<mime>;base64,<payload>` without building it.
fn data_uri_len(mime: &str, byte_len: usize) -> u64 {
    let prefix = "data:".len() + mime.len() + ";base64,".len();
    (prefix + byte_len.div_ceil(3) * 4) as u64
}

#[async_trait]
impl MediaBackend for CanvasBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accepts_bytes: true,
            accepts_paths: false,
            gif_passthrough: true,
            encoding_overhead: 1.0,
        }
    }

    async fn decode_dimensions_and_type(
        &self,
        source: &MediaSource,
    ) -> Result<MediaInfo, MediaError> {
        let (bytes, _) = self.resolve_input(MediaInput::Source(source))?;
        codec::blocking(move || codec::probe(&bytes)).await
    }

    async fn compress_to_quality(
        &self,
        input: MediaInput<'_>,
        geometry: TargetGeometry,
        quality: Quality,
    ) -> Result<CompressedHandle, MediaError> {
        let (bytes, _) = self.resolve_input(input)?;
        let encoded = codec::blocking(move || codec::render_jpeg(&bytes, geometry, quality)).await?;

        let key = format!("canvas-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(handle = %key, bytes = encoded.len(), "canvas buffer encoded");
        self.buffers
            .lock()
            .map_err(|_| MediaError::CompressionFailed("canvas buffer table poisoned".into()))?
            .insert(key.clone(), encoded.into());
        Ok(CompressedHandle::new(key))
    }

    async fn byte_size(&self, input: MediaInput<'_>) -> Result<u64, MediaError> {
        let (bytes, mime) = self.resolve_input(input)?;
        Ok(data_uri_len(&mime, bytes.len()))
    }

    async fn encode_base64(&self, input: MediaInput<'_>) -> Result<String, MediaError> {
        let (bytes, mime) = self.resolve_input(input).map_err(|e| match e {
            MediaError::NotFound(key) => MediaError::Read(format!("no canvas buffer {key}")),
            other => other,
        })?;
        Ok(data_uri(&mime, &bytes))
    }

    async fn release(&self, handle: &CompressedHandle) {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.remove(handle.key());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::codec::tests::{gif_bytes, jpeg_bytes};
    use crate::imaging::params::Dimensions;

    #[test]
    fn data_uri_len_matches_built_string() {
        for len in [0usize, 1, 2, 3, 4, 100, 1001] {
            let bytes = vec![7u8; len];
            assert_eq!(
                data_uri_len("image/jpeg", len),
                data_uri("image/jpeg", &bytes).len() as u64
            );
        }
    }

    #[tokio::test]
    async fn decode_reads_sniffed_type() {
        let backend = CanvasBackend::new();
        // Declared type is wrong; the header wins.
        let source = MediaSource::bytes(gif_bytes(30, 20), "image/png");
        let info = backend.decode_dimensions_and_type(&source).await.unwrap();
        assert_eq!(info.dimensions(), Dimensions::new(30, 20));
        assert_eq!(info.mime, "image/gif");
    }

    #[tokio::test]
    async fn rejects_path_sources() {
        let backend = CanvasBackend::new();
        let result = backend
            .decode_dimensions_and_type(&MediaSource::path("/tmp/a.jpg"))
            .await;
        assert!(matches!(result, Err(MediaError::InvalidMediaReference(_))));
    }

    #[tokio::test]
    async fn compress_measure_encode_release() {
        let backend = CanvasBackend::new();
        let source = MediaSource::bytes(jpeg_bytes(400, 200, false), "image/jpeg");
        let geometry = TargetGeometry::identity(Dimensions::new(240, 120));

        let handle = backend
            .compress_to_quality(MediaInput::Source(&source), geometry, Quality::new(0.8))
            .await
            .unwrap();
        assert_eq!(backend.live_buffers(), 1);

        let size = backend
            .byte_size(MediaInput::Compressed(&handle))
            .await
            .unwrap();
        let encoded = backend
            .encode_base64(MediaInput::Compressed(&handle))
            .await
            .unwrap();
        assert!(encoded.starts_with("data:image/jpeg;base64,"));
        assert_eq!(size, encoded.len() as u64);

        backend.release(&handle).await;
        assert_eq!(backend.live_buffers(), 0);
        assert!(matches!(
            backend.byte_size(MediaInput::Compressed(&handle)).await,
            Err(MediaError::NotFound(_))
        ));
        assert!(matches!(
            backend.encode_base64(MediaInput::Compressed(&handle)).await,
            Err(MediaError::Read(_))
        ));
    }

    #[tokio::test]
    async fn recompressing_an_output_keeps_canvas_size() {
        let backend = CanvasBackend::new();
        let source = MediaSource::bytes(jpeg_bytes(300, 300, true), "image/jpeg");
        let geometry = TargetGeometry::identity(Dimensions::new(100, 100));

        let first = backend
            .compress_to_quality(MediaInput::Source(&source), geometry, Quality::new(1.0))
            .await
            .unwrap();
        let second = backend
            .compress_to_quality(MediaInput::Compressed(&first), geometry, Quality::new(0.5))
            .await
            .unwrap();
        assert_ne!(first, second);

        let encoded = backend
            .encode_base64(MediaInput::Compressed(&second))
            .await
            .unwrap();
        let payload = encoded.trim_start_matches("data:image/jpeg;base64,");
        let bytes = STANDARD.decode(payload).unwrap();
        let info = codec::probe(&bytes).unwrap();
        assert_eq!(info.dimensions(), Dimensions::new(100, 100));
    }
}
