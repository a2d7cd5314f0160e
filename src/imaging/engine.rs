//! Thumbnail compression engine.
//!
//! Given a source and its target geometry, the engine searches downward in
//! quality until the encoded output fits the [`SizeBudget`]:
//!
//! ```text
//! compress(input, geometry, q) → measure → fits? ──yes──▶ done
//!                                            │
//!                                            no
//!                                            ▼
//!                         q − 0.1 ≤ MIN_QUALITY? ──yes──▶ BudgetExceeded
//!                                            │
//!                                            no → input = last output, repeat
//! ```
//!
//! Quality only ever decreases and each pass re-encodes the previous output,
//! so the loop is bounded by [`Quality::max_attempts`]. The bound is also
//! enforced as an explicit cap in case a backend misreports sizes.
//!
//! Outputs the search still owns can be listed in a [`ReleaseGuard`], so a
//! resolution abandoned mid-search (timed out or dropped) still frees them.

use super::backend::{CompressedHandle, MediaBackend, MediaError, MediaInput, MediaSource};
use super::params::{Dimensions, Quality, SizeBudget, TargetGeometry};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Compression produced an empty output")]
    InvalidMedia,
    #[error(
        "Cannot fit thumbnail in {budget} bytes: estimated {last_estimate:.0} bytes at quality {quality:.2}"
    )]
    BudgetExceeded {
        last_estimate: f64,
        budget: u64,
        quality: f32,
    },
}

/// Run one adapter operation under `limit`.
pub async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    work: impl Future<Output = Result<T, MediaError>>,
) -> Result<T, MediaError> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?limit, "media operation timed out");
            Err(MediaError::Timeout {
                operation,
                after: limit,
            })
        }
    }
}

/// Compressed outputs a resolution still owns.
///
/// Dropping the guard with outputs still listed releases them on a
/// background task of the current runtime.
pub struct ReleaseGuard {
    backend: Arc<dyn MediaBackend>,
    live: Mutex<Vec<CompressedHandle>>,
}

impl ReleaseGuard {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn track(&self, handle: &CompressedHandle) {
        if let Ok(mut live) = self.live.lock() {
            live.push(handle.clone());
        }
    }

    /// Stop owning `handle`; call once it has been released.
    pub fn forget(&self, handle: &CompressedHandle) {
        if let Ok(mut live) = self.live.lock() {
            live.retain(|h| h != handle);
        }
    }

    pub fn live(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or_default()
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let abandoned = match self.live.get_mut() {
            Ok(live) => std::mem::take(live),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        if abandoned.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(count = abandoned.len(), "releasing outputs of an abandoned resolution");
                let backend = Arc::clone(&self.backend);
                runtime.spawn(async move {
                    for handle in &abandoned {
                        backend.release(handle).await;
                    }
                });
            }
            Err(_) => warn!(
                count = abandoned.len(),
                "no runtime left to release abandoned outputs"
            ),
        }
    }
}

/// One step of the search. Each iteration builds the next state rather than
/// mutating this one.
#[derive(Debug, Clone)]
struct CompressionState {
    input: Option<CompressedHandle>,
    geometry: TargetGeometry,
    quality: Quality,
    attempt: u32,
}

impl CompressionState {
    fn initial(geometry: TargetGeometry, quality: Quality) -> Self {
        Self {
            input: None,
            geometry,
            quality,
            attempt: 0,
        }
    }

    /// Re-encode `output` at `quality`. The output is already placed on the
    /// canvas, so later passes draw it 1:1.
    fn next(&self, output: CompressedHandle, quality: Quality) -> Self {
        Self {
            input: Some(output),
            geometry: TargetGeometry::identity(self.geometry.canvas),
            quality,
            attempt: self.attempt + 1,
        }
    }

    fn media_input<'a>(&'a self, source: &'a MediaSource) -> MediaInput<'a> {
        match &self.input {
            Some(handle) => MediaInput::Compressed(handle),
            None => MediaInput::Source(source),
        }
    }
}

/// A compressed output that fits the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub handle: CompressedHandle,
    pub dimensions: Dimensions,
    pub quality: Quality,
    /// Compress calls made, including the successful one.
    pub attempts: u32,
    pub byte_size: u64,
    pub estimated_size: f64,
}

/// Drives a [`MediaBackend`] through the quality search.
pub struct CompressionEngine<'a, B: MediaBackend + ?Sized> {
    backend: &'a B,
    budget: SizeBudget,
    operation_timeout: Duration,
    guard: Option<&'a ReleaseGuard>,
}

impl<'a, B: MediaBackend + ?Sized> CompressionEngine<'a, B> {
    pub fn new(backend: &'a B, budget: SizeBudget, operation_timeout: Duration) -> Self {
        Self {
            backend,
            budget,
            operation_timeout,
            guard: None,
        }
    }

    /// List every output the search owns in `guard` while it runs. A
    /// successful output stays listed until the caller forgets it.
    pub fn with_release_guard(mut self, guard: &'a ReleaseGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Compress `source` onto `geometry`, starting at `quality`.
    ///
    /// Intermediate outputs are released as soon as they are superseded. On
    /// failure nothing is left behind; on success the caller owns the
    /// returned handle.
    pub async fn run(
        &self,
        source: &MediaSource,
        geometry: TargetGeometry,
        quality: Quality,
    ) -> Result<EngineOutput, EngineError> {
        let overhead = self.backend.capabilities().encoding_overhead;
        let max_attempts = quality.max_attempts();
        let mut state = CompressionState::initial(geometry, quality);

        loop {
            if state.attempt >= max_attempts {
                // Unreachable with a well-behaved quality schedule.
                self.release_input(&state).await;
                return Err(EngineError::BudgetExceeded {
                    last_estimate: f64::NAN,
                    budget: self.budget.bytes(),
                    quality: state.quality.value(),
                });
            }

            let compressed = bounded(
                "compress",
                self.operation_timeout,
                self.backend.compress_to_quality(
                    state.media_input(source),
                    state.geometry,
                    state.quality,
                ),
            )
            .await;
            // The previous output has served as input; it's no longer needed.
            self.release_input(&state).await;
            let handle = compressed?;
            if let Some(guard) = self.guard {
                guard.track(&handle);
            }

            let size = match bounded(
                "measure",
                self.operation_timeout,
                self.backend.byte_size(MediaInput::Compressed(&handle)),
            )
            .await
            {
                Ok(size) => size,
                Err(e) => {
                    self.release(&handle).await;
                    return Err(e.into());
                }
            };

            if size == 0 {
                self.release(&handle).await;
                return Err(EngineError::InvalidMedia);
            }

            let estimate = size as f64 * overhead;
            debug!(
                attempt = state.attempt + 1,
                quality = state.quality.value(),
                size,
                estimate,
                budget = self.budget.bytes(),
                "compression pass"
            );

            if self.budget.admits(estimate) {
                return Ok(EngineOutput {
                    handle,
                    dimensions: state.geometry.canvas,
                    quality: state.quality,
                    attempts: state.attempt + 1,
                    byte_size: size,
                    estimated_size: estimate,
                });
            }

            match quality.stepped(state.attempt + 1) {
                Some(next_quality) => state = state.next(handle, next_quality),
                None => {
                    self.release(&handle).await;
                    warn!(
                        estimate,
                        budget = self.budget.bytes(),
                        quality = state.quality.value(),
                        "quality floor reached"
                    );
                    return Err(EngineError::BudgetExceeded {
                        last_estimate: estimate,
                        budget: self.budget.bytes(),
                        quality: state.quality.value(),
                    });
                }
            }
        }
    }

    async fn release_input(&self, state: &CompressionState) {
        if let Some(handle) = &state.input {
            self.release(handle).await;
        }
    }

    async fn release(&self, handle: &CompressedHandle) {
        self.backend.release(handle).await;
        if let Some(guard) = self.guard {
            guard.forget(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};

    const BUDGET: u64 = 1000;

    fn engine(backend: &MockBackend) -> CompressionEngine<'_, MockBackend> {
        CompressionEngine::new(
            backend,
            SizeBudget::with_reserve(BUDGET, 0),
            Duration::from_secs(10),
        )
    }

    fn geometry() -> TargetGeometry {
        TargetGeometry::identity(Dimensions::new(120, 240))
    }

    fn source() -> MediaSource {
        MediaSource::path("/photos/big.jpg")
    }

    fn compress_qualities(backend: &MockBackend) -> Vec<u8> {
        backend
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Compress { quality, .. } => Some(quality),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn fits_on_first_pass() {
        let backend = MockBackend::new(1000, 2000, "image/jpeg").with_sizes(&[800]);
        let out = engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap();

        assert_eq!(out.attempts, 1);
        assert_eq!(out.quality, Quality::default());
        assert_eq!(out.dimensions, Dimensions::new(120, 240));
        assert_eq!(out.byte_size, 800);
        assert_eq!(compress_qualities(&backend), vec![100]);
    }

    #[tokio::test]
    async fn steps_quality_until_it_fits() {
        let backend = MockBackend::new(1000, 2000, "image/jpeg").with_sizes(&[4000, 2500, 1200, 900]);
        let out = engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap();

        assert_eq!(out.attempts, 4);
        assert!((out.quality.value() - 0.7).abs() < 1e-4);
        assert_eq!(compress_qualities(&backend), vec![100, 90, 80, 70]);
    }

    #[tokio::test]
    async fn later_passes_recompress_previous_output() {
        let backend = MockBackend::new(1000, 2000, "image/jpeg").with_sizes(&[4000, 900]);
        engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap();

        let inputs: Vec<String> = backend
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Compress { input, .. } => Some(input),
                _ => None,
            })
            .collect();
        assert_eq!(inputs, vec!["/photos/big.jpg".to_string(), "mock-1".to_string()]);
        // The superseded output is released once it has been consumed.
        assert!(backend
            .get_operations()
            .contains(&RecordedOp::Release("mock-1".to_string())));
    }

    #[tokio::test]
    async fn overhead_factor_applies_to_measured_size() {
        // 800 bytes fit raw but not at ×1.35.
        let backend = MockBackend::new(10, 10, "image/jpeg")
            .with_sizes(&[800, 700])
            .with_overhead(1.35);
        let out = engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap();
        assert_eq!(out.attempts, 2);
        assert!((out.estimated_size - 945.0).abs() < 1e-9);
        assert!(out.estimated_size <= BUDGET as f64);
    }

    #[tokio::test]
    async fn gives_up_at_quality_floor() {
        let backend = MockBackend::new(5000, 5000, "image/jpeg").with_sizes(&[2_000_000]);
        let err = engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::BudgetExceeded { budget: BUDGET, .. }));
        assert_eq!(
            compress_qualities(&backend),
            vec![100, 90, 80, 70, 60, 50, 40, 30, 20]
        );
        assert!(backend.compress_count() as u32 <= Quality::default().max_attempts());
    }

    #[tokio::test]
    async fn iteration_count_respects_bound_for_any_start() {
        for start in [1.0f32, 0.85, 0.5, 0.25, 0.12, 0.1, 0.05] {
            let backend = MockBackend::new(10, 10, "image/jpeg").with_sizes(&[u64::MAX / 4]);
            let quality = Quality::new(start);
            let result = engine(&backend).run(&source(), geometry(), quality).await;
            assert!(matches!(result, Err(EngineError::BudgetExceeded { .. })));
            assert!(
                backend.compress_count() as u32 <= quality.max_attempts(),
                "start {start}: {} attempts",
                backend.compress_count()
            );
            assert!(backend.compress_count() >= 1);
        }
    }

    #[tokio::test]
    async fn zero_byte_output_is_invalid_media() {
        let backend = MockBackend::new(10, 10, "image/jpeg").with_sizes(&[0]);
        let err = engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMedia));
        assert!(backend
            .get_operations()
            .contains(&RecordedOp::Release("mock-1".to_string())));
    }

    #[tokio::test]
    async fn codec_rejection_propagates() {
        let backend = MockBackend::new(10, 10, "image/jpeg").failing_compress();
        let err = engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Media(MediaError::CompressionFailed(_))
        ));
    }

    // =========================================================================
    // ReleaseGuard
    // =========================================================================

    #[tokio::test]
    async fn guard_tracks_only_the_surviving_output() {
        let backend = Arc::new(MockBackend::new(10, 10, "image/jpeg").with_sizes(&[4000, 2500, 900]));
        let guard = ReleaseGuard::new(backend.clone());
        let out = engine(&backend)
            .with_release_guard(&guard)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap();

        assert_eq!(out.handle, CompressedHandle::new("mock-3"));
        assert_eq!(guard.live(), 1);
        guard.forget(&out.handle);
        assert_eq!(guard.live(), 0);
    }

    #[tokio::test]
    async fn guard_is_empty_after_failed_search() {
        let backend = Arc::new(MockBackend::new(10, 10, "image/jpeg").with_sizes(&[2_000_000]));
        let guard = ReleaseGuard::new(backend.clone());
        let result = engine(&backend)
            .with_release_guard(&guard)
            .run(&source(), geometry(), Quality::default())
            .await;

        assert!(matches!(result, Err(EngineError::BudgetExceeded { .. })));
        assert_eq!(guard.live(), 0);
    }

    #[tokio::test]
    async fn dropped_guard_releases_what_it_still_owns() {
        let backend = Arc::new(MockBackend::new(10, 10, "image/jpeg"));
        let guard = ReleaseGuard::new(backend.clone());
        guard.track(&CompressedHandle::new("mock-7"));
        guard.track(&CompressedHandle::new("mock-8"));
        guard.forget(&CompressedHandle::new("mock-8"));
        drop(guard);

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Release("mock-7".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_compress_times_out() {
        let backend = MockBackend::new(10, 10, "image/jpeg")
            .with_compress_delay(Duration::from_secs(30));
        let err = engine(&backend)
            .run(&source(), geometry(), Quality::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Media(MediaError::Timeout {
                operation: "compress",
                ..
            })
        ));
    }
}
