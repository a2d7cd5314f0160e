//! Directory batch mode.
//!
//! Walks a directory for media files and thumbnails them concurrently through
//! one [`Resolver`]. At most `max_in_flight` resolutions run at once; every
//! file gets an outcome, failures included, so one bad file never stops the
//! batch.

use crate::imaging::backend::{is_supported_image, is_video, mime_from_extension};
use crate::imaging::{
    Capabilities, MediaSource, ResolvedImage, Resolver, ThumbnailError, ThumbnailOverrides,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Outcome for one file.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub path: PathBuf,
    pub outcome: Result<ResolvedImage, ThumbnailError>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// In file order.
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// Failures that only a smaller source could fix.
    pub fn too_large(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(&i.outcome, Err(e) if e.is_too_large()))
            .count()
    }

    pub fn passed_through(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(&i.outcome, Ok(r) if r.passthrough))
            .count()
    }
}

/// Media files under `root`, sorted by path.
///
/// Hidden directories below the root are skipped. Video files are included
/// only when `include_video` is set.
pub fn find_media(root: &Path, include_video: bool) -> Result<Vec<PathBuf>, BatchError> {
    if !root.is_dir() {
        return Err(BatchError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )));
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let wanted = mime_from_extension(entry.path())
            .is_some_and(|mime| is_supported_image(mime) || (include_video && is_video(mime)));
        if wanted {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with('.'))
}

/// Hand a file to the backend the way it can open it: by path when
/// supported, otherwise as bytes with the MIME type implied by its extension.
pub async fn open_source(
    path: &Path,
    capabilities: Capabilities,
) -> Result<MediaSource, ThumbnailError> {
    if capabilities.accepts_paths {
        return Ok(MediaSource::path(path));
    }
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ThumbnailError::InvalidMediaReference(format!("{}: {e}", path.display())))?;
    let mime = mime_from_extension(path).unwrap_or_default();
    Ok(MediaSource::bytes(data, mime))
}

/// Thumbnail every file in `files`, with at most `max_in_flight` running at once.
pub async fn run_batch(
    resolver: &Resolver,
    files: Vec<PathBuf>,
    overrides: Option<ThumbnailOverrides>,
    max_in_flight: usize,
) -> BatchReport {
    let max_in_flight = max_in_flight.max(1);
    let mut pending = files.into_iter().enumerate();
    let mut tasks: JoinSet<(usize, BatchItem)> = JoinSet::new();
    let mut done: Vec<(usize, BatchItem)> = Vec::new();

    loop {
        while tasks.len() < max_in_flight {
            let Some((index, path)) = pending.next() else {
                break;
            };
            let resolver = resolver.clone();
            tasks.spawn(async move {
                let outcome = match open_source(&path, resolver.capabilities()).await {
                    Ok(source) => resolver.resolve_with_info(&source, overrides.as_ref()).await,
                    Err(e) => Err(e),
                };
                (index, BatchItem { path, outcome })
            });
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined {
            Ok((index, item)) => {
                match &item.outcome {
                    Ok(r) => debug!(path = %item.path.display(), iterations = r.iterations, "done"),
                    Err(e) => warn!(path = %item.path.display(), error = %e, "failed"),
                }
                done.push((index, item));
            }
            Err(e) => warn!(error = %e, "batch task did not complete"),
        }
    }

    done.sort_by_key(|(index, _)| *index);
    BatchReport {
        items: done.into_iter().map(|(_, item)| item).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::{ErrorKind, MediaBackend, SizeBudget};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    // =========================================================================
    // find_media
    // =========================================================================

    #[test]
    fn finds_images_recursively_in_order() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("b.png"));
        touch(&tmp.path().join("a.JPG"));
        touch(&tmp.path().join("sub/c.gif"));
        touch(&tmp.path().join("notes.txt"));
        touch(&tmp.path().join(".cache/d.jpg"));
        touch(&tmp.path().join("clip.mp4"));

        let found = find_media(tmp.path(), false).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.JPG"),
                PathBuf::from("b.png"),
                PathBuf::from("sub/c.gif"),
            ]
        );
    }

    #[test]
    fn includes_video_on_request() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("clip.mp4"));
        touch(&tmp.path().join("photo.webp"));
        assert_eq!(find_media(tmp.path(), true).unwrap().len(), 2);
    }

    #[test]
    fn missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            find_media(&tmp.path().join("nope"), false),
            Err(BatchError::Io(_))
        ));
    }

    // =========================================================================
    // run_batch
    // =========================================================================

    #[tokio::test]
    async fn every_file_gets_an_outcome_in_order() {
        let backend = Arc::new(MockBackend::new(1000, 2000, "image/jpeg").with_sizes(&[500]));
        let resolver = Resolver::new(backend).with_budget(SizeBudget::with_reserve(1000, 0));
        let files: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("/p/{i}.jpg"))).collect();

        let report = run_batch(&resolver, files.clone(), None, 3).await;

        let paths: Vec<_> = report.items.iter().map(|i| i.path.clone()).collect();
        assert_eq!(paths, files);
        assert_eq!(report.succeeded(), 7);
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let backend = Arc::new(MockBackend::new(4000, 4000, "image/jpeg").with_sizes(&[90_000]));
        let resolver = Resolver::new(backend).with_budget(SizeBudget::with_reserve(1000, 0));
        let files = vec![PathBuf::from("/p/huge.jpg"), PathBuf::from("/p/huge2.jpg")];

        let report = run_batch(&resolver, files, None, 1).await;
        assert_eq!(report.failed(), 2);
        assert_eq!(report.too_large(), 2);
        let kind = report.items[0].outcome.as_ref().unwrap_err().kind();
        assert_eq!(kind, ErrorKind::CompressionBudgetExceeded);
    }

    #[tokio::test]
    async fn byte_only_backends_get_file_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.png");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        let caps = crate::imaging::CanvasBackend::new().capabilities();

        let source = open_source(&path, caps).await.unwrap();
        assert!(matches!(&source, MediaSource::Bytes { data, .. } if data.len() == 3));
        assert_eq!(source.declared_mime().as_deref(), Some("image/png"));

        let missing = open_source(&tmp.path().join("gone.png"), caps).await;
        assert_eq!(
            missing.unwrap_err().kind(),
            ErrorKind::InvalidMediaReference
        );
    }

    #[tokio::test]
    async fn empty_batch() {
        let backend = Arc::new(MockBackend::new(10, 10, "image/jpeg"));
        let report = run_batch(&Resolver::new(backend), Vec::new(), None, 4).await;
        assert!(report.items.is_empty());
    }
}
