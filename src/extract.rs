use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use relative_path::{RelativePath, RelativePathBuf};
use tempfile::TempDir;

use crate::storage::Storage;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Could not create extraction session directory")]
    CreateSessionFailed(#[source] std::io::Error),

    #[error("Could not create extraction directory. Path: '{}'", .1.display())]
    CreateDirFailed(#[source] std::io::Error, PathBuf),

    #[error("Copying '{}' out of library '{}' failed", .1, .2.display())]
    CopyFailed(#[source] std::io::Error, RelativePathBuf, PathBuf),

    #[error("Resource '{0}' has no base name to extract under")]
    NoBaseName(RelativePathBuf),
}

/// A session-scoped temporary directory holding everything extracted out of
/// archive-backed libraries.
///
/// Shared between readers via `Arc`; the contents are removed when the last
/// holder drops. Removal is best-effort: a failure is logged and never
/// propagated.
#[derive(Debug)]
pub struct ExtractRoot {
    dir: Option<TempDir>,
}

impl ExtractRoot {
    pub fn new() -> Result<ExtractRoot, ExtractError> {
        let dir = tempfile::Builder::new()
            .prefix("klib-extract-")
            .tempdir()
            .map_err(ExtractError::CreateSessionFailed)?;
        Ok(ExtractRoot { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        // `dir` is only ever taken in Drop.
        self.dir.as_ref().expect("extract root in use after drop").path()
    }
}

impl Drop for ExtractRoot {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to remove extracted library resources"
                );
            }
        }
    }
}

/// Hands out real, directly-openable filesystem paths for logical library
/// resources, for consumers that cannot read inside an archive.
///
/// A directory-backed library is served in place, with no copying ever. An
/// archive-backed library is lazily copied out into the session directory on
/// first request; the result is memoized, so every resource is extracted at
/// most once per materializer.
pub enum Materializer {
    /// Logical paths already are real paths.
    InPlace { root: PathBuf },
    /// Extract-on-first-use with memoization.
    Extracting {
        storage: Arc<dyn Storage>,
        session: Arc<ExtractRoot>,
        cache: Mutex<HashMap<RelativePathBuf, PathBuf>>,
        /// Next slot directory name. Monotonic, so an aborted extraction
        /// never leaves a slot name behind for a later request to trip on.
        slots: AtomicUsize,
        extractions: AtomicUsize,
    },
}

impl Materializer {
    pub fn in_place(root: &Path) -> Materializer {
        Materializer::InPlace {
            root: root.to_path_buf(),
        }
    }

    pub fn extracting(storage: Arc<dyn Storage>, session: Arc<ExtractRoot>) -> Materializer {
        Materializer::Extracting {
            storage,
            session,
            cache: Mutex::new(HashMap::new()),
            slots: AtomicUsize::new(0),
            extractions: AtomicUsize::new(0),
        }
    }

    /// Returns a real filesystem path for `path`.
    ///
    /// Concurrent requests for the same resource serialize on the cache
    /// lock, so duplicate extractions cannot race. The resource's base name
    /// is preserved for tools that key behavior off file names.
    pub fn materialize(&self, path: &RelativePath) -> Result<PathBuf, ExtractError> {
        match self {
            Materializer::InPlace { root } => Ok(path.to_path(root)),
            Materializer::Extracting {
                storage,
                session,
                cache,
                slots,
                extractions,
            } => {
                let mut cache = cache.lock().unwrap();
                if let Some(real) = cache.get(path) {
                    return Ok(real.clone());
                }

                let name = path
                    .file_name()
                    .ok_or_else(|| ExtractError::NoBaseName(path.to_owned()))?;
                let slot = session
                    .path()
                    .join(slots.fetch_add(1, Ordering::Relaxed).to_string());
                std::fs::create_dir(&slot)
                    .map_err(|e| ExtractError::CreateDirFailed(e, slot.clone()))?;

                let dest = slot.join(name);
                if let Err(e) = storage.copy_to(path, &dest) {
                    // The failure is fatal for this request only: drop the
                    // half-written slot so a retry starts clean.
                    if let Err(cleanup) = std::fs::remove_dir_all(&slot) {
                        tracing::warn!(
                            path = %slot.display(),
                            error = %cleanup,
                            "failed to remove aborted extraction"
                        );
                    }
                    return Err(ExtractError::CopyFailed(
                        e,
                        path.to_owned(),
                        storage.location().to_path_buf(),
                    ));
                }
                extractions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    resource = %path,
                    dest = %dest.display(),
                    "extracted library resource"
                );

                cache.insert(path.to_owned(), dest.clone());
                Ok(dest)
            }
        }
    }

    /// Number of real copy-outs performed so far. Always zero in place.
    pub fn extraction_count(&self) -> usize {
        match self {
            Materializer::InPlace { .. } => 0,
            Materializer::Extracting { extractions, .. } => extractions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Materializer::InPlace { root } => {
                f.debug_struct("Materializer::InPlace").field("root", root).finish()
            }
            Materializer::Extracting { storage, .. } => f
                .debug_struct("Materializer::Extracting")
                .field("location", &storage.location())
                .finish_non_exhaustive(),
        }
    }
}
