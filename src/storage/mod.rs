use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relative_path::RelativePath;

use crate::layout::KLIB_EXTENSION;

mod archive;
mod dir;

pub use self::archive::ArchiveStorage;
pub use self::dir::DirStorage;

/// Uniform access to the contents of a library, independent of whether the
/// library is stored as a directory tree or as an archive file.
///
/// All paths are logical paths relative to the library root, as produced by
/// [Layout](crate::Layout). The two backends must be indistinguishable
/// through this interface; only the physical addressing differs.
pub trait Storage: std::fmt::Debug + Send + Sync {
    /// The library root as the caller addressed it.
    fn location(&self) -> &Path;

    fn exists(&self, path: &RelativePath) -> bool;

    fn is_dir(&self, path: &RelativePath) -> bool;

    /// Names of the immediate children of the directory at `path`, sorted.
    fn list(&self, path: &RelativePath) -> io::Result<Vec<String>>;

    /// Reads the full contents of the file at `path`.
    fn read(&self, path: &RelativePath) -> io::Result<Vec<u8>>;

    /// Recursively copies the file or directory at `path` to `dest`. For a
    /// directory, the contents land inside `dest`.
    fn copy_to(&self, path: &RelativePath, dest: &Path) -> io::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Could not find library root. Path: '{}'", .0.display())]
    NotFound(PathBuf),

    #[error("Library root is neither a directory nor a regular archive file. Path: '{}'", .0.display())]
    InvalidRoot(PathBuf),

    #[error("Unexpected library extension '{extension}'. Path: '{}'", .path.display())]
    BadExtension { path: PathBuf, extension: String },

    #[error("Failed to open library archive. Path: '{}'", .1.display())]
    ReadFailed(#[source] io::Error, PathBuf),
}

/// Selects the storage backend for a library root: a regular file opens as
/// an archive, a directory as a plain tree. The decision is made exactly
/// once, here; everything downstream sees only the [Storage] capability.
pub fn open_storage(root: &Path) -> Result<Arc<dyn Storage>, OpenError> {
    if root.is_file() {
        let storage = ArchiveStorage::open(root)?;
        Ok(Arc::new(storage))
    } else if root.is_dir() {
        Ok(Arc::new(DirStorage::new(root)))
    } else if !root.exists() {
        Err(OpenError::NotFound(root.to_path_buf()))
    } else {
        Err(OpenError::InvalidRoot(root.to_path_buf()))
    }
}

/// Validates that an archive root carries the library extension or none.
pub(crate) fn check_extension(path: &Path) -> Result<(), OpenError> {
    match path.extension() {
        None => Ok(()),
        Some(ext) if ext == KLIB_EXTENSION => Ok(()),
        Some(ext) => Err(OpenError::BadExtension {
            path: path.to_path_buf(),
            extension: ext.to_string_lossy().into_owned(),
        }),
    }
}
