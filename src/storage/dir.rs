use std::io;
use std::path::{Path, PathBuf};

use relative_path::RelativePath;

use super::Storage;

/// Directory-backed library: logical paths map 1:1 onto real filesystem
/// paths under the root.
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// The root must already be known to be a directory; backend selection
    /// happens in [open_storage](super::open_storage).
    pub fn new(root: &Path) -> DirStorage {
        assert!(
            root.is_dir(),
            "{} is expected to be a directory",
            root.display()
        );
        DirStorage {
            root: root.to_path_buf(),
        }
    }

    /// The real filesystem path behind a logical path.
    pub fn real_path(&self, path: &RelativePath) -> PathBuf {
        path.to_path(&self.root)
    }
}

impl Storage for DirStorage {
    fn location(&self) -> &Path {
        &self.root
    }

    fn exists(&self, path: &RelativePath) -> bool {
        self.real_path(path).exists()
    }

    fn is_dir(&self, path: &RelativePath) -> bool {
        self.real_path(path).is_dir()
    }

    fn list(&self, path: &RelativePath) -> io::Result<Vec<String>> {
        let mut names = vec![];
        for entry in std::fs::read_dir(self.real_path(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, path: &RelativePath) -> io::Result<Vec<u8>> {
        std::fs::read(self.real_path(path))
    }

    fn copy_to(&self, path: &RelativePath, dest: &Path) -> io::Result<()> {
        copy_recursively(&self.real_path(path), dest)
    }
}

fn copy_recursively(src: &Path, dest: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &dest.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dest).map(|_| ())
    }
}
