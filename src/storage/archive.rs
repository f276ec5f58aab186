use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use relative_path::RelativePath;
use zip::ZipArchive;

use super::{check_extension, OpenError, Storage};

/// Archive-backed library: a read-only virtual view over the entries of a
/// `.klib` zip file.
///
/// Directory semantics are derived from entry-name prefixes, so an archive
/// written without explicit directory entries behaves exactly like its
/// unpacked directory-backed counterpart. The zip reader needs exclusive
/// access for byte reads, hence the mutex.
pub struct ArchiveStorage {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
    /// Entry names of regular files, trailing-slash-free.
    files: BTreeSet<String>,
    /// Every directory name, explicit or implied by a deeper entry.
    dirs: BTreeSet<String>,
}

impl ArchiveStorage {
    pub fn open(path: &Path) -> Result<ArchiveStorage, OpenError> {
        if !path.exists() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(OpenError::InvalidRoot(path.to_path_buf()));
        }
        check_extension(path)?;

        let file = File::open(path).map_err(|e| OpenError::ReadFailed(e, path.to_path_buf()))?;
        let archive = ZipArchive::new(file)
            .map_err(|e| OpenError::ReadFailed(io::Error::other(e), path.to_path_buf()))?;

        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for raw in archive.file_names() {
            let name = raw.trim_end_matches('/');
            if name.is_empty() {
                continue;
            }
            if raw.ends_with('/') {
                dirs.insert(name.to_string());
            } else {
                files.insert(name.to_string());
            }
            let mut ancestor = name;
            while let Some((parent, _)) = ancestor.rsplit_once('/') {
                dirs.insert(parent.to_string());
                ancestor = parent;
            }
        }

        tracing::debug!(
            path = %path.display(),
            entries = files.len(),
            "opened library archive"
        );

        Ok(ArchiveStorage {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
            files,
            dirs,
        })
    }

    fn entry_name(path: &RelativePath) -> String {
        let name = path.normalize();
        match name.as_str() {
            "." => String::new(),
            other => other.to_string(),
        }
    }

    /// `prefix/rest` for a non-empty prefix, plain `rest` at the root.
    fn strip(name: &str, prefix: &str) -> Option<String> {
        if prefix.is_empty() {
            return Some(name.to_string());
        }
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
    }

    fn not_found(&self, name: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no entry '{}' in {}", name, self.path.display()),
        )
    }
}

impl Storage for ArchiveStorage {
    fn location(&self) -> &Path {
        &self.path
    }

    fn exists(&self, path: &RelativePath) -> bool {
        let name = Self::entry_name(path);
        name.is_empty() || self.files.contains(&name) || self.dirs.contains(&name)
    }

    fn is_dir(&self, path: &RelativePath) -> bool {
        let name = Self::entry_name(path);
        name.is_empty() || self.dirs.contains(&name)
    }

    fn list(&self, path: &RelativePath) -> io::Result<Vec<String>> {
        let name = Self::entry_name(path);
        if !self.is_dir(path) {
            return Err(self.not_found(&name));
        }

        let mut children = BTreeSet::new();
        for entry in self.files.iter().chain(self.dirs.iter()) {
            if let Some(rest) = Self::strip(entry, &name) {
                if !rest.is_empty() && !rest.contains('/') {
                    children.insert(rest);
                }
            }
        }
        Ok(children.into_iter().collect())
    }

    fn read(&self, path: &RelativePath) -> io::Result<Vec<u8>> {
        let name = Self::entry_name(path);
        if !self.files.contains(&name) {
            return Err(self.not_found(&name));
        }

        let mut archive = self.archive.lock().unwrap();
        let mut entry = archive.by_name(&name).map_err(io::Error::other)?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn copy_to(&self, path: &RelativePath, dest: &Path) -> io::Result<()> {
        let name = Self::entry_name(path);

        if self.files.contains(&name) {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            return std::fs::write(dest, self.read(path)?);
        }

        if !self.is_dir(path) {
            return Err(self.not_found(&name));
        }

        std::fs::create_dir_all(dest)?;
        for dir in &self.dirs {
            if let Some(rest) = Self::strip(dir, &name) {
                std::fs::create_dir_all(dest.join(rest))?;
            }
        }
        for file in &self.files {
            if let Some(rest) = Self::strip(file, &name) {
                let target = dest.join(rest);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(target, self.read(RelativePath::new(file))?)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArchiveStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStorage")
            .field("path", &self.path)
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}
