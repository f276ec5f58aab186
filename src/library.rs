use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use relative_path::{RelativePath, RelativePathBuf};

use crate::extract::{ExtractError, ExtractRoot, Materializer};
use crate::layout::{Layout, MissingTargetError, KLIB_EXTENSION_WITH_DOT};
use crate::manifest::{Manifest, ManifestError};
use crate::metadata::{DefaultMetadataReader, MetadataError, MetadataReader};
use crate::storage::{open_storage, OpenError, Storage};

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    MissingTarget(#[from] MissingTargetError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Failed to read '{}' from library '{}'", .1, .2.display())]
    ReadFailed(#[source] std::io::Error, RelativePathBuf, PathBuf),

    #[error("Failed to list library contents. Library: '{}'", .1.display())]
    ListFailed(#[source] std::io::Error, PathBuf),

    #[error("Could not unpack library to '{}'", .1.display())]
    UnpackFailed(#[source] std::io::Error, PathBuf),
}

/// Read-only view of one library for the duration of a compile/link session.
///
/// Composes the storage backend, layout, manifest, materializer and metadata
/// capability behind typed accessors. One reader may be queried from several
/// threads at once; the materializer cache, the link-need flag, the lazy
/// metadata caches and the dependency list are the only mutable state, each
/// behind its own guard.
pub struct LibraryReader {
    location: PathBuf,
    layout: Layout,
    storage: Arc<dyn Storage>,
    materializer: Materializer,
    manifest: Manifest,
    metadata: Box<dyn MetadataReader>,
    module_header: OnceLock<Vec<u8>>,
    empty_packages: OnceLock<BTreeSet<String>>,
    needed_for_link: AtomicBool,
    /// Resolved dependency readers, populated by the external resolver.
    /// Append-only from this crate's perspective, and distinct from the raw
    /// names in [declared_dependencies](Self::declared_dependencies).
    dependencies: Mutex<Vec<Arc<LibraryReader>>>,
}

impl LibraryReader {
    /// Opens the library at `location` and validates its ABI version against
    /// `expected_abi_version` — a mismatch aborts construction.
    ///
    /// Resources extracted out of an archive-backed library live in a
    /// private session removed when the reader drops; use
    /// [open_in_session](Self::open_in_session) to share one session across
    /// readers.
    pub fn open(
        location: &Path,
        target: Option<&str>,
        expected_abi_version: u32,
    ) -> Result<LibraryReader, LibraryError> {
        Self::open_with_metadata_reader(
            location,
            target,
            expected_abi_version,
            None,
            Box::new(DefaultMetadataReader),
        )
    }

    pub fn open_in_session(
        location: &Path,
        target: Option<&str>,
        expected_abi_version: u32,
        session: Arc<ExtractRoot>,
    ) -> Result<LibraryReader, LibraryError> {
        Self::open_with_metadata_reader(
            location,
            target,
            expected_abi_version,
            Some(session),
            Box::new(DefaultMetadataReader),
        )
    }

    pub fn open_with_metadata_reader(
        location: &Path,
        target: Option<&str>,
        expected_abi_version: u32,
        session: Option<Arc<ExtractRoot>>,
        metadata: Box<dyn MetadataReader>,
    ) -> Result<LibraryReader, LibraryError> {
        let storage = open_storage(location)?;
        let layout = Layout::new(target);

        let mut manifest = Manifest::load(&layout, storage.as_ref())?;
        if let Some(target) = target {
            manifest.substitute_for_target(target);
        }
        manifest.check_abi_version(expected_abi_version)?;

        let materializer = if location.is_dir() {
            Materializer::in_place(location)
        } else {
            let session = match session {
                Some(session) => session,
                None => Arc::new(ExtractRoot::new()?),
            };
            Materializer::extracting(storage.clone(), session)
        };

        tracing::debug!(
            library = %location.display(),
            target = target.unwrap_or("<none>"),
            "opened library"
        );

        Ok(LibraryReader {
            location: location.to_path_buf(),
            layout,
            storage,
            materializer,
            manifest,
            metadata,
            module_header: OnceLock::new(),
            empty_packages: OnceLock::new(),
            needed_for_link: AtomicBool::new(false),
            dependencies: Mutex::new(vec![]),
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn target(&self) -> Option<&str> {
        self.layout.target()
    }

    /// The library's name from the outside: its path minus the archive
    /// extension.
    pub fn library_name(&self) -> String {
        let path = self.location.to_string_lossy();
        match path.strip_suffix(KLIB_EXTENSION_WITH_DOT) {
            Some(stripped) => stripped.to_string(),
            None => path.into_owned(),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn unique_name(&self) -> Result<&str, LibraryError> {
        Ok(self.manifest.unique_name()?)
    }

    pub fn abi_version(&self) -> Result<&str, LibraryError> {
        Ok(self.manifest.abi_version()?)
    }

    pub fn linker_opts(&self) -> Result<Vec<String>, LibraryError> {
        let target = self.layout.target().ok_or(MissingTargetError)?;
        Ok(self.manifest.linker_opts(target))
    }

    /// Declared dependency names in manifest order, unresolved.
    pub fn declared_dependencies(&self) -> Vec<String> {
        self.manifest.declared_dependencies()
    }

    /// Names of the targets this library carries payload for.
    pub fn target_list(&self) -> Result<Vec<String>, LibraryError> {
        let targets = self.layout.targets_dir();
        if !self.storage.exists(&targets) {
            return Ok(vec![]);
        }
        self.storage
            .list(&targets)
            .map_err(|e| LibraryError::ListFailed(e, self.location.clone()))
    }

    /// The serialized module header, loaded on first use and cached for the
    /// reader's lifetime.
    pub fn module_header(&self) -> Result<&[u8], LibraryError> {
        if let Some(bytes) = self.module_header.get() {
            return Ok(bytes.as_slice());
        }
        // Two threads may both load; one result wins, and the read is
        // idempotent, so that is fine.
        let bytes = self
            .metadata
            .load_module_header(&self.layout, self.storage.as_ref())?;
        Ok(self.module_header.get_or_init(|| bytes))
    }

    /// The module's data flow graph, if the library ships one.
    pub fn data_flow_graph(&self) -> Result<Option<Vec<u8>>, LibraryError> {
        let path = self.layout.data_flow_graph();
        if !self.storage.exists(&path) {
            return Ok(None);
        }
        self.storage
            .read(&path)
            .map(Some)
            .map_err(|e| LibraryError::ReadFailed(e, path, self.location.clone()))
    }

    /// The serialized metadata of one package, by name.
    pub fn package_fragment(&self, package: &str) -> Result<Vec<u8>, LibraryError> {
        Ok(self
            .metadata
            .load_package_fragment(&self.layout, self.storage.as_ref(), package)?)
    }

    /// Absolute, real paths of the bitcode files for the configured target.
    /// Archive-backed content is extracted on first call.
    pub fn bitcode_paths(&self) -> Result<Vec<PathBuf>, LibraryError> {
        let mut paths = self.files_under(&self.layout.kotlin_dir()?)?;
        paths.extend(self.files_under(&self.layout.native_dir()?)?);
        Ok(paths)
    }

    /// Absolute, real paths of the raw included files for the configured
    /// target.
    pub fn included_paths(&self) -> Result<Vec<PathBuf>, LibraryError> {
        self.files_under(&self.layout.included_dir()?)
    }

    /// Copies the entire library out to `dest`, whichever backend it uses.
    /// Anything already at `dest` is replaced, not merged into.
    pub fn unpack_to(&self, dest: &Path) -> Result<(), LibraryError> {
        if dest.exists() {
            let removed = if dest.is_dir() {
                std::fs::remove_dir_all(dest)
            } else {
                std::fs::remove_file(dest)
            };
            removed.map_err(|e| LibraryError::UnpackFailed(e, dest.to_path_buf()))?;
        }
        self.storage
            .copy_to(&RelativePathBuf::new(), dest)
            .map_err(|e| LibraryError::UnpackFailed(e, dest.to_path_buf()))
    }

    /// Records that `package` was referenced during compilation.
    ///
    /// A one-way latch: once set, nothing resets it. Accesses to packages
    /// known to be empty never set it, so a library whose touched packages
    /// are all empty can be pruned from the final link.
    pub fn mark_package_accessed(&self, package: &str) {
        if self.needed_for_link.load(Ordering::Acquire) {
            // fast path
            return;
        }
        if self.known_empty_packages().contains(package) {
            return;
        }
        self.needed_for_link.store(true, Ordering::Release);
    }

    pub fn is_needed_for_link(&self) -> bool {
        self.needed_for_link.load(Ordering::Acquire)
    }

    /// Registers an already-resolved dependency reader. The dependency graph
    /// itself belongs to the resolver; this list only mirrors its result.
    pub fn add_dependency(&self, dependency: Arc<LibraryReader>) {
        self.dependencies.lock().unwrap().push(dependency);
    }

    pub fn dependencies(&self) -> Vec<Arc<LibraryReader>> {
        self.dependencies.lock().unwrap().clone()
    }

    fn known_empty_packages(&self) -> &BTreeSet<String> {
        self.empty_packages.get_or_init(|| match self.module_header() {
            Ok(header) => self.metadata.empty_packages(header),
            Err(e) => {
                // Without a readable header no package can be proven empty.
                tracing::debug!(
                    library = %self.location.display(),
                    error = %e,
                    "module header unavailable, assuming no empty packages"
                );
                BTreeSet::new()
            }
        })
    }

    fn files_under(&self, dir: &RelativePath) -> Result<Vec<PathBuf>, LibraryError> {
        if !self.storage.exists(dir) {
            // A target without this payload contributes nothing.
            return Ok(vec![]);
        }
        let real = self.materializer.materialize(dir)?;
        let real = real
            .canonicalize()
            .map_err(|e| LibraryError::ListFailed(e, self.location.clone()))?;

        let mut paths = vec![];
        for entry in std::fs::read_dir(&real)
            .map_err(|e| LibraryError::ListFailed(e, self.location.clone()))?
        {
            let entry = entry.map_err(|e| LibraryError::ListFailed(e, self.location.clone()))?;
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }
}

impl std::fmt::Debug for LibraryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryReader")
            .field("location", &self.location)
            .field("target", &self.layout.target())
            .field("needed_for_link", &self.is_needed_for_link())
            .finish_non_exhaustive()
    }
}
