use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::layout::Layout;
use crate::storage::Storage;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("No metadata found for package '{package}'. Library: '{}'", .library.display())]
    PackageNotFound { package: String, library: PathBuf },

    #[error("Could not read serialized metadata. Library: '{}'", .1.display())]
    ReadFailed(#[source] std::io::Error, PathBuf),
}

/// Loads the library's serialized module and package metadata.
///
/// The byte contents are opaque to this crate; swapping the serialization
/// backend means swapping this capability and nothing else.
pub trait MetadataReader: Send + Sync {
    fn load_module_header(
        &self,
        layout: &Layout,
        storage: &dyn Storage,
    ) -> Result<Vec<u8>, MetadataError>;

    fn load_package_fragment(
        &self,
        layout: &Layout,
        storage: &dyn Storage,
        package: &str,
    ) -> Result<Vec<u8>, MetadataError>;

    /// Package names known to carry no declarations, derived from the module
    /// header. Accessing one of these never marks the library as needed for
    /// the link. The default backend cannot see inside the opaque header and
    /// reports none.
    fn empty_packages(&self, _module_header: &[u8]) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// Reads metadata exactly as stored: raw bytes straight off the backend.
#[derive(Debug, Default)]
pub struct DefaultMetadataReader;

impl MetadataReader for DefaultMetadataReader {
    fn load_module_header(
        &self,
        layout: &Layout,
        storage: &dyn Storage,
    ) -> Result<Vec<u8>, MetadataError> {
        storage
            .read(&layout.module_header())
            .map_err(|e| MetadataError::ReadFailed(e, storage.location().to_path_buf()))
    }

    fn load_package_fragment(
        &self,
        layout: &Layout,
        storage: &dyn Storage,
        package: &str,
    ) -> Result<Vec<u8>, MetadataError> {
        let path = layout.package_file(package);
        if !storage.exists(&path) {
            return Err(MetadataError::PackageNotFound {
                package: package.to_string(),
                library: storage.location().to_path_buf(),
            });
        }
        storage
            .read(&path)
            .map_err(|e| MetadataError::ReadFailed(e, storage.location().to_path_buf()))
    }
}
