//! Herein lies the loader for the `klib` compiled-module library format.
//!
//! A library is addressable either as a plain directory tree or as a `.klib`
//! archive file; both forms carry the same internal layout. Use
//! [LibraryReader][LibraryReader] to open one and hand its bitcode, linker
//! options and serialized metadata to a code-generation or link stage.

mod extract;
mod layout;
mod library;
mod manifest;
mod metadata;
mod storage;

pub use extract::{ExtractError, ExtractRoot, Materializer};
pub use layout::{Layout, MissingTargetError, KLIB_EXTENSION, KLIB_EXTENSION_WITH_DOT};
pub use library::{LibraryError, LibraryReader};
pub use manifest::{Manifest, ManifestError};
pub use metadata::{DefaultMetadataReader, MetadataError, MetadataReader};
pub use storage::{open_storage, ArchiveStorage, DirStorage, OpenError, Storage};
