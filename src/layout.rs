use std::fmt::Write;

use relative_path::{RelativePath, RelativePathBuf};

pub const KLIB_EXTENSION: &str = "klib";
pub const KLIB_EXTENSION_WITH_DOT: &str = ".klib";

/// Computes the logical path of every well-known entry inside a library.
///
/// A `Layout` is pure name arithmetic over the library root: no I/O happens
/// here, and the same layout yields the same paths no matter which storage
/// backend the library sits behind. Target-scoped paths require a target to
/// have been supplied at construction.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    target: Option<String>,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Target-scoped path requested, but no target was supplied.")]
pub struct MissingTargetError;

impl Layout {
    pub fn new(target: Option<&str>) -> Layout {
        Layout {
            target: target.map(str::to_string),
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn manifest(&self) -> RelativePathBuf {
        RelativePath::new("manifest").to_owned()
    }

    pub fn resources_dir(&self) -> RelativePathBuf {
        RelativePath::new("resources").to_owned()
    }

    pub fn linkdata_dir(&self) -> RelativePathBuf {
        RelativePath::new("linkdata").to_owned()
    }

    pub fn module_header(&self) -> RelativePathBuf {
        self.linkdata_dir().join("module")
    }

    pub fn data_flow_graph(&self) -> RelativePathBuf {
        self.linkdata_dir().join("module_data_flow_graph")
    }

    pub fn targets_dir(&self) -> RelativePathBuf {
        RelativePath::new("targets").to_owned()
    }

    pub fn target_dir(&self) -> Result<RelativePathBuf, MissingTargetError> {
        let target = self.target.as_deref().ok_or(MissingTargetError)?;
        Ok(self.targets_dir().join(target))
    }

    /// Bitcode compiled from library sources for the configured target.
    pub fn kotlin_dir(&self) -> Result<RelativePathBuf, MissingTargetError> {
        Ok(self.target_dir()?.join("kotlin"))
    }

    /// Bitcode produced for native interop for the configured target.
    pub fn native_dir(&self) -> Result<RelativePathBuf, MissingTargetError> {
        Ok(self.target_dir()?.join("native"))
    }

    /// Raw files included verbatim for the configured target.
    pub fn included_dir(&self) -> Result<RelativePathBuf, MissingTargetError> {
        Ok(self.target_dir()?.join("included"))
    }

    /// File holding the serialized metadata of one package.
    ///
    /// The empty name is the root package and maps to a reserved file name;
    /// every other name is escaped and prefixed, so no two package names can
    /// collide with each other or with the root marker.
    pub fn package_file(&self, package_name: &str) -> RelativePathBuf {
        if package_name.is_empty() {
            self.linkdata_dir().join("root_package.knm")
        } else {
            let escaped = escape_package_name(package_name);
            self.linkdata_dir().join(format!("package_{}.knm", escaped).as_str())
        }
    }
}

/// Percent-escapes every byte outside `[A-Za-z0-9_.]`. `%` itself is outside
/// the safe set, which keeps the mapping injective.
fn escape_package_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' => out.push(b as char),
            _ => {
                let _ = write!(out, "%{:02X}", b);
            }
        }
    }
    out
}
