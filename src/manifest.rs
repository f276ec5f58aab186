use std::path::PathBuf;

use crate::layout::Layout;
use crate::storage::Storage;

pub const PROPERTY_ABI_VERSION: &str = "abi_version";
pub const PROPERTY_UNIQUE_NAME: &str = "unique_name";
pub const PROPERTY_DEPENDS: &str = "depends";
pub const PROPERTY_LINKER_OPTS: &str = "linkerOpts";

/// The token replaced by the target name during target substitution.
const TARGET_TOKEN: &str = "$target";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Could not read library manifest. Library: '{}'", .1.display())]
    Unreadable(#[source] std::io::Error, PathBuf),

    #[error("Manifest is not valid UTF-8")]
    InvalidEncoding(#[source] std::str::Utf8Error),

    #[error("Malformed manifest line {line}: '{text}'")]
    MalformedLine { line: usize, text: String },

    #[error("Manifest is missing the required '{0}' property")]
    MissingProperty(&'static str),

    #[error("ABI version mismatch. Compiler expects: {expected}, the library is {found}")]
    AbiVersionMismatch { expected: String, found: String },
}

/// The library manifest: an order-preserving key=value property list.
///
/// Loaded once per reader and immutable afterwards. Order matters: linker
/// flag order and dependency order are semantically significant downstream.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    properties: Vec<(String, String)>,
}

impl Manifest {
    /// Parses line-oriented `key=value` properties. Blank lines and lines
    /// starting with `#` or `!` are skipped.
    pub fn parse(bytes: &[u8]) -> Result<Manifest, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(ManifestError::InvalidEncoding)?;
        let mut properties = vec![];
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    properties.push((key.trim().to_string(), value.trim().to_string()));
                }
                None => {
                    return Err(ManifestError::MalformedLine {
                        line: idx + 1,
                        text: line.to_string(),
                    });
                }
            }
        }
        Ok(Manifest { properties })
    }

    pub fn load(layout: &Layout, storage: &dyn Storage) -> Result<Manifest, ManifestError> {
        let bytes = storage
            .read(&layout.manifest())
            .map_err(|e| ManifestError::Unreadable(e, storage.location().to_path_buf()))?;
        Manifest::parse(&bytes)
    }

    /// Replaces the `$target` token in every property value.
    ///
    /// Idempotent: values without the token pass through unchanged, and no
    /// token survives a pass.
    pub fn substitute_for_target(&mut self, target: &str) {
        for (_, value) in &mut self.properties {
            if value.contains(TARGET_TOKEN) {
                *value = value.replace(TARGET_TOKEN, target);
            }
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Multi-value property: the value split on whitespace, in order.
    pub fn property_list(&self, key: &str) -> Vec<String> {
        self.property(key)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn unique_name(&self) -> Result<&str, ManifestError> {
        self.property(PROPERTY_UNIQUE_NAME)
            .ok_or(ManifestError::MissingProperty(PROPERTY_UNIQUE_NAME))
    }

    pub fn abi_version(&self) -> Result<&str, ManifestError> {
        self.property(PROPERTY_ABI_VERSION)
            .ok_or(ManifestError::MissingProperty(PROPERTY_ABI_VERSION))
    }

    /// Exact string equality against the decimal rendering of `expected`.
    /// No coercion: a numerically equal but differently spelled value fails.
    pub fn check_abi_version(&self, expected: u32) -> Result<(), ManifestError> {
        let found = self.abi_version()?;
        if found != expected.to_string() {
            return Err(ManifestError::AbiVersionMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    /// Declared dependency names in manifest order. Resolving them into
    /// actual libraries is the resolver's business, not ours.
    pub fn declared_dependencies(&self) -> Vec<String> {
        self.property_list(PROPERTY_DEPENDS)
    }

    /// Linker options for `target`, order preserved.
    pub fn linker_opts(&self, target: &str) -> Vec<String> {
        self.property_list(&format!("{}.{}", PROPERTY_LINKER_OPTS, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_properties_in_order() {
        let manifest = Manifest::parse(
            b"# a comment\nunique_name = demo\nabi_version=5\n\ndepends=stdlib runtime\n",
        )
        .unwrap();
        assert_eq!(manifest.unique_name().unwrap(), "demo");
        assert_eq!(manifest.abi_version().unwrap(), "5");
        assert_eq!(manifest.declared_dependencies(), ["stdlib", "runtime"]);
    }

    #[test]
    fn rejects_non_utf8_manifests() {
        let err = Manifest::parse(b"unique_name=\xFF\xFE\n").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidEncoding(_)));
    }

    #[test]
    fn rejects_lines_without_separator() {
        let err = Manifest::parse(b"unique_name=demo\ngarbage\n").unwrap_err();
        assert!(matches!(err, ManifestError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn missing_required_property() {
        let manifest = Manifest::parse(b"abi_version=5\n").unwrap();
        assert!(matches!(
            manifest.unique_name().unwrap_err(),
            ManifestError::MissingProperty(PROPERTY_UNIQUE_NAME)
        ));
    }

    #[test]
    fn abi_check_is_exact() {
        let manifest = Manifest::parse(b"abi_version=5\n").unwrap();
        assert!(manifest.check_abi_version(5).is_ok());
        match manifest.check_abi_version(4).unwrap_err() {
            ManifestError::AbiVersionMismatch { expected, found } => {
                assert_eq!(expected, "4");
                assert_eq!(found, "5");
            }
            other => panic!("unexpected error: {other}"),
        }

        // "05" is numerically compatible but spelled differently.
        let padded = Manifest::parse(b"abi_version=05\n").unwrap();
        assert!(padded.check_abi_version(5).is_err());
    }

    #[test]
    fn target_substitution_is_idempotent() {
        let mut manifest =
            Manifest::parse(b"linkerOpts.wasm32=-l$target -O2\nunique_name=demo\n").unwrap();
        manifest.substitute_for_target("wasm32");
        assert_eq!(manifest.linker_opts("wasm32"), ["-lwasm32", "-O2"]);
        let before = manifest.clone();
        manifest.substitute_for_target("wasm32");
        assert_eq!(manifest.linker_opts("wasm32"), before.linker_opts("wasm32"));
        assert_eq!(manifest.unique_name().unwrap(), "demo");
    }

    #[test]
    fn linker_opts_preserve_order() {
        let manifest =
            Manifest::parse(b"linkerOpts.linux_x64=-lfoo -lbar -Wl,-z,defs\n").unwrap();
        assert_eq!(
            manifest.linker_opts("linux_x64"),
            ["-lfoo", "-lbar", "-Wl,-z,defs"]
        );
        assert!(manifest.linker_opts("macos_x64").is_empty());
    }
}
