//! Engine configuration loaded from `<home>/.tether/config.yaml`.
//!
//! A missing file yields [`EngineConfig::default`]; unknown keys are
//! rejected so typos do not silently fall back to defaults.

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{unavailable, StoreError};
use crate::paths;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub binary: BinaryPolicy,
}

/// How file content is classified as binary. Binary files never auto-merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BinaryPolicy {
    /// Files larger than this are treated as binary.
    pub max_text_bytes: u64,
    /// How many leading bytes are inspected for NUL / invalid UTF-8.
    pub sniff_bytes: usize,
    /// Extensions (lowercase, no dot) that are always binary.
    pub extensions: Vec<String>,
}

impl Default for BinaryPolicy {
    fn default() -> Self {
        Self {
            max_text_bytes: 1024 * 1024,
            sniff_bytes: 8000,
            extensions: [
                "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tgz",
                "tar", "xz", "7z", "woff", "woff2", "ttf", "otf", "eot", "exe", "dll", "so",
                "dylib", "bin", "wasm", "jar", "class", "pyc", "mp3", "mp4", "mov", "sqlite",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl BinaryPolicy {
    /// True when `path` ends in one of the configured binary extensions.
    pub fn has_binary_extension(&self, path: &str) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}

impl EngineConfig {
    /// Load `<home>/.tether/config.yaml`, or defaults if it does not exist.
    pub fn load_at(home: &Path) -> Result<Self, StoreError> {
        let path = paths::config_path(home);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(unavailable(&path, err)),
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
    }

    /// `load_at` for the real home directory.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_at(&paths::home()?)
    }
}
