//! JSON-on-disk [`StoreBackend`] rooted at `<home>/.tether/store/`.
//!
//! One document per version and per baseline, plus one raw file per
//! content blob. Writes go to a uniquely named hidden sibling and are
//! renamed into place, so a reader never observes a half-written record
//! and concurrent writers never share a temp file. Any I/O failure
//! surfaces as [`StoreError::Unavailable`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::atomic::write_atomic;
use crate::error::{unavailable, StoreError};
use crate::paths;
use crate::store::StoreBackend;
use crate::types::{ArtifactId, ArtifactVersion, BaselineRecord, ContentHash, Location, VersionId};

/// Filesystem-backed store.
#[derive(Debug, Clone)]
pub struct FileBackend {
    home: PathBuf,
}

impl FileBackend {
    /// Backend rooted at `<home>/.tether/store/`. Nothing is created until
    /// the first write.
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Backend rooted at the real home directory.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::at(paths::home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl StoreBackend for FileBackend {
    fn put_version(&self, version: &ArtifactVersion) -> Result<(), StoreError> {
        write_json(&paths::version_path(&self.home, &version.id), version)
    }

    fn get_version(&self, id: &VersionId) -> Result<Option<ArtifactVersion>, StoreError> {
        // Ids come from callers; refuse anything that would escape the directory.
        if id.0.is_empty() || id.0.contains(['/', '\\']) || id.0.starts_with('.') {
            return Ok(None);
        }
        read_json(&paths::version_path(&self.home, id))
    }

    fn list_by_parent(&self, parent: &VersionId) -> Result<Vec<ArtifactVersion>, StoreError> {
        let dir = paths::versions_dir(&self.home);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(unavailable(&dir, err)),
        };

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable(&dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(version) = read_json::<ArtifactVersion>(&path)? {
                if version.parent_version_id.as_ref() == Some(parent) {
                    children.push(version);
                }
            }
        }
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(children)
    }

    fn put_baseline(&self, record: &BaselineRecord) -> Result<(), StoreError> {
        let path = paths::baseline_path(
            &self.home,
            &record.artifact_id,
            &record.location_a,
            &record.location_b,
        );
        write_json(&path, record)
    }

    fn get_baseline(
        &self,
        artifact: &ArtifactId,
        from: &Location,
        to: &Location,
    ) -> Result<Option<BaselineRecord>, StoreError> {
        read_json(&paths::baseline_path(&self.home, artifact, from, to))
    }

    fn put_blob(&self, hash: &ContentHash, content: &[u8]) -> Result<(), StoreError> {
        if !is_hex_digest(hash) {
            return Err(StoreError::Validation(format!("'{hash}' is not a content hash")));
        }
        let path = paths::object_path(&self.home, hash);
        if path.exists() {
            return Ok(());
        }
        write_atomic(&path, content)
    }

    fn get_blob(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StoreError> {
        if !is_hex_digest(hash) {
            return Ok(None);
        }
        let path = paths::object_path(&self.home, hash);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(unavailable(&path, err)),
        }
    }
}

fn is_hex_digest(hash: &ContentHash) -> bool {
    hash.0.len() >= 2 && hash.0.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Read a JSON document; a missing file is `Ok(None)`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(unavailable(path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON document atomically.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, json.as_bytes())
}
