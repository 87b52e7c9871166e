//! Pinned-version manifest at `<home>/.tether/manifest.yaml`.
//!
//! Human-readable record of which version each location of each artifact
//! is pinned to, read by deployment tooling:
//!
//! ```yaml
//! version: 1
//! updated_at: 2026-01-01T00:00:00Z
//! artifacts:
//!   review-skill:
//!     collection:
//!       version: 6f1c…
//!       tree_hash: 9a0b…
//!       pinned_at: 2026-01-01T00:00:00Z
//! ```
//!
//! Only the sync orchestrator writes it, and only after a successful sync.
//! Writers go through [`Manifest::update_at`], which holds an exclusive
//! lock on `manifest.lock` for the whole read-modify-write.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::{unavailable, StoreError};
use crate::paths;
use crate::types::{ArtifactId, ArtifactVersion, ContentHash, Location, VersionId};

pub const MANIFEST_VERSION: u32 = 1;

/// One pinned version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedVersion {
    pub version: VersionId,
    pub tree_hash: ContentHash,
    pub pinned_at: DateTime<Utc>,
}

/// The whole manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// artifact id → location (`source`, `collection`, `project:<name>`) → pin.
    #[serde(default)]
    pub artifacts: BTreeMap<String, BTreeMap<String, PinnedVersion>>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            updated_at: None,
            artifacts: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Load the manifest, or an empty one if the file does not exist.
    pub fn load_at(home: &Path) -> Result<Self, StoreError> {
        let path = paths::manifest_path(home);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(unavailable(&path, err)),
        };
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
    }

    /// `load_at` for the real home directory.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_at(&paths::home()?)
    }

    /// Save atomically through a uniquely named temp file.
    ///
    /// Prefer [`Manifest::update_at`] when other writers may be active.
    pub fn save_at(&self, home: &Path) -> Result<(), StoreError> {
        let yaml = serde_yaml::to_string(self)?;
        write_atomic(&paths::manifest_path(home), yaml.as_bytes())
    }

    /// Load, edit and save under an exclusive lock on `manifest.lock`.
    ///
    /// The lock spans the whole read-modify-write, so concurrent writers
    /// for different artifacts keep each other's pins. Nothing is written
    /// when `edit` leaves the manifest unchanged.
    pub fn update_at<T>(
        home: &Path,
        edit: impl FnOnce(&mut Manifest) -> T,
    ) -> Result<T, StoreError> {
        let _lock = ManifestLock::acquire(home)?;
        let mut manifest = Self::load_at(home)?;
        let before = manifest.clone();
        let out = edit(&mut manifest);
        if manifest != before {
            manifest.save_at(home)?;
        }
        Ok(out)
    }

    /// Pin `location` of `version.artifact_id` to `version`.
    pub fn pin(&mut self, location: &Location, version: &ArtifactVersion) {
        let now = Utc::now();
        self.artifacts
            .entry(version.artifact_id.0.clone())
            .or_default()
            .insert(
                location.to_string(),
                PinnedVersion {
                    version: version.id.clone(),
                    tree_hash: version.tree_hash.clone(),
                    pinned_at: now,
                },
            );
        self.updated_at = Some(now);
    }

    /// Drop the pin for `location`. Returns whether one existed.
    pub fn unpin(&mut self, artifact: &ArtifactId, location: &Location) -> bool {
        let Some(locations) = self.artifacts.get_mut(&artifact.0) else {
            return false;
        };
        let removed = locations.remove(&location.to_string()).is_some();
        if locations.is_empty() {
            self.artifacts.remove(&artifact.0);
        }
        if removed {
            self.updated_at = Some(Utc::now());
        }
        removed
    }

    /// Put back a pin captured earlier; `None` drops the entry.
    pub fn restore_pin(
        &mut self,
        artifact: &ArtifactId,
        location: &Location,
        pin: Option<PinnedVersion>,
    ) {
        let Some(pin) = pin else {
            self.unpin(artifact, location);
            return;
        };
        self.artifacts
            .entry(artifact.0.clone())
            .or_default()
            .insert(location.to_string(), pin);
        self.updated_at = Some(Utc::now());
    }

    pub fn pinned_version(
        &self,
        artifact: &ArtifactId,
        location: &Location,
    ) -> Option<&PinnedVersion> {
        self.artifacts
            .get(&artifact.0)
            .and_then(|locations| locations.get(&location.to_string()))
    }
}

/// Advisory lock on `manifest.lock`, released on drop.
struct ManifestLock {
    file: File,
}

impl ManifestLock {
    fn acquire(home: &Path) -> Result<Self, StoreError> {
        let path = paths::manifest_lock_path(home);
        let dir = paths::tether_root(home);
        std::fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, e))?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| unavailable(&path, e))?;
        file.lock_exclusive().map_err(|e| unavailable(&path, e))?;
        Ok(Self { file })
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
