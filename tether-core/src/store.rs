//! Snapshot store: immutable artifact versions, lineage, and baselines.
//!
//! [`SnapshotStore`] owns the rules (validation, version reuse, ancestor
//! walks); a [`StoreBackend`] only persists records. Two backends ship
//! with the crate: [`MemoryBackend`] and
//! [`FileBackend`](crate::file_backend::FileBackend).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::error::StoreError;
use crate::hasher::{hash_file, tree_hash_of};
use crate::types::{
    ArtifactId, ArtifactVersion, BaselineRecord, ContentHash, FileHashes, FileTree, Location,
    VersionId, VersionOrigin,
};

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Key/value persistence for versions and baselines.
pub trait StoreBackend: Send + Sync {
    fn put_version(&self, version: &ArtifactVersion) -> Result<(), StoreError>;

    fn get_version(&self, id: &VersionId) -> Result<Option<ArtifactVersion>, StoreError>;

    /// Every version whose `parent_version_id` is `parent`.
    fn list_by_parent(&self, parent: &VersionId) -> Result<Vec<ArtifactVersion>, StoreError>;

    fn put_baseline(&self, record: &BaselineRecord) -> Result<(), StoreError>;

    fn get_baseline(
        &self,
        artifact: &ArtifactId,
        from: &Location,
        to: &Location,
    ) -> Result<Option<BaselineRecord>, StoreError>;

    /// Store file content under its hash. Storing a known hash again is a no-op.
    fn put_blob(&self, hash: &ContentHash, content: &[u8]) -> Result<(), StoreError>;

    fn get_blob(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StoreError>;
}

impl<T: StoreBackend + ?Sized> StoreBackend for Arc<T> {
    fn put_version(&self, version: &ArtifactVersion) -> Result<(), StoreError> {
        (**self).put_version(version)
    }

    fn get_version(&self, id: &VersionId) -> Result<Option<ArtifactVersion>, StoreError> {
        (**self).get_version(id)
    }

    fn list_by_parent(&self, parent: &VersionId) -> Result<Vec<ArtifactVersion>, StoreError> {
        (**self).list_by_parent(parent)
    }

    fn put_baseline(&self, record: &BaselineRecord) -> Result<(), StoreError> {
        (**self).put_baseline(record)
    }

    fn get_baseline(
        &self,
        artifact: &ArtifactId,
        from: &Location,
        to: &Location,
    ) -> Result<Option<BaselineRecord>, StoreError> {
        (**self).get_baseline(artifact, from, to)
    }

    fn put_blob(&self, hash: &ContentHash, content: &[u8]) -> Result<(), StoreError> {
        (**self).put_blob(hash, content)
    }

    fn get_blob(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get_blob(hash)
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

type BaselineKey = (ArtifactId, Location, Location);

/// Process-local backend. Useful for tests and for callers that persist
/// elsewhere.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    versions: Mutex<HashMap<VersionId, ArtifactVersion>>,
    baselines: Mutex<HashMap<BaselineKey, BaselineRecord>>,
    blobs: Mutex<HashMap<ContentHash, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version_count(&self) -> usize {
        lock(&self.versions).len()
    }
}

impl StoreBackend for MemoryBackend {
    fn put_version(&self, version: &ArtifactVersion) -> Result<(), StoreError> {
        lock(&self.versions).insert(version.id.clone(), version.clone());
        Ok(())
    }

    fn get_version(&self, id: &VersionId) -> Result<Option<ArtifactVersion>, StoreError> {
        Ok(lock(&self.versions).get(id).cloned())
    }

    fn list_by_parent(&self, parent: &VersionId) -> Result<Vec<ArtifactVersion>, StoreError> {
        let mut children: Vec<_> = lock(&self.versions)
            .values()
            .filter(|v| v.parent_version_id.as_ref() == Some(parent))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(children)
    }

    fn put_baseline(&self, record: &BaselineRecord) -> Result<(), StoreError> {
        let key = (
            record.artifact_id.clone(),
            record.location_a.clone(),
            record.location_b.clone(),
        );
        lock(&self.baselines).insert(key, record.clone());
        Ok(())
    }

    fn get_baseline(
        &self,
        artifact: &ArtifactId,
        from: &Location,
        to: &Location,
    ) -> Result<Option<BaselineRecord>, StoreError> {
        let key = (artifact.clone(), from.clone(), to.clone());
        Ok(lock(&self.baselines).get(&key).cloned())
    }

    fn put_blob(&self, hash: &ContentHash, content: &[u8]) -> Result<(), StoreError> {
        lock(&self.blobs)
            .entry(hash.clone())
            .or_insert_with(|| content.to_vec());
        Ok(())
    }

    fn get_blob(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(lock(&self.blobs).get(hash).cloned())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the guard cannot leave a map half-updated.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Snapshot store
// ---------------------------------------------------------------------------

/// Versioned snapshot store over a [`StoreBackend`].
#[derive(Debug)]
pub struct SnapshotStore<B> {
    backend: B,
}

impl<B: StoreBackend> SnapshotStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Record a new immutable version.
    ///
    /// Fails with [`StoreError::Validation`] on an empty file set, an
    /// invalid artifact id, or a parent that is unknown or belongs to a
    /// different artifact.
    pub fn create_version(
        &self,
        artifact_id: &ArtifactId,
        file_hashes: FileHashes,
        parent_version_id: Option<&VersionId>,
        origin: VersionOrigin,
    ) -> Result<ArtifactVersion, StoreError> {
        artifact_id.validate()?;
        if file_hashes.is_empty() {
            return Err(StoreError::Validation(format!(
                "cannot snapshot '{artifact_id}' with an empty file set"
            )));
        }
        if let Some(parent_id) = parent_version_id {
            let parent = self.backend.get_version(parent_id)?.ok_or_else(|| {
                StoreError::Validation(format!("parent version '{parent_id}' does not exist"))
            })?;
            if &parent.artifact_id != artifact_id {
                return Err(StoreError::Validation(format!(
                    "parent version '{parent_id}' belongs to '{}', not '{artifact_id}'",
                    parent.artifact_id
                )));
            }
        }

        let version = ArtifactVersion {
            id: VersionId::generate(),
            artifact_id: artifact_id.clone(),
            tree_hash: tree_hash_of(&file_hashes),
            file_hashes,
            parent_version_id: parent_version_id.cloned(),
            origin,
            created_at: Utc::now(),
        };
        self.backend.put_version(&version)?;
        tracing::debug!(
            artifact = %artifact_id,
            version = %version.id,
            tree = version.tree_hash.short(),
            %origin,
            "recorded version"
        );
        Ok(version)
    }

    /// Snapshot an observed state, reusing `parent` when nothing changed.
    pub fn observe(
        &self,
        artifact_id: &ArtifactId,
        file_hashes: FileHashes,
        parent_version_id: Option<&VersionId>,
        origin: VersionOrigin,
    ) -> Result<ArtifactVersion, StoreError> {
        if let Some(parent_id) = parent_version_id {
            let parent = self.get_version(parent_id)?;
            if parent.tree_hash == tree_hash_of(&file_hashes) {
                return Ok(parent);
            }
        }
        self.create_version(artifact_id, file_hashes, parent_version_id, origin)
    }

    /// Load a version, failing with [`StoreError::VersionNotFound`] if absent.
    pub fn get_version(&self, id: &VersionId) -> Result<ArtifactVersion, StoreError> {
        self.backend
            .get_version(id)?
            .ok_or_else(|| StoreError::VersionNotFound { id: id.clone() })
    }

    /// Versions recorded with `id` as their parent.
    pub fn children_of(&self, id: &VersionId) -> Result<Vec<ArtifactVersion>, StoreError> {
        self.backend.list_by_parent(id)
    }

    /// `id` followed by each of its ancestors, nearest first.
    pub fn lineage(&self, id: &VersionId) -> Result<Vec<VersionId>, StoreError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id.clone());
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                break;
            }
            let version = self.get_version(&current)?;
            chain.push(current);
            cursor = version.parent_version_id;
        }
        Ok(chain)
    }

    /// Nearest version that both `a` and `b` descend from (either may be
    /// the answer itself).
    pub fn find_common_ancestor(
        &self,
        a: &VersionId,
        b: &VersionId,
    ) -> Result<Option<VersionId>, StoreError> {
        let ancestors_of_a: HashSet<VersionId> = self.lineage(a)?.into_iter().collect();
        Ok(self
            .lineage(b)?
            .into_iter()
            .find(|id| ancestors_of_a.contains(id)))
    }

    /// Store the content of every file in `tree` so later merges can
    /// recover it by hash.
    pub fn put_contents(&self, tree: &FileTree) -> Result<(), StoreError> {
        for (path, bytes) in tree {
            let hash = hash_file(bytes);
            self.backend.put_blob(&hash, bytes)?;
            tracing::trace!(path = %path, hash = hash.short(), "stored content");
        }
        Ok(())
    }

    /// Content for each path in `file_hashes`. Paths whose content was
    /// never stored are left out.
    pub fn load_contents(&self, file_hashes: &FileHashes) -> Result<FileTree, StoreError> {
        let mut tree = FileTree::new();
        for (path, hash) in file_hashes {
            match self.backend.get_blob(hash)? {
                Some(bytes) => {
                    tree.insert(path.clone(), bytes);
                }
                None => tracing::debug!(path = %path, hash = hash.short(), "content not in store"),
            }
        }
        Ok(tree)
    }

    pub fn get_baseline(
        &self,
        artifact: &ArtifactId,
        from: &Location,
        to: &Location,
    ) -> Result<Option<BaselineRecord>, StoreError> {
        self.backend.get_baseline(artifact, from, to)
    }

    /// Persist a baseline. Both referenced versions must exist.
    pub fn set_baseline(&self, record: &BaselineRecord) -> Result<(), StoreError> {
        record.artifact_id.validate()?;
        self.get_version(&record.common_version_id)?;
        self.get_version(&record.target_version_id)?;
        self.backend.put_baseline(record)?;
        tracing::debug!(
            artifact = %record.artifact_id,
            from = %record.location_a,
            to = %record.location_b,
            common = %record.common_version_id,
            "baseline updated"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
