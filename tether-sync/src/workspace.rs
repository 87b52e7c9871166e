//! Materialized artifact trees per location.
//!
//! The orchestrator reads and writes artifact files only through the
//! [`Workspace`] trait. Two implementations ship with the crate:
//!
//! - [`DirWorkspace`]: one filesystem root per location, artifact at
//!   `<root>/<artifact_id>/`.
//! - [`MemoryWorkspace`]: in-process maps, for tests and embedding.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tether_core::{ArtifactId, FileTree, Location, ProjectId};

use crate::error::{io_err, write_failure, SyncError};
use crate::writer::{self, is_tmp_name};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Read/write access to the files of an artifact at a location.
///
/// Paths are relative, `/`-separated, and never contain `.` or `..`
/// components. An empty tree means the artifact is absent.
pub trait Workspace: Send + Sync {
    fn read_tree(&self, artifact: &ArtifactId, location: &Location) -> Result<FileTree, SyncError>;

    fn write_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
        content: &[u8],
    ) -> Result<(), SyncError>;

    fn remove_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
    ) -> Result<(), SyncError>;

    /// Projects that currently hold files for `artifact`.
    fn projects(&self, artifact: &ArtifactId) -> Result<Vec<ProjectId>, SyncError>;
}

impl<T: Workspace + ?Sized> Workspace for Arc<T> {
    fn read_tree(&self, artifact: &ArtifactId, location: &Location) -> Result<FileTree, SyncError> {
        (**self).read_tree(artifact, location)
    }

    fn write_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
        content: &[u8],
    ) -> Result<(), SyncError> {
        (**self).write_file(artifact, location, path, content)
    }

    fn remove_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
    ) -> Result<(), SyncError> {
        (**self).remove_file(artifact, location, path)
    }

    fn projects(&self, artifact: &ArtifactId) -> Result<Vec<ProjectId>, SyncError> {
        (**self).projects(artifact)
    }
}

/// Reject absolute paths, backslashes, and empty, `.` or `..` components.
/// Names reserved for in-flight writes (`.tether-<random>.tmp`) are
/// rejected too, since tree walks never report them.
pub fn validate_relative_path(path: &str) -> Result<(), SyncError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains(['\\', '\0'])
        || path
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == ".." || is_tmp_name(part));
    if bad {
        return Err(SyncError::Validation(format!(
            "'{path}' is not a relative artifact path"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory workspace
// ---------------------------------------------------------------------------

/// Trees held in memory, keyed by location and artifact.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    trees: Mutex<BTreeMap<(Location, ArtifactId), FileTree>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole tree of `artifact` at `location`.
    pub fn set_tree(&self, artifact: &ArtifactId, location: &Location, tree: FileTree) {
        self.lock()
            .insert((location.clone(), artifact.clone()), tree);
    }

    /// Current tree of `artifact` at `location` (empty if absent).
    pub fn tree(&self, artifact: &ArtifactId, location: &Location) -> FileTree {
        self.lock()
            .get(&(location.clone(), artifact.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(Location, ArtifactId), FileTree>> {
        self.trees.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Workspace for MemoryWorkspace {
    fn read_tree(&self, artifact: &ArtifactId, location: &Location) -> Result<FileTree, SyncError> {
        Ok(self.tree(artifact, location))
    }

    fn write_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
        content: &[u8],
    ) -> Result<(), SyncError> {
        validate_relative_path(path)?;
        self.lock()
            .entry((location.clone(), artifact.clone()))
            .or_default()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn remove_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
    ) -> Result<(), SyncError> {
        validate_relative_path(path)?;
        let mut trees = self.lock();
        let key = (location.clone(), artifact.clone());
        if let Some(tree) = trees.get_mut(&key) {
            tree.remove(path);
            if tree.is_empty() {
                trees.remove(&key);
            }
        }
        Ok(())
    }

    fn projects(&self, artifact: &ArtifactId) -> Result<Vec<ProjectId>, SyncError> {
        let projects = self
            .lock()
            .iter()
            .filter(|((_, id), tree)| id == artifact && !tree.is_empty())
            .filter_map(|((location, _), _)| match location {
                Location::Project(project) => Some(project.clone()),
                _ => None,
            })
            .collect();
        Ok(projects)
    }
}

// ---------------------------------------------------------------------------
// Filesystem workspace
// ---------------------------------------------------------------------------

/// Filesystem roots for each location.
#[derive(Debug, Clone)]
pub struct DirWorkspace {
    source: PathBuf,
    collection: PathBuf,
    projects: BTreeMap<ProjectId, PathBuf>,
}

impl DirWorkspace {
    pub fn new(source: impl Into<PathBuf>, collection: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            collection: collection.into(),
            projects: BTreeMap::new(),
        }
    }

    /// Register the root directory for a project.
    pub fn with_project(mut self, project: impl Into<ProjectId>, root: impl Into<PathBuf>) -> Self {
        self.projects.insert(project.into(), root.into());
        self
    }

    /// Root directory of `location`.
    pub fn root(&self, location: &Location) -> Result<&Path, SyncError> {
        match location {
            Location::Source => Ok(&self.source),
            Location::Collection => Ok(&self.collection),
            Location::Project(project) => self
                .projects
                .get(project)
                .map(PathBuf::as_path)
                .ok_or_else(|| SyncError::Validation(format!("unknown project '{project}'"))),
        }
    }

    /// Directory holding `artifact` at `location`.
    pub fn artifact_dir(
        &self,
        artifact: &ArtifactId,
        location: &Location,
    ) -> Result<PathBuf, SyncError> {
        artifact.validate()?;
        Ok(self.root(location)?.join(&artifact.0))
    }

    fn file_path(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
    ) -> Result<(PathBuf, PathBuf), SyncError> {
        validate_relative_path(path)?;
        let dir = self.artifact_dir(artifact, location)?;
        let full = path.split('/').fold(dir.clone(), |acc, part| acc.join(part));
        Ok((dir, full))
    }
}

impl Workspace for DirWorkspace {
    fn read_tree(&self, artifact: &ArtifactId, location: &Location) -> Result<FileTree, SyncError> {
        let dir = self.artifact_dir(artifact, location)?;
        let mut tree = FileTree::new();
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => walk(&dir, "", &mut tree)?,
            Ok(_) => {
                return Err(SyncError::Validation(format!(
                    "{} is not a directory",
                    dir.display()
                )))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&dir, err)),
        }
        Ok(tree)
    }

    fn write_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
        content: &[u8],
    ) -> Result<(), SyncError> {
        let (_, full) = self.file_path(artifact, location, path)?;
        writer::atomic_write(&full, content).map_err(|e| write_failure(path, e))
    }

    fn remove_file(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        path: &str,
    ) -> Result<(), SyncError> {
        let (dir, full) = self.file_path(artifact, location, path)?;
        writer::remove_and_prune(&dir, &full).map_err(|e| write_failure(path, e))
    }

    /// Registered projects whose root has a directory for `artifact`.
    fn projects(&self, artifact: &ArtifactId) -> Result<Vec<ProjectId>, SyncError> {
        artifact.validate()?;
        let mut found = Vec::new();
        for (project, root) in &self.projects {
            let dir = root.join(&artifact.0);
            match std::fs::metadata(&dir) {
                Ok(meta) if meta.is_dir() => found.push(project.clone()),
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&dir, err)),
            }
        }
        Ok(found)
    }
}

/// Collect every regular file under `dir` into `tree`, keyed by its
/// `/`-joined path relative to the artifact directory.
fn walk(dir: &Path, prefix: &str, tree: &mut FileTree) -> Result<(), SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %path.display(), "skipping non-UTF-8 file name");
            continue;
        };
        let relative = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };

        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            walk(&path, &relative, tree)?;
        } else if file_type.is_file() {
            if is_tmp_name(&name) {
                tracing::debug!(path = %path.display(), "skipping in-flight temp file");
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
            tree.insert(relative, bytes);
        } else {
            tracing::debug!(path = %path.display(), "skipping non-regular file");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
