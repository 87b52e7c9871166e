//! Sync orchestration.
//!
//! ## `run_sync` state machine
//!
//! ```text
//! Started → Snapshotting → Diffing → (Merging) → Applying → Finalizing
//!                                                    │           │
//!                                                    └───────────┴→ RollingBack → Failed
//! ```
//!
//! 1. Read both trees, resolve the effective baseline, snapshot both sides.
//! 2. Classify drift; `none` ends the attempt with zero writes.
//! 3. Three-way diff against the merge base and merge.
//! 4. Unresolved conflicts end the attempt with status `conflict`, no writes.
//! 5. Write the final tree to the target.
//! 6. Snapshot the result, pin it in the manifest, record the baseline.
//! 7. A failure in 5 or 6 restores the target to its pre-sync tree.
//!
//! Callers serialize attempts per (artifact, target). Attempts on different
//! artifacts may overlap: manifest edits go through [`Manifest::update_at`],
//! which holds the manifest lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use tether_core::hasher::{hash_files, tree_hash_of};
use tether_core::{
    ArtifactId, ArtifactVersion, BaselineRecord, Direction, EngineConfig, FileBackend, FileHashes,
    FileTree, Location, Manifest, PinnedVersion, ProjectId, SnapshotStore, StoreBackend, VersionId,
    VersionOrigin,
};

use crate::diff::{diff_three_way, is_binary, unified_diff, ThreeWayDiff};
use crate::drift::{self, ArtifactDrift, DriftReferences, DriftResult};
use crate::error::SyncError;
use crate::merge::{
    ConflictRecord, MergeEngine, MergeInput, MergeResult, Resolution, ResolutionOutcome,
};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// Attempt record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Started,
    Snapshotting,
    Diffing,
    Merging,
    Applying,
    Finalizing,
    RollingBack,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Nothing to do.
    Noop,
    /// Only the origin side changed since the merge base.
    FastForward,
    /// Both sides changed and merged cleanly.
    Merge,
    /// Conflicts were settled by caller resolutions.
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Conflict,
    RolledBack,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::Conflict => write!(f, "conflict"),
            SyncStatus::RolledBack => write!(f, "rolled_back"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One file operation applied to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileChange {
    Written { path: String },
    Removed { path: String },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Written { path } | FileChange::Removed { path } => path,
        }
    }
}

/// Record of one `run_sync` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttempt {
    pub artifact_id: ArtifactId,
    pub direction: Direction,
    pub target: Location,
    /// Version of the target before anything was written; `None` if the
    /// target held no files.
    pub pre_sync_version_id: Option<VersionId>,
    pub post_sync_version_id: Option<VersionId>,
    pub strategy: SyncStrategy,
    pub status: SyncStatus,
    /// Conflicts still waiting for a resolution.
    pub conflicts: Vec<ConflictRecord>,
    pub phases: Vec<SyncPhase>,
    pub drift: Option<DriftResult>,
    /// Operations applied to the target, in order. After a rollback these
    /// have been reverted.
    pub changes: Vec<FileChange>,
}

impl SyncAttempt {
    fn new(artifact_id: &ArtifactId, direction: &Direction) -> Self {
        Self {
            artifact_id: artifact_id.clone(),
            direction: direction.clone(),
            target: direction.target(),
            pre_sync_version_id: None,
            post_sync_version_id: None,
            strategy: SyncStrategy::Noop,
            status: SyncStatus::Success,
            conflicts: Vec::new(),
            phases: vec![SyncPhase::Started],
            drift: None,
            changes: Vec::new(),
        }
    }

    fn enter(&mut self, phase: SyncPhase) {
        tracing::debug!(artifact = %self.artifact_id, ?phase, "sync phase");
        self.phases.push(phase);
    }

    /// Number of file writes and removals applied.
    pub fn write_count(&self) -> usize {
        self.changes.len()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Reference versions for one direction, taken from the most recent
/// baseline in either direction of the location pair.
#[derive(Debug, Clone, Default)]
struct EffectiveBaseline {
    merge_base: Option<ArtifactVersion>,
    local: Option<ArtifactVersion>,
    remote: Option<ArtifactVersion>,
}

impl EffectiveBaseline {
    fn references(&self) -> DriftReferences {
        DriftReferences {
            local: hashes_of(self.local.as_ref()),
            remote: hashes_of(self.remote.as_ref()),
            baseline_hash: self.merge_base.as_ref().map(|v| v.tree_hash.clone()),
        }
    }
}

fn hashes_of(version: Option<&ArtifactVersion>) -> FileHashes {
    version.map(|v| v.file_hashes.clone()).unwrap_or_default()
}

/// Both trees of a direction plus the baseline they are judged against.
struct SyncState {
    ours: FileTree,
    theirs: FileTree,
    ours_hashes: FileHashes,
    theirs_hashes: FileHashes,
    baseline: EffectiveBaseline,
}

/// Entry point for drift checks, merge previews and syncs.
pub struct SyncEngine<B, W> {
    store: SnapshotStore<B>,
    workspace: W,
    config: EngineConfig,
    merger: MergeEngine,
    home: PathBuf,
}

impl<W: Workspace> SyncEngine<FileBackend, W> {
    /// Engine over the on-disk store and `config.yaml` under `home`.
    pub fn open_at(home: &Path, workspace: W) -> Result<Self, SyncError> {
        let config = EngineConfig::load_at(home)?;
        Ok(Self::new(home, FileBackend::at(home), workspace, config))
    }
}

impl<B: StoreBackend, W: Workspace> SyncEngine<B, W> {
    /// `home` is where `.tether/manifest.yaml` lives.
    pub fn new(home: impl Into<PathBuf>, backend: B, workspace: W, config: EngineConfig) -> Self {
        let merger = MergeEngine::new(config.binary.clone());
        Self {
            store: SnapshotStore::new(backend),
            workspace,
            config,
            merger,
            home: home.into(),
        }
    }

    pub fn store(&self) -> &SnapshotStore<B> {
        &self.store
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Read-only operations
    // -----------------------------------------------------------------------

    /// Classify drift between the two sides of `direction`. Writes nothing.
    pub fn check_drift(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
    ) -> Result<DriftResult, SyncError> {
        validate(artifact, direction)?;
        let state = self.read_state(artifact, direction)?;
        Ok(drift::detect(
            artifact,
            &state.baseline.references(),
            &state.ours_hashes,
            &state.theirs_hashes,
        ))
    }

    /// Drift of `artifact` over every pair it is tracked in: source to
    /// collection when the source holds it or a baseline exists, plus
    /// collection to each project that holds it or has a pin. The overall
    /// classification is the most severe one.
    pub fn check_artifact_drift(&self, artifact: &ArtifactId) -> Result<ArtifactDrift, SyncError> {
        artifact.validate()?;
        let mut directions = Vec::new();

        let source_tracked = !self.workspace.read_tree(artifact, &Location::Source)?.is_empty()
            || self
                .store
                .get_baseline(artifact, &Location::Source, &Location::Collection)?
                .is_some();
        if source_tracked {
            directions.push(Direction::SourceToCollection);
        }

        let mut projects: BTreeSet<ProjectId> =
            self.workspace.projects(artifact)?.into_iter().collect();
        let manifest = Manifest::load_at(&self.home)?;
        if let Some(pins) = manifest.artifacts.get(&artifact.0) {
            for key in pins.keys() {
                if let Ok(Location::Project(project)) = key.parse::<Location>() {
                    projects.insert(project);
                }
            }
        }
        directions.extend(projects.into_iter().map(Direction::CollectionToProject));

        let mut results = Vec::with_capacity(directions.len());
        for direction in directions {
            let result = self.check_drift(artifact, &direction)?;
            results.push((direction, result));
        }
        let combined = ArtifactDrift::combine(artifact, results);
        tracing::debug!(
            artifact = %artifact,
            drift = %combined.drift_type,
            pairs = combined.directions.len(),
            "artifact drift checked"
        );
        Ok(combined)
    }

    /// The merge `run_sync` would perform, without writing files or
    /// recording snapshots.
    pub fn preview_merge(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
    ) -> Result<MergeResult, SyncError> {
        validate(artifact, direction)?;
        let state = self.read_state(artifact, direction)?;
        self.merge(&state)
    }

    /// Unified diffs from the current target to what a sync would write,
    /// for text files only. Conflicted paths are left out.
    pub fn preview_diffs(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
    ) -> Result<BTreeMap<String, String>, SyncError> {
        validate(artifact, direction)?;
        let state = self.read_state(artifact, direction)?;
        let merged = self.merge(&state)?;
        let conflicted: Vec<&str> = merged.conflict_paths();

        let mut diffs = BTreeMap::new();
        let paths = state.ours.keys().chain(merged.resolved_files.keys());
        for path in paths {
            if conflicted.contains(&path.as_str()) || diffs.contains_key(path) {
                continue;
            }
            let old = state.ours.get(path).map(Vec::as_slice).unwrap_or_default();
            let new = merged.resolved_files.get(path).map(Vec::as_slice).unwrap_or_default();
            let policy = &self.config.binary;
            if is_binary(path, old, policy) || is_binary(path, new, policy) {
                continue;
            }
            let (Ok(old), Ok(new)) = (std::str::from_utf8(old), std::str::from_utf8(new)) else {
                continue;
            };
            if let Some(diff) = unified_diff(path, old, new) {
                diffs.insert(path.clone(), diff);
            }
        }
        Ok(diffs)
    }

    /// Record the current tree at `location` as a manual snapshot. The
    /// parent is the version pinned for that location, if any.
    pub fn snapshot(
        &self,
        artifact: &ArtifactId,
        location: &Location,
    ) -> Result<ArtifactVersion, SyncError> {
        artifact.validate()?;
        location.validate()?;
        let tree = self.workspace.read_tree(artifact, location)?;
        if tree.is_empty() {
            return Err(SyncError::Validation(format!(
                "'{artifact}' has no files at {location}"
            )));
        }

        let manifest = Manifest::load_at(&self.home)?;
        let parent = match manifest.pinned_version(artifact, location) {
            Some(pin) => self.store.backend().get_version(&pin.version)?.map(|v| v.id),
            None => None,
        };

        self.store.put_contents(&tree)?;
        let version = self.store.create_version(
            artifact,
            hash_files(&tree),
            parent.as_ref(),
            VersionOrigin::ManualSnapshot,
        )?;
        tracing::info!(artifact = %artifact, %location, version = %version.id, "manual snapshot");
        Ok(version)
    }

    // -----------------------------------------------------------------------
    // run_sync
    // -----------------------------------------------------------------------

    /// Bring the target of `direction` up to date with its origin.
    ///
    /// Conflicts are reported through [`SyncStatus::Conflict`], not as an
    /// error. Pass `resolutions` to settle them on a later call. A failure
    /// after the first write is reported as [`SyncError::SyncFailed`]
    /// once the target has been restored.
    pub fn run_sync(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
        resolutions: Option<&BTreeMap<String, Resolution>>,
    ) -> Result<SyncAttempt, SyncError> {
        validate(artifact, direction)?;
        let target = direction.target();
        let mut attempt = SyncAttempt::new(artifact, direction);
        tracing::info!(artifact = %artifact, %direction, "sync started");

        attempt.enter(SyncPhase::Snapshotting);
        let state = self.read_state(artifact, direction)?;
        self.store.put_contents(&state.theirs)?;
        self.store.put_contents(&state.ours)?;
        let theirs_v = self.observe(
            artifact,
            &state.theirs_hashes,
            state.baseline.remote.as_ref(),
            direction.observed_origin(),
        )?;
        let ours_v = self.observe(
            artifact,
            &state.ours_hashes,
            state.baseline.local.as_ref(),
            VersionOrigin::LocalModification,
        )?;
        attempt.pre_sync_version_id = ours_v.as_ref().map(|v| v.id.clone());

        attempt.enter(SyncPhase::Diffing);
        let drift = drift::detect(
            artifact,
            &state.baseline.references(),
            &state.ours_hashes,
            &state.theirs_hashes,
        );
        let drift_type = drift.drift_type;
        attempt.drift = Some(drift);

        if drift_type == drift::DriftType::None {
            attempt.post_sync_version_id = attempt.pre_sync_version_id.clone();
            if let (Some(theirs_v), Some(ours_v)) = (&theirs_v, &ours_v) {
                if !same_version(state.baseline.remote.as_ref(), theirs_v)
                    || !same_version(state.baseline.local.as_ref(), ours_v)
                {
                    // Both sides moved to content they agree on.
                    attempt.enter(SyncPhase::Finalizing);
                    let agreed = self.agreed_target(artifact, theirs_v, ours_v)?;
                    self.record_baseline(artifact, direction, theirs_v, &agreed)?;
                    self.pin(artifact, &target, &agreed)?;
                    attempt.post_sync_version_id = Some(agreed.id);
                }
            }
            tracing::info!(artifact = %artifact, %direction, "already in sync");
            return Ok(attempt);
        }

        let (diff, merged) = self.plan(&state)?;
        if !diff.ours_changed() {
            attempt.strategy = SyncStrategy::FastForward;
        } else {
            attempt.enter(SyncPhase::Merging);
            attempt.strategy = SyncStrategy::Merge;
        }

        let final_tree = match (merged.is_clean(), resolutions) {
            (true, None) => merged.resolved_files,
            (clean, Some(resolutions)) => match merged.apply_resolutions(resolutions)? {
                ResolutionOutcome::Complete(files) => {
                    if !clean {
                        attempt.strategy = SyncStrategy::Resolved;
                    }
                    files
                }
                ResolutionOutcome::Pending { unresolved } => {
                    return Ok(self.conflicted(attempt, unresolved));
                }
            },
            (false, None) => return Ok(self.conflicted(attempt, merged.conflicts)),
        };

        attempt.enter(SyncPhase::Applying);
        if let Err(cause) = self.apply(artifact, &target, &state.ours, &final_tree, &mut attempt) {
            return Err(self.roll_back(attempt, &state.ours, cause));
        }

        attempt.enter(SyncPhase::Finalizing);
        match self.finalize(artifact, direction, theirs_v.as_ref(), &final_tree) {
            Ok(version) => {
                attempt.post_sync_version_id = version.map(|v| v.id);
                tracing::info!(
                    artifact = %artifact,
                    %direction,
                    strategy = ?attempt.strategy,
                    changes = attempt.changes.len(),
                    "sync complete"
                );
                Ok(attempt)
            }
            Err(cause) => Err(self.roll_back(attempt, &state.ours, cause)),
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn read_state(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
    ) -> Result<SyncState, SyncError> {
        let theirs = self.workspace.read_tree(artifact, &direction.from_location())?;
        let ours = self.workspace.read_tree(artifact, &direction.target())?;
        let baseline = self.effective_baseline(artifact, direction)?;
        Ok(SyncState {
            ours_hashes: hash_files(&ours),
            theirs_hashes: hash_files(&theirs),
            ours,
            theirs,
            baseline,
        })
    }

    /// The newer of the direction's own baseline and the reverse one.
    ///
    /// Own record: the target is judged against what it held after that
    /// sync, the origin against the common version. Reverse record: both
    /// sides are judged against its common version, so edits kept on
    /// either side show up as incoming changes.
    fn effective_baseline(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
    ) -> Result<EffectiveBaseline, SyncError> {
        let from = direction.from_location();
        let to = direction.target();
        let own = self.store.get_baseline(artifact, &from, &to)?;
        let reverse = match direction.reverse() {
            Some(_) => self.store.get_baseline(artifact, &to, &from)?,
            None => None,
        };

        let use_reverse = match (&own, &reverse) {
            (Some(own), Some(reverse)) => reverse.recorded_at > own.recorded_at,
            (None, Some(_)) => true,
            _ => false,
        };

        if use_reverse {
            let Some(record) = reverse else {
                return Ok(EffectiveBaseline::default());
            };
            let common = self.store.get_version(&record.common_version_id)?;
            return Ok(EffectiveBaseline {
                merge_base: Some(common.clone()),
                local: Some(common.clone()),
                remote: Some(common),
            });
        }

        match own {
            Some(record) => {
                let common = self.store.get_version(&record.common_version_id)?;
                let target = self.store.get_version(&record.target_version_id)?;
                Ok(EffectiveBaseline {
                    merge_base: Some(common.clone()),
                    local: Some(target),
                    remote: Some(common),
                })
            }
            None => Ok(EffectiveBaseline::default()),
        }
    }

    /// Snapshot a side; an empty tree has no version.
    fn observe(
        &self,
        artifact: &ArtifactId,
        hashes: &FileHashes,
        reference: Option<&ArtifactVersion>,
        origin: VersionOrigin,
    ) -> Result<Option<ArtifactVersion>, SyncError> {
        if hashes.is_empty() {
            return Ok(None);
        }
        let version = self
            .store
            .observe(artifact, hashes.clone(), reference.map(|v| &v.id), origin)?;
        Ok(Some(version))
    }

    /// Nearest shared ancestor of the two reference versions, else the
    /// baseline's common version.
    fn merge_base(
        &self,
        baseline: &EffectiveBaseline,
    ) -> Result<Option<ArtifactVersion>, SyncError> {
        if let (Some(local), Some(remote)) = (&baseline.local, &baseline.remote) {
            if let Some(id) = self.store.find_common_ancestor(&local.id, &remote.id)? {
                return Ok(Some(self.store.get_version(&id)?));
            }
        }
        Ok(baseline.merge_base.clone())
    }

    fn merge(&self, state: &SyncState) -> Result<MergeResult, SyncError> {
        Ok(self.plan(state)?.1)
    }

    /// Three-way diff against the merge base, and the merge it leads to.
    fn plan(&self, state: &SyncState) -> Result<(ThreeWayDiff, MergeResult), SyncError> {
        let base = self.merge_base(&state.baseline)?;
        let base_hashes = hashes_of(base.as_ref());
        let base_tree = self.store.load_contents(&base_hashes)?;
        let diff = diff_three_way(&base_hashes, &state.ours_hashes, &state.theirs_hashes);
        let merged = self.merger.merge(MergeInput {
            diff: &diff,
            base: &base_tree,
            ours: &state.ours,
            theirs: &state.theirs,
        })?;
        Ok((diff, merged))
    }

    fn conflicted(&self, mut attempt: SyncAttempt, conflicts: Vec<ConflictRecord>) -> SyncAttempt {
        tracing::warn!(
            artifact = %attempt.artifact_id,
            direction = %attempt.direction,
            conflicts = conflicts.len(),
            "sync blocked by conflicts"
        );
        attempt.status = SyncStatus::Conflict;
        attempt.conflicts = conflicts;
        attempt
    }

    /// Write changed files and remove vanished ones. Each applied
    /// operation is recorded on `attempt` as soon as it succeeds.
    fn apply(
        &self,
        artifact: &ArtifactId,
        target: &Location,
        current: &FileTree,
        final_tree: &FileTree,
        attempt: &mut SyncAttempt,
    ) -> Result<(), SyncError> {
        for (path, bytes) in final_tree {
            if current.get(path) == Some(bytes) {
                tracing::debug!(path = %path, "unchanged");
                continue;
            }
            self.workspace.write_file(artifact, target, path, bytes)?;
            tracing::info!(artifact = %artifact, %target, path = %path, "wrote");
            attempt.changes.push(FileChange::Written { path: path.clone() });
        }
        for path in current.keys() {
            if final_tree.contains_key(path) {
                continue;
            }
            self.workspace.remove_file(artifact, target, path)?;
            tracing::info!(artifact = %artifact, %target, path = %path, "removed");
            attempt.changes.push(FileChange::Removed { path: path.clone() });
        }
        Ok(())
    }

    /// Snapshot the written tree, pin it, and record the baseline. The
    /// pin is put back if the baseline cannot be recorded.
    fn finalize(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
        theirs_v: Option<&ArtifactVersion>,
        final_tree: &FileTree,
    ) -> Result<Option<ArtifactVersion>, SyncError> {
        let target = direction.target();
        let final_hashes = hash_files(final_tree);
        if final_hashes.is_empty() {
            Manifest::update_at(&self.home, |m| m.unpin(artifact, &target))?;
            return Ok(None);
        }

        self.store.put_contents(final_tree)?;
        let final_v = match theirs_v {
            Some(theirs) if theirs.tree_hash == tree_hash_of(&final_hashes) => theirs.clone(),
            parent => self.store.create_version(
                artifact,
                final_hashes,
                parent.map(|v| &v.id),
                direction.applied_origin(),
            )?,
        };

        let previous = self.pin(artifact, &target, &final_v)?;

        let Some(theirs) = theirs_v else {
            tracing::debug!(
                artifact = %artifact,
                %direction,
                "origin is empty; no baseline recorded"
            );
            return Ok(Some(final_v));
        };
        if let Err(err) = self.record_baseline(artifact, direction, theirs, &final_v) {
            let restored =
                Manifest::update_at(&self.home, |m| m.restore_pin(artifact, &target, previous));
            if let Err(restore) = restored {
                tracing::warn!(error = %restore, "could not restore manifest pin");
            }
            return Err(err);
        }
        Ok(Some(final_v))
    }

    /// Pin `version` for `location` and return the pin it replaced.
    fn pin(
        &self,
        artifact: &ArtifactId,
        location: &Location,
        version: &ArtifactVersion,
    ) -> Result<Option<PinnedVersion>, SyncError> {
        let previous = Manifest::update_at(&self.home, |m| {
            let previous = m.pinned_version(artifact, location).cloned();
            m.pin(location, version);
            previous
        })?;
        Ok(previous)
    }

    fn record_baseline(
        &self,
        artifact: &ArtifactId,
        direction: &Direction,
        common: &ArtifactVersion,
        target: &ArtifactVersion,
    ) -> Result<(), SyncError> {
        self.store.set_baseline(&BaselineRecord {
            artifact_id: artifact.clone(),
            location_a: direction.from_location(),
            location_b: direction.target(),
            common_version_id: common.id.clone(),
            target_version_id: target.id.clone(),
            recorded_at: Utc::now(),
        })?;
        Ok(())
    }

    /// Target version for an agreement reached without writing: it must
    /// descend from `theirs_v` so the next merge base is `theirs_v`.
    fn agreed_target(
        &self,
        artifact: &ArtifactId,
        theirs_v: &ArtifactVersion,
        ours_v: &ArtifactVersion,
    ) -> Result<ArtifactVersion, SyncError> {
        if ours_v.tree_hash == theirs_v.tree_hash {
            return Ok(theirs_v.clone());
        }
        if self.store.lineage(&ours_v.id)?.contains(&theirs_v.id) {
            return Ok(ours_v.clone());
        }
        Ok(self.store.create_version(
            artifact,
            ours_v.file_hashes.clone(),
            Some(&theirs_v.id),
            VersionOrigin::LocalModification,
        )?)
    }

    /// Restore the target to `pre_sync` and wrap `cause`.
    fn roll_back(
        &self,
        mut attempt: SyncAttempt,
        pre_sync: &FileTree,
        cause: SyncError,
    ) -> SyncError {
        tracing::warn!(
            artifact = %attempt.artifact_id,
            target = %attempt.target,
            error = %cause,
            "sync failed; rolling back"
        );
        attempt.enter(SyncPhase::RollingBack);

        let failed_paths = self.restore(&attempt, pre_sync);
        attempt.enter(SyncPhase::Failed);

        if failed_paths.is_empty() {
            attempt.status = SyncStatus::RolledBack;
            tracing::warn!(
                artifact = %attempt.artifact_id,
                target = %attempt.target,
                "target restored"
            );
            SyncError::SyncFailed {
                attempt: Box::new(attempt),
                cause: Box::new(cause),
            }
        } else {
            attempt.status = SyncStatus::Failed;
            tracing::warn!(
                artifact = %attempt.artifact_id,
                target = %attempt.target,
                failed = failed_paths.len(),
                "rollback incomplete"
            );
            SyncError::SyncFailed {
                attempt: Box::new(attempt),
                cause: Box::new(SyncError::RollbackFailed {
                    cause: Box::new(cause),
                    failed_paths,
                }),
            }
        }
    }

    /// Put back every file of `pre_sync` and remove files it did not
    /// have. Returns the paths that could not be restored.
    fn restore(&self, attempt: &SyncAttempt, pre_sync: &FileTree) -> Vec<String> {
        let artifact = &attempt.artifact_id;
        let target = &attempt.target;
        let mut failed = Vec::new();

        let mut restore_path = |path: &str| {
            let result = match pre_sync.get(path) {
                Some(bytes) => self.workspace.write_file(artifact, target, path, bytes),
                None => self.workspace.remove_file(artifact, target, path),
            };
            if let Err(err) = result {
                tracing::warn!(path, error = %err, "could not restore file");
                failed.push(path.to_string());
            }
        };

        match self.workspace.read_tree(artifact, target) {
            Ok(current) => {
                for (path, bytes) in pre_sync {
                    if current.get(path) != Some(bytes) {
                        restore_path(path);
                    }
                }
                for path in current.keys() {
                    if !pre_sync.contains_key(path) {
                        restore_path(path);
                    }
                }
            }
            Err(err) => {
                // Without a listing, undo exactly what was applied.
                tracing::warn!(error = %err, "could not read target during rollback");
                for change in &attempt.changes {
                    restore_path(change.path());
                }
            }
        }
        failed
    }
}

fn same_version(reference: Option<&ArtifactVersion>, version: &ArtifactVersion) -> bool {
    reference.is_some_and(|r| r.id == version.id)
}

fn validate(artifact: &ArtifactId, direction: &Direction) -> Result<(), SyncError> {
    artifact.validate()?;
    direction.from_location().validate()?;
    direction.target().validate()?;
    Ok(())
}
