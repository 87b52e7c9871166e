//! # tether-sync
//!
//! Drift detection, three-way merge and transactional sync of artifact
//! trees between a source, a collection and deployed projects.
//!
//! Build a [`SyncEngine`] over a snapshot store backend and a
//! [`Workspace`], then call [`SyncEngine::check_drift`],
//! [`SyncEngine::preview_merge`] or [`SyncEngine::run_sync`].

pub mod diff;
pub mod drift;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod workspace;
mod writer;

pub use diff::{diff_three_way, diff_two_way, ChangeKind, ThreeWayDiff, ThreeWayStatus, TwoWayDiff};
pub use drift::{ArtifactDrift, ChangeOrigin, DriftResult, DriftType, FileDrift};
pub use error::SyncError;
pub use merge::{
    ConflictRecord, ConflictType, MergeEngine, MergeResult, Resolution, ResolutionOutcome,
};
pub use orchestrator::{FileChange, SyncAttempt, SyncEngine, SyncPhase, SyncStatus, SyncStrategy};
pub use workspace::{DirWorkspace, MemoryWorkspace, Workspace};
