//! Drift classification.
//!
//! Compares the current hashes of the local side (the sync target) and the
//! remote side (the sync origin) against the reference hashes each side
//! held at the last agreement point. Pure: the caller resolves the
//! baseline and reads the trees.

use std::fmt;

use serde::{Deserialize, Serialize};

use tether_core::{hasher::tree_hash_of, ArtifactId, ContentHash, Direction, FileHashes};

use crate::diff::union_paths;

/// Kind of divergence, per file and per artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    None,
    Added,
    Removed,
    Modified,
    Outdated,
    Conflict,
}

impl DriftType {
    /// `conflict` outranks every one-sided change, which outranks `none`.
    fn severity(self) -> u8 {
        match self {
            DriftType::None => 0,
            DriftType::Added | DriftType::Removed | DriftType::Modified | DriftType::Outdated => 1,
            DriftType::Conflict => 2,
        }
    }
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriftType::None => "none",
            DriftType::Added => "added",
            DriftType::Removed => "removed",
            DriftType::Modified => "modified",
            DriftType::Outdated => "outdated",
            DriftType::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// Which side a change is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    LocalModification,
    Sync,
    Unknown,
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOrigin::LocalModification => "local_modification",
            ChangeOrigin::Sync => "sync",
            ChangeOrigin::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Reference state for one drift check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReferences {
    /// What the local side held at the last agreement point.
    pub local: FileHashes,
    /// What the remote side held at the last agreement point.
    pub remote: FileHashes,
    /// Tree hash of the merge base, for reporting.
    pub baseline_hash: Option<ContentHash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDrift {
    pub path: String,
    pub drift_type: DriftType,
    pub change_origin: ChangeOrigin,
    pub local_hash: Option<ContentHash>,
    pub remote_hash: Option<ContentHash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftResult {
    pub artifact_id: ArtifactId,
    pub drift_type: DriftType,
    pub change_origin: ChangeOrigin,
    pub baseline_hash: Option<ContentHash>,
    /// `None` when the side holds no files.
    pub local_hash: Option<ContentHash>,
    pub remote_hash: Option<ContentHash>,
    /// Drifted files only, sorted by path.
    pub files: Vec<FileDrift>,
}

impl DriftResult {
    pub fn is_none(&self) -> bool {
        self.drift_type == DriftType::None
    }
}

/// Drift of one artifact across every location pair it is tracked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDrift {
    pub artifact_id: ArtifactId,
    /// Most severe classification over all pairs; the first pair wins ties.
    pub drift_type: DriftType,
    pub change_origin: ChangeOrigin,
    /// One result per checked direction, in check order.
    pub directions: Vec<(Direction, DriftResult)>,
}

impl ArtifactDrift {
    /// Combine per-direction results by severity.
    pub fn combine(artifact_id: &ArtifactId, directions: Vec<(Direction, DriftResult)>) -> Self {
        let mut worst: Option<&DriftResult> = None;
        for (_, result) in &directions {
            if worst.map_or(true, |w| result.drift_type.severity() > w.drift_type.severity()) {
                worst = Some(result);
            }
        }
        let (drift_type, change_origin) = worst
            .map(|w| (w.drift_type, w.change_origin))
            .unwrap_or((DriftType::None, ChangeOrigin::Unknown));
        Self {
            artifact_id: artifact_id.clone(),
            drift_type,
            change_origin,
            directions,
        }
    }

    pub fn is_none(&self) -> bool {
        self.drift_type == DriftType::None
    }

    /// Directions that have drifted.
    pub fn drifted(&self) -> impl Iterator<Item = &(Direction, DriftResult)> {
        self.directions.iter().filter(|(_, r)| !r.is_none())
    }
}

/// Classify drift for one artifact.
pub fn detect(
    artifact_id: &ArtifactId,
    references: &DriftReferences,
    local: &FileHashes,
    remote: &FileHashes,
) -> DriftResult {
    let files: Vec<FileDrift> = union_paths(&[&references.local, &references.remote, local, remote])
        .into_iter()
        .filter_map(|path| classify_file(path, references, local, remote))
        .collect();

    let (drift_type, change_origin) = summarize(&files);
    DriftResult {
        artifact_id: artifact_id.clone(),
        drift_type,
        change_origin,
        baseline_hash: references.baseline_hash.clone(),
        local_hash: side_hash(local),
        remote_hash: side_hash(remote),
        files,
    }
}

fn side_hash(hashes: &FileHashes) -> Option<ContentHash> {
    (!hashes.is_empty()).then(|| tree_hash_of(hashes))
}

fn classify_file(
    path: String,
    references: &DriftReferences,
    local: &FileHashes,
    remote: &FileHashes,
) -> Option<FileDrift> {
    let local_ref = references.local.get(&path);
    let remote_ref = references.remote.get(&path);
    let local_now = local.get(&path);
    let remote_now = remote.get(&path);

    let local_changed = local_now != local_ref;
    let remote_changed = remote_now != remote_ref;

    let (drift_type, change_origin) = match (local_changed, remote_changed) {
        (false, false) => return None,
        // Both sides moved to the same content: already agreed.
        (true, true) if local_now == remote_now => return None,
        (true, true) => (DriftType::Conflict, ChangeOrigin::LocalModification),
        (true, false) => (
            presence_change(local_ref, local_now, DriftType::Modified),
            ChangeOrigin::LocalModification,
        ),
        (false, true) => (
            presence_change(remote_ref, remote_now, DriftType::Outdated),
            ChangeOrigin::Sync,
        ),
    };

    Some(FileDrift {
        path,
        drift_type,
        change_origin,
        local_hash: local_now.cloned(),
        remote_hash: remote_now.cloned(),
    })
}

fn presence_change(
    reference: Option<&ContentHash>,
    current: Option<&ContentHash>,
    content_change: DriftType,
) -> DriftType {
    match (reference, current) {
        (None, Some(_)) => DriftType::Added,
        (Some(_), None) => DriftType::Removed,
        _ => content_change,
    }
}

fn summarize(files: &[FileDrift]) -> (DriftType, ChangeOrigin) {
    if files.is_empty() {
        return (DriftType::None, ChangeOrigin::Unknown);
    }

    let has_local = files
        .iter()
        .any(|f| f.change_origin == ChangeOrigin::LocalModification);
    let has_sync = files.iter().any(|f| f.change_origin == ChangeOrigin::Sync);
    if files.iter().any(|f| f.drift_type == DriftType::Conflict) || (has_local && has_sync) {
        return (DriftType::Conflict, ChangeOrigin::LocalModification);
    }

    let origin = if has_local {
        ChangeOrigin::LocalModification
    } else {
        ChangeOrigin::Sync
    };
    let drift_type = if files.iter().all(|f| f.drift_type == DriftType::Added) {
        DriftType::Added
    } else if files.iter().all(|f| f.drift_type == DriftType::Removed) {
        DriftType::Removed
    } else if has_local {
        DriftType::Modified
    } else {
        DriftType::Outdated
    };
    (drift_type, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tether_core::hasher::hash_file;

    fn hashes(entries: &[(&str, &str)]) -> FileHashes {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), hash_file(c.as_bytes())))
            .collect()
    }

    fn refs(local: &[(&str, &str)], remote: &[(&str, &str)]) -> DriftReferences {
        DriftReferences {
            local: hashes(local),
            remote: hashes(remote),
            baseline_hash: None,
        }
    }

    fn check(
        refs: &DriftReferences,
        local: &[(&str, &str)],
        remote: &[(&str, &str)],
    ) -> DriftResult {
        detect(&ArtifactId::from("review"), refs, &hashes(local), &hashes(remote))
    }

    #[test]
    fn untouched_sides_have_no_drift() {
        let r = refs(&[("a.md", "1")], &[("a.md", "1")]);
        let result = check(&r, &[("a.md", "1")], &[("a.md", "1")]);
        assert!(result.is_none());
        assert_eq!(result.change_origin, ChangeOrigin::Unknown);
        assert!(result.files.is_empty());
        assert_eq!(result.local_hash, result.remote_hash);
    }

    #[rstest]
    #[case::local_edit(
        &[("a.md", "2")],
        &[("a.md", "1")],
        DriftType::Modified,
        ChangeOrigin::LocalModification
    )]
    #[case::remote_edit(
        &[("a.md", "1")],
        &[("a.md", "2")],
        DriftType::Outdated,
        ChangeOrigin::Sync
    )]
    #[case::both_edit(
        &[("a.md", "2")],
        &[("a.md", "3")],
        DriftType::Conflict,
        ChangeOrigin::LocalModification
    )]
    #[case::local_add(
        &[("a.md", "1"), ("b.md", "x")],
        &[("a.md", "1")],
        DriftType::Added,
        ChangeOrigin::LocalModification
    )]
    #[case::remote_remove(&[("a.md", "1")], &[], DriftType::Removed, ChangeOrigin::Sync)]
    fn single_file_classification(
        #[case] local: &[(&str, &str)],
        #[case] remote: &[(&str, &str)],
        #[case] expected: DriftType,
        #[case] origin: ChangeOrigin,
    ) {
        let r = refs(&[("a.md", "1")], &[("a.md", "1")]);
        let result = check(&r, local, remote);
        assert_eq!(result.drift_type, expected);
        assert_eq!(result.change_origin, origin);
    }

    #[test]
    fn both_sides_converging_is_not_drift() {
        let r = refs(&[("a.md", "1")], &[("a.md", "1")]);
        let result = check(&r, &[("a.md", "2")], &[("a.md", "2")]);
        assert!(result.is_none());
    }

    #[test]
    fn local_and_remote_changes_on_different_files_conflict() {
        let r = refs(&[("a.md", "1"), ("b.md", "1")], &[("a.md", "1"), ("b.md", "1")]);
        let result = check(&r, &[("a.md", "2"), ("b.md", "1")], &[("a.md", "1"), ("b.md", "2")]);
        assert_eq!(result.drift_type, DriftType::Conflict);
        assert_eq!(result.files.len(), 2);
        assert_eq!(result.files[0].drift_type, DriftType::Modified);
        assert_eq!(result.files[1].drift_type, DriftType::Outdated);
    }

    #[test]
    fn mixed_remote_changes_are_outdated() {
        let r = refs(&[("a.md", "1")], &[("a.md", "1")]);
        let result = check(&r, &[("a.md", "1")], &[("a.md", "2"), ("new.md", "n")]);
        assert_eq!(result.drift_type, DriftType::Outdated);
        assert_eq!(result.change_origin, ChangeOrigin::Sync);
    }

    #[test]
    fn no_baseline_means_everything_is_added() {
        let result = check(&DriftReferences::default(), &[], &[("a.md", "1"), ("b.md", "2")]);
        assert_eq!(result.drift_type, DriftType::Added);
        assert_eq!(result.change_origin, ChangeOrigin::Sync);
        assert!(result.local_hash.is_none());
        assert!(result.remote_hash.is_some());
    }

    #[test]
    fn references_may_differ_per_side() {
        // Local kept an edit at the last merge; only the remote moved since.
        let r = refs(&[("a.md", "kept")], &[("a.md", "1")]);
        let result = check(&r, &[("a.md", "kept")], &[("a.md", "2")]);
        assert_eq!(result.drift_type, DriftType::Outdated);
    }

    fn result(drift_type: DriftType, change_origin: ChangeOrigin) -> DriftResult {
        DriftResult {
            artifact_id: ArtifactId::from("review"),
            drift_type,
            change_origin,
            baseline_hash: None,
            local_hash: None,
            remote_hash: None,
            files: vec![],
        }
    }

    #[test]
    fn combined_drift_takes_most_severe_direction() {
        use tether_core::ProjectId;

        let web = Direction::CollectionToProject(ProjectId::from("web"));
        let api = Direction::CollectionToProject(ProjectId::from("api"));
        let combined = ArtifactDrift::combine(
            &ArtifactId::from("review"),
            vec![
                (Direction::SourceToCollection, result(DriftType::Outdated, ChangeOrigin::Sync)),
                (web.clone(), result(DriftType::None, ChangeOrigin::Unknown)),
                (api, result(DriftType::Conflict, ChangeOrigin::LocalModification)),
            ],
        );
        assert_eq!(combined.drift_type, DriftType::Conflict);
        assert_eq!(combined.change_origin, ChangeOrigin::LocalModification);
        assert_eq!(combined.drifted().count(), 2);

        let tie = ArtifactDrift::combine(
            &ArtifactId::from("review"),
            vec![
                (Direction::SourceToCollection, result(DriftType::Outdated, ChangeOrigin::Sync)),
                (web, result(DriftType::Modified, ChangeOrigin::LocalModification)),
            ],
        );
        assert_eq!(tie.drift_type, DriftType::Outdated);
    }

    #[test]
    fn nothing_tracked_is_no_drift() {
        let combined = ArtifactDrift::combine(&ArtifactId::from("review"), vec![]);
        assert!(combined.is_none());
        assert_eq!(combined.change_origin, ChangeOrigin::Unknown);
    }
}
