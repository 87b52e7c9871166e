use std::collections::BTreeMap;

use rstest::rstest;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use tether_core::hasher::hash_tree;
use tether_core::{
    ArtifactId, Direction, EngineConfig, FileTree, Location, Manifest, MemoryBackend, ProjectId,
    VersionOrigin,
};
use tether_sync::{
    ChangeOrigin, ConflictType, DriftType, MemoryWorkspace, Resolution, SyncEngine, SyncStatus,
    SyncStrategy, Workspace,
};

const BASE: &str = "# Review\n\nstep one\nstep two\nstep three\nstep four\nstep five\n";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tree(entries: &[(&str, &str)]) -> FileTree {
    entries
        .iter()
        .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
        .collect()
}

fn review() -> ArtifactId {
    ArtifactId::from("review")
}

fn web() -> ProjectId {
    ProjectId::from("web")
}

fn web_location() -> Location {
    Location::Project(web())
}

fn deploy() -> Direction {
    Direction::CollectionToProject(web())
}

struct Fixture {
    home: TempDir,
    engine: SyncEngine<MemoryBackend, MemoryWorkspace>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let home = TempDir::new().expect("home");
        let engine = SyncEngine::new(
            home.path(),
            MemoryBackend::new(),
            MemoryWorkspace::new(),
            EngineConfig::default(),
        );
        Self { home, engine }
    }

    fn set(&self, location: &Location, files: FileTree) {
        self.engine.workspace().set_tree(&review(), location, files);
    }

    fn get(&self, location: &Location) -> FileTree {
        self.engine.workspace().tree(&review(), location)
    }

    fn manifest(&self) -> Manifest {
        Manifest::load_at(self.home.path()).expect("manifest")
    }

    /// Collection and project both hold `files`, agreed through one deploy.
    fn deployed(files: FileTree) -> Self {
        let fx = Self::new();
        fx.set(&Location::Collection, files);
        let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("initial deploy");
        assert_eq!(attempt.status, SyncStatus::Success);
        fx
    }
}

fn edit(text: &str, from: &str, to: &str) -> String {
    assert!(text.contains(from), "fixture text lacks {from:?}");
    text.replacen(from, to, 1)
}

// ---------------------------------------------------------------------------
// 1. First sync and idempotence
// ---------------------------------------------------------------------------

#[test]
fn first_sync_copies_source_and_second_run_is_a_noop() {
    let fx = Fixture::new();
    let upstream = tree(&[("SKILL.md", BASE), ("refs/notes.md", "notes\n")]);
    fx.set(&Location::Source, upstream.clone());

    let drift = fx
        .engine
        .check_drift(&review(), &Direction::SourceToCollection)
        .expect("drift");
    assert_eq!(drift.drift_type, DriftType::Added);
    assert_eq!(drift.change_origin, ChangeOrigin::Sync);

    let first = fx
        .engine
        .run_sync(&review(), &Direction::SourceToCollection, None)
        .expect("first sync");
    assert_eq!(first.status, SyncStatus::Success);
    assert_eq!(first.strategy, SyncStrategy::FastForward);
    assert_eq!(first.write_count(), 2);
    assert!(first.pre_sync_version_id.is_none());
    assert_eq!(fx.get(&Location::Collection), upstream);

    let pin = fx
        .manifest()
        .pinned_version(&review(), &Location::Collection)
        .cloned()
        .expect("collection pinned");
    assert_eq!(pin.tree_hash, hash_tree(&upstream));
    let version = fx.engine.store().get_version(&pin.version).expect("version");
    assert_eq!(version.origin, VersionOrigin::UpstreamSync);

    let second = fx
        .engine
        .run_sync(&review(), &Direction::SourceToCollection, None)
        .expect("second sync");
    assert_eq!(second.status, SyncStatus::Success);
    assert_eq!(second.strategy, SyncStrategy::Noop);
    assert_eq!(second.write_count(), 0);
    assert_eq!(second.drift.map(|d| d.drift_type), Some(DriftType::None));
}

#[rstest]
#[case::upstream(Direction::SourceToCollection)]
#[case::deploy(Direction::CollectionToProject(ProjectId::from("web")))]
#[case::promote(Direction::ProjectToCollection(ProjectId::from("web")))]
fn every_direction_is_idempotent(#[case] direction: Direction) {
    let fx = Fixture::new();
    fx.set(&direction.from_location(), tree(&[("SKILL.md", BASE)]));

    fx.engine.run_sync(&review(), &direction, None).expect("sync");
    let again = fx.engine.run_sync(&review(), &direction, None).expect("resync");

    assert_eq!(again.write_count(), 0);
    assert!(fx.engine.check_drift(&review(), &direction).expect("drift").is_none());
}

// ---------------------------------------------------------------------------
// 2. Fast-forward
// ---------------------------------------------------------------------------

#[test]
fn outdated_project_fast_forwards_to_collection() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let updated = tree(&[("SKILL.md", &edit(BASE, "step two", "step two, revised"))]);
    fx.set(&Location::Collection, updated.clone());

    let drift = fx.engine.check_drift(&review(), &deploy()).expect("drift");
    assert_eq!(drift.drift_type, DriftType::Outdated);
    assert_eq!(drift.change_origin, ChangeOrigin::Sync);
    assert_eq!(drift.files.len(), 1);

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.strategy, SyncStrategy::FastForward);
    assert_eq!(fx.get(&web_location()), updated);

    let post = attempt.post_sync_version_id.expect("post version");
    let version = fx.engine.store().get_version(&post).expect("version");
    assert_eq!(version.tree_hash, hash_tree(&updated));
    let pin = fx.manifest().pinned_version(&review(), &web_location()).cloned().expect("pin");
    assert_eq!(pin.tree_hash, hash_tree(&updated));
}

#[test]
fn removed_files_are_removed_from_target() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE), ("old.md", "old\n")]));
    fx.set(&Location::Collection, tree(&[("SKILL.md", BASE)]));

    let drift = fx.engine.check_drift(&review(), &deploy()).expect("drift");
    assert_eq!(drift.drift_type, DriftType::Removed);

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.write_count(), 1);
    assert_eq!(fx.get(&web_location()), tree(&[("SKILL.md", BASE)]));
}

// ---------------------------------------------------------------------------
// 3. Local edits
// ---------------------------------------------------------------------------

#[test]
fn local_only_edits_are_kept_without_writes() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let local = tree(&[("SKILL.md", &edit(BASE, "step one", "step one (local)"))]);
    fx.set(&web_location(), local.clone());

    let drift = fx.engine.check_drift(&review(), &deploy()).expect("drift");
    assert_eq!(drift.drift_type, DriftType::Modified);
    assert_eq!(drift.change_origin, ChangeOrigin::LocalModification);

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.status, SyncStatus::Success);
    assert_eq!(attempt.write_count(), 0);
    assert_eq!(fx.get(&web_location()), local);
    assert!(fx.engine.check_drift(&review(), &deploy()).expect("drift").is_none());
}

#[test]
fn non_overlapping_edits_merge_and_flow_back() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let ours = edit(BASE, "step one", "step one (local)");
    let theirs = edit(BASE, "step five", "step five (upstream)");
    fx.set(&web_location(), tree(&[("SKILL.md", &ours)]));
    fx.set(&Location::Collection, tree(&[("SKILL.md", &theirs)]));

    let drift = fx.engine.check_drift(&review(), &deploy()).expect("drift");
    assert_eq!(drift.drift_type, DriftType::Conflict);

    let preview = fx.engine.preview_merge(&review(), &deploy()).expect("preview");
    assert!(preview.is_clean());
    assert_eq!(preview.auto_merged.len(), 1);

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.status, SyncStatus::Success);
    assert_eq!(attempt.strategy, SyncStrategy::Merge);

    let merged = String::from_utf8(fx.get(&web_location())["SKILL.md"].clone()).expect("utf8");
    assert!(merged.contains("step one (local)"));
    assert!(merged.contains("step five (upstream)"));

    // The merged result travels back to the collection as a fast-forward.
    let promote = Direction::ProjectToCollection(web());
    let back = fx.engine.run_sync(&review(), &promote, None).expect("promote");
    assert_eq!(back.strategy, SyncStrategy::FastForward);
    assert_eq!(fx.get(&Location::Collection), fx.get(&web_location()));

    assert!(fx.engine.check_drift(&review(), &deploy()).expect("drift").is_none());
    assert!(fx.engine.check_drift(&review(), &promote).expect("drift").is_none());
}

// ---------------------------------------------------------------------------
// 4. Conflicts
// ---------------------------------------------------------------------------

#[test]
fn overlapping_edits_conflict_with_zero_writes() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let ours = tree(&[("SKILL.md", &edit(BASE, "step two", "step two (local)"))]);
    let theirs = tree(&[("SKILL.md", &edit(BASE, "step two", "step two (upstream)"))]);
    fx.set(&web_location(), ours.clone());
    fx.set(&Location::Collection, theirs.clone());
    let versions_before = fx.engine.store().backend().version_count();

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.status, SyncStatus::Conflict);
    assert_eq!(attempt.write_count(), 0);
    assert_eq!(attempt.conflicts.len(), 1);
    let conflict = &attempt.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::BothModified);
    assert!(!conflict.auto_mergeable);
    let marked = conflict.merged_with_markers.as_deref().expect("markers");
    assert!(marked.contains("<<<<<<< ours\nstep two (local)\n"));
    assert!(marked.contains(">>>>>>> theirs\n"));
    assert_eq!(fx.get(&web_location()), ours);
    // Both observed sides were snapshotted.
    assert_eq!(fx.engine.store().backend().version_count(), versions_before + 2);

    let resolutions = BTreeMap::from([("SKILL.md".to_string(), Resolution::UseTheirs)]);
    let resolved = fx
        .engine
        .run_sync(&review(), &deploy(), Some(&resolutions))
        .expect("resolved sync");
    assert_eq!(resolved.status, SyncStatus::Success);
    assert_eq!(resolved.strategy, SyncStrategy::Resolved);
    assert_eq!(fx.get(&web_location()), theirs);

    let again = fx.engine.run_sync(&review(), &deploy(), None).expect("resync");
    assert_eq!(again.write_count(), 0);
}

#[test]
fn partial_resolutions_leave_remaining_conflicts_pending() {
    let fx = Fixture::deployed(tree(&[("a.md", "a\n"), ("b.md", "b\n")]));
    fx.set(&web_location(), tree(&[("a.md", "a-local\n"), ("b.md", "b-local\n")]));
    fx.set(&Location::Collection, tree(&[("a.md", "a-up\n"), ("b.md", "b-up\n")]));

    let resolutions = BTreeMap::from([("a.md".to_string(), Resolution::UseOurs)]);
    let attempt = fx
        .engine
        .run_sync(&review(), &deploy(), Some(&resolutions))
        .expect("sync");
    assert_eq!(attempt.status, SyncStatus::Conflict);
    assert_eq!(attempt.conflicts.len(), 1);
    assert_eq!(attempt.conflicts[0].file_path, "b.md");
    assert_eq!(attempt.write_count(), 0);
}

#[test]
fn resolution_for_clean_path_is_rejected() {
    let fx = Fixture::deployed(tree(&[("a.md", "a\n")]));
    fx.set(&Location::Collection, tree(&[("a.md", "a2\n")]));

    let resolutions = BTreeMap::from([("a.md".to_string(), Resolution::UseOurs)]);
    let err = fx
        .engine
        .run_sync(&review(), &deploy(), Some(&resolutions))
        .unwrap_err();
    assert!(matches!(err, tether_sync::SyncError::Validation(_)), "got: {err}");
    assert_eq!(fx.get(&web_location()), tree(&[("a.md", "a\n")]));
}

#[test]
fn binary_mismatch_is_never_auto_merged() {
    let fx = Fixture::new();
    let mut logo = FileTree::new();
    logo.insert("logo.png".to_string(), b"\x89PNG\r\n\x1a\nbase".to_vec());
    fx.set(&Location::Collection, logo);
    fx.engine.run_sync(&review(), &deploy(), None).expect("deploy");

    let mut ours = FileTree::new();
    ours.insert("logo.png".to_string(), b"\x89PNG\r\n\x1a\nlocal".to_vec());
    let mut theirs = FileTree::new();
    theirs.insert("logo.png".to_string(), b"\x89PNG\r\n\x1a\nupstream".to_vec());
    fx.set(&web_location(), ours.clone());
    fx.set(&Location::Collection, theirs);

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.status, SyncStatus::Conflict);
    let conflict = &attempt.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::BinaryMismatch);
    assert!(conflict.is_binary);
    assert!(!conflict.auto_mergeable);
    assert!(conflict.merged_with_markers.is_none());
    assert_eq!(fx.get(&web_location()), ours);
}

#[test]
fn local_delete_against_upstream_edit_is_modify_delete() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE), ("b.md", "b\n")]));
    fx.set(&web_location(), tree(&[("SKILL.md", BASE)]));
    fx.set(&Location::Collection, tree(&[("SKILL.md", BASE), ("b.md", "b, edited\n")]));

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.status, SyncStatus::Conflict);
    let conflict = &attempt.conflicts[0];
    assert_eq!(conflict.file_path, "b.md");
    assert_eq!(conflict.conflict_type, ConflictType::ModifyDelete);
    assert!(conflict.ours.is_none());

    // Keeping the local deletion leaves the file absent.
    let keep_deleted = BTreeMap::from([("b.md".to_string(), Resolution::UseOurs)]);
    let resolved = fx
        .engine
        .run_sync(&review(), &deploy(), Some(&keep_deleted))
        .expect("resolve");
    assert_eq!(resolved.status, SyncStatus::Success);
    assert_eq!(fx.get(&web_location()), tree(&[("SKILL.md", BASE)]));
}

// ---------------------------------------------------------------------------
// 5. Previews and snapshots
// ---------------------------------------------------------------------------

#[test]
fn previews_write_nothing() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let updated = tree(&[("SKILL.md", &edit(BASE, "step three", "step 3"))]);
    fx.set(&Location::Collection, updated.clone());
    let versions = fx.engine.store().backend().version_count();

    let merge = fx.engine.preview_merge(&review(), &deploy()).expect("preview");
    assert_eq!(merge.resolved_files, updated);

    let diffs = fx.engine.preview_diffs(&review(), &deploy()).expect("diffs");
    let diff = diffs.get("SKILL.md").expect("diff for SKILL.md");
    assert!(diff.contains("-step three"));
    assert!(diff.contains("+step 3"));

    assert_eq!(fx.engine.store().backend().version_count(), versions);
    assert_eq!(fx.get(&web_location()), tree(&[("SKILL.md", BASE)]));
}

#[test]
fn manual_snapshot_descends_from_pinned_version() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let pin = fx
        .manifest()
        .pinned_version(&review(), &web_location())
        .cloned()
        .expect("pin");

    let snapshot = fx.engine.snapshot(&review(), &web_location()).expect("snapshot");
    assert_eq!(snapshot.origin, VersionOrigin::ManualSnapshot);
    assert_eq!(snapshot.parent_version_id, Some(pin.version));
    assert_eq!(snapshot.tree_hash, pin.tree_hash);
}

#[test]
fn snapshot_of_missing_artifact_is_rejected() {
    let fx = Fixture::new();
    let err = fx.engine.snapshot(&review(), &Location::Source).unwrap_err();
    assert!(matches!(err, tether_sync::SyncError::Validation(_)));
}

#[test]
fn unknown_artifact_id_is_rejected_before_reading() {
    let fx = Fixture::new();
    let err = fx
        .engine
        .run_sync(&ArtifactId::from("../escape"), &deploy(), None)
        .unwrap_err();
    assert!(matches!(err, tether_sync::SyncError::Validation(_)));
    assert!(fx.engine.workspace().read_tree(&review(), &web_location()).expect("read").is_empty());
}

// ---------------------------------------------------------------------------
// 6. Artifact-wide drift and agreement
// ---------------------------------------------------------------------------

fn mobile() -> ProjectId {
    ProjectId::from("mobile")
}

#[test]
fn artifact_drift_reports_the_one_drifted_project() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let to_mobile = Direction::CollectionToProject(mobile());
    fx.engine.run_sync(&review(), &to_mobile, None).expect("deploy to mobile");

    let clean = fx.engine.check_artifact_drift(&review()).expect("drift");
    assert!(clean.is_none());
    assert_eq!(clean.directions.len(), 2);

    let mobile_location = Location::Project(mobile());
    fx.set(&mobile_location, tree(&[("SKILL.md", &edit(BASE, "step two", "step 2"))]));

    let drift = fx.engine.check_artifact_drift(&review()).expect("drift");
    assert_eq!(drift.drift_type, DriftType::Modified);
    assert_eq!(drift.change_origin, ChangeOrigin::LocalModification);
    // No source files and no source baseline: only the two projects count.
    let checked: Vec<&Direction> = drift.directions.iter().map(|(d, _)| d).collect();
    assert_eq!(checked, vec![&to_mobile, &deploy()]);
    let drifted: Vec<&Direction> = drift.drifted().map(|(d, _)| d).collect();
    assert_eq!(drifted, vec![&to_mobile]);
}

#[test]
fn artifact_drift_covers_pinned_projects_that_lost_their_files() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    fx.set(&web_location(), FileTree::new());

    let drift = fx.engine.check_artifact_drift(&review()).expect("drift");
    assert!(!drift.is_none());
    assert_eq!(drift.directions.len(), 1);
    assert_eq!(drift.directions[0].0, deploy());
}

#[test]
fn artifact_drift_conflict_outranks_upstream_changes() {
    let fx = Fixture::new();
    fx.set(&Location::Source, tree(&[("SKILL.md", BASE)]));
    fx.engine
        .run_sync(&review(), &Direction::SourceToCollection, None)
        .expect("import");
    fx.engine.run_sync(&review(), &deploy(), None).expect("deploy");

    fx.set(&Location::Source, tree(&[("SKILL.md", &edit(BASE, "step one", "step 1"))]));
    fx.set(&Location::Collection, tree(&[("SKILL.md", &edit(BASE, "step four", "step 4"))]));
    fx.set(&web_location(), tree(&[("SKILL.md", &edit(BASE, "step four", "step IV"))]));

    let drift = fx.engine.check_artifact_drift(&review()).expect("drift");
    assert_eq!(drift.drift_type, DriftType::Conflict);
    assert_eq!(drift.directions.len(), 2);
    assert_eq!(drift.directions[0].0, Direction::SourceToCollection);
    assert_eq!(drift.directions[0].1.drift_type, DriftType::Conflict);
}

#[test]
fn identical_edits_on_both_sides_pin_the_agreed_version() {
    let fx = Fixture::deployed(tree(&[("SKILL.md", BASE)]));
    let before = fx
        .manifest()
        .pinned_version(&review(), &web_location())
        .cloned()
        .expect("pin");

    let same = tree(&[("SKILL.md", &edit(BASE, "step three", "step 3"))]);
    fx.set(&Location::Collection, same.clone());
    fx.set(&web_location(), same);

    let attempt = fx.engine.run_sync(&review(), &deploy(), None).expect("sync");
    assert_eq!(attempt.status, SyncStatus::Success);
    assert_eq!(attempt.strategy, SyncStrategy::Noop);
    assert_eq!(attempt.write_count(), 0);

    let agreed = attempt.post_sync_version_id.clone().expect("agreed version");
    let pin = fx
        .manifest()
        .pinned_version(&review(), &web_location())
        .cloned()
        .expect("pin");
    assert_ne!(pin.version, before.version);
    assert_eq!(pin.version, agreed);

    let snapshot = fx.engine.snapshot(&review(), &web_location()).expect("snapshot");
    assert_eq!(snapshot.parent_version_id, Some(agreed));
}
