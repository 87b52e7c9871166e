//! Three-way merge of artifact trees.
//!
//! [`MergeEngine::merge`] walks a [`ThreeWayDiff`]: one-sided and
//! identical changes resolve directly; paths changed differently on both
//! sides go through a line-level diff3 ([`merge_text`]) and are accepted
//! only when no hunks overlap or touch. Binary content and modify/delete
//! pairs always become a [`ConflictRecord`].
//!
//! A [`MergeResult`] with conflicts is never applied as-is; callers
//! supply a [`Resolution`] for each conflicted path first.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffTag};

use tether_core::{BinaryPolicy, FileTree};

use crate::diff::{is_binary, ThreeWayDiff, ThreeWayEntry, ThreeWayStatus};
use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Why a path could not be merged automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    BothModified,
    ModifyDelete,
    BinaryMismatch,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::BothModified => write!(f, "both_modified"),
            ConflictType::ModifyDelete => write!(f, "modify_delete"),
            ConflictType::BinaryMismatch => write!(f, "binary_mismatch"),
        }
    }
}

/// One path that needed both sides combined during a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub file_path: String,
    pub conflict_type: ConflictType,
    pub status: ThreeWayStatus,
    pub is_binary: bool,
    /// The line-level merge succeeded; the merged bytes are in
    /// [`MergeResult::resolved_files`].
    pub auto_mergeable: bool,
    pub base: Option<Vec<u8>>,
    pub ours: Option<Vec<u8>>,
    pub theirs: Option<Vec<u8>>,
    /// Text conflicts only: the merge rendered with conflict markers.
    pub merged_with_markers: Option<String>,
    pub conflicting_hunks: usize,
}

/// Output of one merge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeResult {
    /// Final content of every path that resolved. Deleted paths are absent;
    /// conflicted paths are absent until resolved.
    pub resolved_files: FileTree,
    /// Paths that still need a caller decision.
    pub conflicts: Vec<ConflictRecord>,
    /// Paths that were changed on both sides and merged cleanly.
    pub auto_merged: Vec<ConflictRecord>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn conflict_paths(&self) -> Vec<&str> {
        self.conflicts.iter().map(|c| c.file_path.as_str()).collect()
    }

    /// Apply caller decisions to the conflicted paths.
    ///
    /// Every key must name a conflicted path. If some conflicts remain
    /// unresolved the outcome is [`ResolutionOutcome::Pending`].
    pub fn apply_resolutions(
        &self,
        resolutions: &BTreeMap<String, Resolution>,
    ) -> Result<ResolutionOutcome, SyncError> {
        if let Some(unknown) = resolutions
            .keys()
            .find(|path| !self.conflicts.iter().any(|c| &c.file_path == *path))
        {
            return Err(SyncError::Validation(format!(
                "resolution given for '{unknown}', which is not in conflict"
            )));
        }

        let mut files = self.resolved_files.clone();
        let mut unresolved = Vec::new();
        for conflict in &self.conflicts {
            let Some(resolution) = resolutions.get(&conflict.file_path) else {
                unresolved.push(conflict.clone());
                continue;
            };
            match resolution.pick(conflict) {
                Some(bytes) => {
                    files.insert(conflict.file_path.clone(), bytes);
                }
                None => {
                    files.remove(&conflict.file_path);
                }
            }
        }

        if unresolved.is_empty() {
            Ok(ResolutionOutcome::Complete(files))
        } else {
            Ok(ResolutionOutcome::Pending { unresolved })
        }
    }
}

/// Caller decision for one conflicted path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "content", rename_all = "snake_case")]
pub enum Resolution {
    UseOurs,
    UseTheirs,
    UseBase,
    UseCustom(Vec<u8>),
}

impl Resolution {
    /// Final bytes, or `None` when the chosen side does not have the file.
    fn pick(&self, conflict: &ConflictRecord) -> Option<Vec<u8>> {
        match self {
            Resolution::UseOurs => conflict.ours.clone(),
            Resolution::UseTheirs => conflict.theirs.clone(),
            Resolution::UseBase => conflict.base.clone(),
            Resolution::UseCustom(bytes) => Some(bytes.clone()),
        }
    }
}

/// Result of [`MergeResult::apply_resolutions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Every conflict has a decision; this is the final tree.
    Complete(FileTree),
    /// Some conflicts have no decision yet.
    Pending { unresolved: Vec<ConflictRecord> },
}

// ---------------------------------------------------------------------------
// Merge engine
// ---------------------------------------------------------------------------

/// Content for the three sides of a merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub diff: &'a ThreeWayDiff,
    pub base: &'a FileTree,
    pub ours: &'a FileTree,
    pub theirs: &'a FileTree,
}

/// Stateless three-way merger.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    policy: BinaryPolicy,
}

impl MergeEngine {
    pub fn new(policy: BinaryPolicy) -> Self {
        Self { policy }
    }

    pub fn merge(&self, input: MergeInput<'_>) -> Result<MergeResult, SyncError> {
        let mut result = MergeResult::default();

        for entry in &input.diff.entries {
            let path = entry.path.as_str();
            match entry.status {
                ThreeWayStatus::Unchanged
                | ThreeWayStatus::OursOnlyChanged
                | ThreeWayStatus::AddedOurs
                | ThreeWayStatus::BothChangedSame
                | ThreeWayStatus::AddedBothSame => {
                    let bytes = content(input.ours, path, entry.ours.is_some(), "ours")?;
                    if let Some(bytes) = bytes {
                        result.resolved_files.insert(entry.path.clone(), bytes);
                    }
                }
                ThreeWayStatus::TheirsOnlyChanged | ThreeWayStatus::AddedTheirs => {
                    if let Some(bytes) = content(input.theirs, path, true, "theirs")? {
                        result.resolved_files.insert(entry.path.clone(), bytes);
                    }
                }
                ThreeWayStatus::DeletedOurs
                | ThreeWayStatus::DeletedTheirs
                | ThreeWayStatus::DeletedBoth => {}
                ThreeWayStatus::BothChangedDifferent
                | ThreeWayStatus::AddedBothDifferent
                | ThreeWayStatus::ModifyDelete => {
                    self.merge_path(entry, input, &mut result)?;
                }
            }
        }

        if !result.conflicts.is_empty() {
            tracing::debug!(
                conflicts = result.conflicts.len(),
                auto_merged = result.auto_merged.len(),
                "merge left conflicts"
            );
        }
        Ok(result)
    }

    fn merge_path(
        &self,
        entry: &ThreeWayEntry,
        input: MergeInput<'_>,
        result: &mut MergeResult,
    ) -> Result<(), SyncError> {
        let path = entry.path.as_str();
        // Base content comes from the store and may not have been recorded.
        let base = input.base.get(path).filter(|_| entry.base.is_some()).cloned();
        let base_missing = entry.base.is_some() && base.is_none();
        let ours = content(input.ours, path, entry.ours.is_some(), "ours")?;
        let theirs = content(input.theirs, path, entry.theirs.is_some(), "theirs")?;

        let binary = [&base, &ours, &theirs]
            .into_iter()
            .flatten()
            .any(|bytes| is_binary(path, bytes, &self.policy));

        let mut record = ConflictRecord {
            file_path: entry.path.clone(),
            conflict_type: ConflictType::BothModified,
            status: entry.status,
            is_binary: binary,
            auto_mergeable: false,
            base,
            ours,
            theirs,
            merged_with_markers: None,
            conflicting_hunks: 0,
        };

        if entry.status == ThreeWayStatus::ModifyDelete {
            // A deletion has no textual form to combine with an edit.
            record.conflict_type = ConflictType::ModifyDelete;
            result.conflicts.push(record);
            return Ok(());
        }
        if binary {
            record.conflict_type = ConflictType::BinaryMismatch;
            result.conflicts.push(record);
            return Ok(());
        }
        if base_missing {
            tracing::warn!(path, "merge base content unavailable; leaving conflict");
            result.conflicts.push(record);
            return Ok(());
        }

        let texts = (
            as_text(record.base.as_deref()),
            as_text(record.ours.as_deref()),
            as_text(record.theirs.as_deref()),
        );
        let (Some(base_text), Some(ours_text), Some(theirs_text)) = texts else {
            // Invalid UTF-8 beyond the sniff window.
            record.is_binary = true;
            record.conflict_type = ConflictType::BinaryMismatch;
            result.conflicts.push(record);
            return Ok(());
        };

        match merge_text(base_text, ours_text, theirs_text) {
            TextMerge::Clean(merged) => {
                record.auto_mergeable = true;
                result
                    .resolved_files
                    .insert(entry.path.clone(), merged.into_bytes());
                result.auto_merged.push(record);
            }
            TextMerge::Conflicted { marked, conflicts } => {
                record.merged_with_markers = Some(marked);
                record.conflicting_hunks = conflicts;
                result.conflicts.push(record);
            }
        }
        Ok(())
    }
}

/// Look up `path` in `tree` when the diff says it should be there.
fn content(
    tree: &FileTree,
    path: &str,
    expected: bool,
    side: &str,
) -> Result<Option<Vec<u8>>, SyncError> {
    if !expected {
        return Ok(None);
    }
    tree.get(path).cloned().map(Some).ok_or_else(|| {
        SyncError::Validation(format!("content for '{path}' missing from {side} tree"))
    })
}

/// Absent content merges as an empty file.
fn as_text(bytes: Option<&[u8]>) -> Option<&str> {
    match bytes {
        None => Some(""),
        Some(bytes) => std::str::from_utf8(bytes).ok(),
    }
}

// ---------------------------------------------------------------------------
// Line-level diff3
// ---------------------------------------------------------------------------

/// Outcome of [`merge_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMerge {
    Clean(String),
    Conflicted { marked: String, conflicts: usize },
}

/// A run of changed lines: base lines `[base_start, base_end)` become side
/// lines `[side_start, side_end)`.
#[derive(Debug, Clone, Copy)]
struct Hunk {
    base_start: usize,
    base_end: usize,
    side_start: usize,
    side_end: usize,
}

fn hunks(base: &[&str], side: &[&str]) -> Vec<Hunk> {
    let mut out: Vec<Hunk> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, base, side) {
        let (tag, old, new) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.base_end == old.start && last.side_end == new.start => {
                last.base_end = old.end;
                last.side_end = new.end;
            }
            _ => out.push(Hunk {
                base_start: old.start,
                base_end: old.end,
                side_start: new.start,
                side_end: new.end,
            }),
        }
    }
    out
}

/// Three-way merge of text, line by line.
///
/// Hunks from the two sides that overlap or touch in the base form one
/// region; a region changed by only one side takes that side, a region
/// changed identically by both takes either, anything else conflicts.
pub fn merge_text(base: &str, ours: &str, theirs: &str) -> TextMerge {
    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let ours_lines: Vec<&str> = ours.split_inclusive('\n').collect();
    let theirs_lines: Vec<&str> = theirs.split_inclusive('\n').collect();

    let ours_hunks = hunks(&base_lines, &ours_lines);
    let theirs_hunks = hunks(&base_lines, &theirs_lines);

    let mut out = String::new();
    let mut conflicts = 0;
    let mut pos = 0;
    let (mut i, mut j) = (0, 0);

    while i < ours_hunks.len() || j < theirs_hunks.len() {
        let lo = match (ours_hunks.get(i), theirs_hunks.get(j)) {
            (Some(a), Some(b)) => a.base_start.min(b.base_start),
            (Some(a), None) => a.base_start,
            (None, Some(b)) => b.base_start,
            (None, None) => break,
        };
        let mut hi = lo;
        let (ours_from, theirs_from) = (i, j);

        // Grow the region until no hunk on either side starts inside or at its edge.
        loop {
            let mut grew = false;
            while let Some(h) = ours_hunks.get(i).filter(|h| h.base_start <= hi) {
                hi = hi.max(h.base_end);
                i += 1;
                grew = true;
            }
            while let Some(h) = theirs_hunks.get(j).filter(|h| h.base_start <= hi) {
                hi = hi.max(h.base_end);
                j += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        push_lines(&mut out, &base_lines[pos..lo]);
        let ours_region = &ours_hunks[ours_from..i];
        let theirs_region = &theirs_hunks[theirs_from..j];

        if theirs_region.is_empty() {
            out.push_str(&render_region(&base_lines, lo, hi, ours_region, &ours_lines));
        } else if ours_region.is_empty() {
            out.push_str(&render_region(&base_lines, lo, hi, theirs_region, &theirs_lines));
        } else {
            let ours_text = render_region(&base_lines, lo, hi, ours_region, &ours_lines);
            let theirs_text = render_region(&base_lines, lo, hi, theirs_region, &theirs_lines);
            if ours_text == theirs_text {
                out.push_str(&ours_text);
            } else {
                conflicts += 1;
                push_conflict(&mut out, &ours_text, &base_lines[lo..hi].concat(), &theirs_text);
            }
        }
        pos = hi;
    }
    push_lines(&mut out, &base_lines[pos..]);

    if conflicts == 0 {
        TextMerge::Clean(out)
    } else {
        TextMerge::Conflicted {
            marked: out,
            conflicts,
        }
    }
}

fn render_region(base: &[&str], lo: usize, hi: usize, region: &[Hunk], side: &[&str]) -> String {
    let mut out = String::new();
    let mut pos = lo;
    for h in region {
        push_lines(&mut out, &base[pos..h.base_start]);
        push_lines(&mut out, &side[h.side_start..h.side_end]);
        pos = h.base_end;
    }
    push_lines(&mut out, &base[pos..hi]);
    out
}

fn push_lines(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
    }
}

fn push_conflict(out: &mut String, ours: &str, base: &str, theirs: &str) {
    out.push_str("<<<<<<< ours\n");
    push_terminated(out, ours);
    out.push_str("||||||| base\n");
    push_terminated(out, base);
    out.push_str("=======\n");
    push_terminated(out, theirs);
    out.push_str(">>>>>>> theirs\n");
}

fn push_terminated(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_three_way;
    use tether_core::hasher::hash_files;

    fn tree(entries: &[(&str, &[u8])]) -> FileTree {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_vec()))
            .collect()
    }

    fn merge(base: &FileTree, ours: &FileTree, theirs: &FileTree) -> MergeResult {
        let diff = diff_three_way(&hash_files(base), &hash_files(ours), &hash_files(theirs));
        MergeEngine::default()
            .merge(MergeInput {
                diff: &diff,
                base,
                ours,
                theirs,
            })
            .expect("merge")
    }

    const BASE: &str = "one\ntwo\nthree\nfour\nfive\n";

    #[test]
    fn non_overlapping_edits_both_survive() {
        let merged =
            merge_text(BASE, "ONE\ntwo\nthree\nfour\nfive\n", "one\ntwo\nthree\nfour\nFIVE\n");
        assert_eq!(merged, TextMerge::Clean("ONE\ntwo\nthree\nfour\nFIVE\n".to_string()));
    }

    #[test]
    fn overlapping_edits_conflict_with_markers() {
        let merged = merge_text(
            BASE,
            "one\nTWO-ours\nthree\nfour\nfive\n",
            "one\nTWO-theirs\nthree\nfour\nfive\n",
        );
        match merged {
            TextMerge::Conflicted { marked, conflicts } => {
                assert_eq!(conflicts, 1);
                assert_eq!(
                    marked,
                    concat!(
                        "one\n<<<<<<< ours\nTWO-ours\n||||||| base\ntwo\n",
                        "=======\nTWO-theirs\n>>>>>>> theirs\nthree\nfour\nfive\n",
                    )
                );
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn adjacent_edits_conflict() {
        let merged =
            merge_text(BASE, "one\nTWO\nthree\nfour\nfive\n", "one\ntwo\nTHREE\nfour\nfive\n");
        assert!(matches!(merged, TextMerge::Conflicted { conflicts: 1, .. }));
    }

    #[test]
    fn identical_edits_merge_once() {
        let edited = "one\n2\nthree\nfour\nfive\n";
        assert_eq!(merge_text(BASE, edited, edited), TextMerge::Clean(edited.to_string()));
    }

    #[test]
    fn insertions_at_same_point_conflict() {
        let merged = merge_text(
            BASE,
            "one\nA\ntwo\nthree\nfour\nfive\n",
            "one\nB\ntwo\nthree\nfour\nfive\n",
        );
        assert!(matches!(merged, TextMerge::Conflicted { .. }));
    }

    #[test]
    fn one_side_append_other_side_prepend() {
        let merged = merge_text(
            BASE,
            "zero\none\ntwo\nthree\nfour\nfive\n",
            "one\ntwo\nthree\nfour\nfive\nsix\n",
        );
        assert_eq!(
            merged,
            TextMerge::Clean("zero\none\ntwo\nthree\nfour\nfive\nsix\n".to_string())
        );
    }

    #[test]
    fn missing_trailing_newline_in_conflict_is_terminated() {
        let merged = merge_text("a", "b", "c");
        match merged {
            TextMerge::Conflicted { marked, .. } => {
                assert_eq!(
                    marked,
                    "<<<<<<< ours\nb\n||||||| base\na\n=======\nc\n>>>>>>> theirs\n"
                );
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn one_sided_tree_changes_resolve_without_records() {
        let base = tree(&[("a.md", b"a"), ("gone.md", b"x"), ("kept.md", b"k")]);
        let ours = tree(&[("a.md", b"a"), ("gone.md", b"x"), ("kept.md", b"k2"), ("new.md", b"n")]);
        let theirs = tree(&[("a.md", b"a2"), ("kept.md", b"k")]);

        let result = merge(&base, &ours, &theirs);
        assert!(result.is_clean());
        assert!(result.auto_merged.is_empty());
        assert_eq!(
            result.resolved_files,
            tree(&[("a.md", b"a2"), ("kept.md", b"k2"), ("new.md", b"n")])
        );
    }

    #[test]
    fn text_merge_records_auto_merged_path() {
        let base = tree(&[("a.md", BASE.as_bytes())]);
        let ours = tree(&[("a.md", b"ONE\ntwo\nthree\nfour\nfive\n")]);
        let theirs = tree(&[("a.md", b"one\ntwo\nthree\nfour\nFIVE\n")]);

        let result = merge(&base, &ours, &theirs);
        assert!(result.is_clean());
        assert_eq!(result.auto_merged.len(), 1);
        assert!(result.auto_merged[0].auto_mergeable);
        assert_eq!(
            result.resolved_files.get("a.md").map(Vec::as_slice),
            Some(&b"ONE\ntwo\nthree\nfour\nFIVE\n"[..])
        );
    }

    #[test]
    fn binary_mismatch_never_auto_merges() {
        let base = tree(&[("logo.png", b"\x89PNG base")]);
        let ours = tree(&[("logo.png", b"\x89PNG ours")]);
        let theirs = tree(&[("logo.png", b"\x89PNG theirs")]);

        let result = merge(&base, &ours, &theirs);
        assert_eq!(result.conflicts.len(), 1);
        let c = &result.conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::BinaryMismatch);
        assert!(c.is_binary);
        assert!(!c.auto_mergeable);
        assert!(!result.resolved_files.contains_key("logo.png"));
    }

    #[test]
    fn nul_bytes_make_text_extension_binary() {
        let base = tree(&[("data.md", b"a\0\nb\n\nc\n")]);
        let ours = tree(&[("data.md", b"A\0\nb\n\nc\n")]);
        let theirs = tree(&[("data.md", b"a\0\nb\n\nC\n")]);
        let result = merge(&base, &ours, &theirs);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::BinaryMismatch);
    }

    #[test]
    fn modify_delete_is_always_a_conflict() {
        let base = tree(&[("b.md", b"line\n")]);
        let ours = FileTree::new();
        let theirs = tree(&[("b.md", b"line\nmore\n")]);

        let result = merge(&base, &ours, &theirs);
        assert_eq!(result.conflicts.len(), 1);
        let c = &result.conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::ModifyDelete);
        assert_eq!(c.status, ThreeWayStatus::ModifyDelete);
        assert!(c.ours.is_none());
        assert!(!c.auto_mergeable);
    }

    #[test]
    fn added_both_different_conflicts() {
        let base = FileTree::new();
        let ours = tree(&[("new.md", b"ours\n")]);
        let theirs = tree(&[("new.md", b"theirs\n")]);
        let result = merge(&base, &ours, &theirs);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].status, ThreeWayStatus::AddedBothDifferent);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::BothModified);
    }

    #[test]
    fn missing_side_content_is_validation_error() {
        let base = tree(&[("a.md", b"a")]);
        let ours = tree(&[("a.md", b"b")]);
        let theirs = tree(&[("a.md", b"c")]);
        let diff = diff_three_way(&hash_files(&base), &hash_files(&ours), &hash_files(&theirs));
        let err = MergeEngine::default()
            .merge(MergeInput {
                diff: &diff,
                base: &base,
                ours: &FileTree::new(),
                theirs: &theirs,
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn missing_base_content_conflicts_without_text_merge() {
        let base = tree(&[("a.md", b"one\ntwo\nthree\n")]);
        let ours = tree(&[("a.md", b"ONE\ntwo\nthree\n")]);
        let theirs = tree(&[("a.md", b"one\ntwo\nTHREE\n")]);
        let diff = diff_three_way(&hash_files(&base), &hash_files(&ours), &hash_files(&theirs));
        let result = MergeEngine::default()
            .merge(MergeInput {
                diff: &diff,
                base: &FileTree::new(),
                ours: &ours,
                theirs: &theirs,
            })
            .expect("merge");
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.conflicts[0].merged_with_markers.is_none());
        assert!(result.conflicts[0].base.is_none());
    }

    fn conflicted() -> MergeResult {
        let base = tree(&[("a.md", b"base\n"), ("b.md", b"b\n"), ("c.md", b"same\n")]);
        let ours = tree(&[("a.md", b"ours\n"), ("c.md", b"same\n")]);
        let theirs = tree(&[("a.md", b"theirs\n"), ("b.md", b"b2\n"), ("c.md", b"same\n")]);
        merge(&base, &ours, &theirs)
    }

    #[test]
    fn resolutions_complete_the_tree() {
        let result = conflicted();
        assert_eq!(result.conflict_paths(), vec!["a.md", "b.md"]);

        let resolutions = BTreeMap::from([
            ("a.md".to_string(), Resolution::UseCustom(b"custom\n".to_vec())),
            ("b.md".to_string(), Resolution::UseOurs),
        ]);
        match result.apply_resolutions(&resolutions).expect("apply") {
            ResolutionOutcome::Complete(files) => {
                assert_eq!(files, tree(&[("a.md", b"custom\n"), ("c.md", b"same\n")]));
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn use_theirs_and_use_base() {
        let result = conflicted();
        let resolutions = BTreeMap::from([
            ("a.md".to_string(), Resolution::UseBase),
            ("b.md".to_string(), Resolution::UseTheirs),
        ]);
        let outcome = result.apply_resolutions(&resolutions).expect("apply");
        let ResolutionOutcome::Complete(files) = outcome else {
            panic!("expected complete");
        };
        assert_eq!(files.get("a.md").map(Vec::as_slice), Some(&b"base\n"[..]));
        assert_eq!(files.get("b.md").map(Vec::as_slice), Some(&b"b2\n"[..]));
    }

    #[test]
    fn partial_resolutions_stay_pending() {
        let result = conflicted();
        let resolutions = BTreeMap::from([("a.md".to_string(), Resolution::UseOurs)]);
        match result.apply_resolutions(&resolutions).expect("apply") {
            ResolutionOutcome::Pending { unresolved } => {
                assert_eq!(unresolved.len(), 1);
                assert_eq!(unresolved[0].file_path, "b.md");
            }
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[test]
    fn resolution_for_unconflicted_path_is_rejected() {
        let result = conflicted();
        let resolutions = BTreeMap::from([("c.md".to_string(), Resolution::UseOurs)]);
        assert!(matches!(
            result.apply_resolutions(&resolutions),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn resolution_serializes_with_strategy_tag() {
        let json = serde_json::to_string(&Resolution::UseTheirs).expect("json");
        assert_eq!(json, r#"{"strategy":"use_theirs"}"#);
    }
}
