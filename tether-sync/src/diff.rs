//! Structured diffs over file-hash mappings.
//!
//! Everything here is pure: callers hand in hash maps (and, for binary
//! sniffing and unified diffs, bytes). Nothing touches the filesystem.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use tether_core::{BinaryPolicy, ContentHash, FileHashes};

// ---------------------------------------------------------------------------
// Two-way
// ---------------------------------------------------------------------------

/// Classification of one path between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoWayEntry {
    pub path: String,
    pub kind: ChangeKind,
    pub old: Option<ContentHash>,
    pub new: Option<ContentHash>,
}

/// Every path present in either side, sorted by path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TwoWayDiff {
    pub entries: Vec<TwoWayEntry>,
}

impl TwoWayDiff {
    /// Entries that are not `Unchanged`.
    pub fn changes(&self) -> impl Iterator<Item = &TwoWayEntry> {
        self.entries.iter().filter(|e| e.kind != ChangeKind::Unchanged)
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

/// Compare two hash mappings path by path.
pub fn diff_two_way(old: &FileHashes, new: &FileHashes) -> TwoWayDiff {
    let entries = union_paths(&[old, new])
        .into_iter()
        .map(|path| {
            let o = old.get(&path).cloned();
            let n = new.get(&path).cloned();
            let kind = match (&o, &n) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(a), Some(b)) if a != b => ChangeKind::Modified,
                _ => ChangeKind::Unchanged,
            };
            TwoWayEntry {
                path,
                kind,
                old: o,
                new: n,
            }
        })
        .collect();
    TwoWayDiff { entries }
}

// ---------------------------------------------------------------------------
// Three-way
// ---------------------------------------------------------------------------

/// Classification of one path across base / ours / theirs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreeWayStatus {
    Unchanged,
    OursOnlyChanged,
    TheirsOnlyChanged,
    BothChangedSame,
    BothChangedDifferent,
    AddedOurs,
    AddedTheirs,
    AddedBothSame,
    AddedBothDifferent,
    DeletedOurs,
    DeletedTheirs,
    DeletedBoth,
    ModifyDelete,
}

impl ThreeWayStatus {
    /// Paths whose outcome depends on combining two different contents.
    pub fn needs_content_merge(self) -> bool {
        matches!(
            self,
            ThreeWayStatus::BothChangedDifferent
                | ThreeWayStatus::AddedBothDifferent
                | ThreeWayStatus::ModifyDelete
        )
    }
}

impl fmt::Display for ThreeWayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreeWayStatus::Unchanged => "unchanged",
            ThreeWayStatus::OursOnlyChanged => "ours_only_changed",
            ThreeWayStatus::TheirsOnlyChanged => "theirs_only_changed",
            ThreeWayStatus::BothChangedSame => "both_changed_same",
            ThreeWayStatus::BothChangedDifferent => "both_changed_different",
            ThreeWayStatus::AddedOurs => "added_ours",
            ThreeWayStatus::AddedTheirs => "added_theirs",
            ThreeWayStatus::AddedBothSame => "added_both_same",
            ThreeWayStatus::AddedBothDifferent => "added_both_different",
            ThreeWayStatus::DeletedOurs => "deleted_ours",
            ThreeWayStatus::DeletedTheirs => "deleted_theirs",
            ThreeWayStatus::DeletedBoth => "deleted_both",
            ThreeWayStatus::ModifyDelete => "modify_delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreeWayEntry {
    pub path: String,
    pub status: ThreeWayStatus,
    pub base: Option<ContentHash>,
    pub ours: Option<ContentHash>,
    pub theirs: Option<ContentHash>,
}

/// Every path present in any of the three sides, sorted by path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreeWayDiff {
    pub entries: Vec<ThreeWayEntry>,
}

impl ThreeWayDiff {
    pub fn get(&self, path: &str) -> Option<&ThreeWayEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// No path needs both sides combined.
    pub fn is_one_sided(&self) -> bool {
        !self.entries.iter().any(|e| e.status.needs_content_merge())
    }

    /// Some path differs between base and ours.
    pub fn ours_changed(&self) -> bool {
        self.entries.iter().any(|e| e.ours != e.base)
    }

    /// Paths that need content to decide.
    pub fn merge_candidates(&self) -> impl Iterator<Item = &ThreeWayEntry> {
        self.entries.iter().filter(|e| e.status.needs_content_merge())
    }

    pub fn count(&self, status: ThreeWayStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

/// Classify every path across base / ours / theirs.
pub fn diff_three_way(base: &FileHashes, ours: &FileHashes, theirs: &FileHashes) -> ThreeWayDiff {
    let entries = union_paths(&[base, ours, theirs])
        .into_iter()
        .map(|path| {
            let b = base.get(&path).cloned();
            let o = ours.get(&path).cloned();
            let t = theirs.get(&path).cloned();
            let status = classify(b.as_ref(), o.as_ref(), t.as_ref());
            ThreeWayEntry {
                path,
                status,
                base: b,
                ours: o,
                theirs: t,
            }
        })
        .collect();
    ThreeWayDiff { entries }
}

fn classify(
    base: Option<&ContentHash>,
    ours: Option<&ContentHash>,
    theirs: Option<&ContentHash>,
) -> ThreeWayStatus {
    use ThreeWayStatus::*;

    match (base, ours, theirs) {
        (None, Some(o), Some(t)) if o == t => AddedBothSame,
        (None, Some(_), Some(_)) => AddedBothDifferent,
        (None, Some(_), None) => AddedOurs,
        (None, None, Some(_)) => AddedTheirs,
        // A path only reaches here if some side has it.
        (None, None, None) => Unchanged,

        (Some(_), None, None) => DeletedBoth,
        (Some(b), None, Some(t)) if t == b => DeletedOurs,
        (Some(_), None, Some(_)) => ModifyDelete,
        (Some(b), Some(o), None) if o == b => DeletedTheirs,
        (Some(_), Some(_), None) => ModifyDelete,

        (Some(b), Some(o), Some(t)) => match (o == b, t == b) {
            (true, true) => Unchanged,
            (true, false) => TheirsOnlyChanged,
            (false, true) => OursOnlyChanged,
            (false, false) if o == t => BothChangedSame,
            (false, false) => BothChangedDifferent,
        },
    }
}

pub(crate) fn union_paths(maps: &[&FileHashes]) -> BTreeSet<String> {
    maps.iter().flat_map(|m| m.keys().cloned()).collect()
}

// ---------------------------------------------------------------------------
// Content helpers
// ---------------------------------------------------------------------------

/// Whether `bytes` at `path` must be treated as binary.
///
/// Binary if the extension is listed, the file exceeds the text size
/// limit, or the sniffed prefix contains NUL or is not UTF-8.
pub fn is_binary(path: &str, bytes: &[u8], policy: &BinaryPolicy) -> bool {
    if policy.has_binary_extension(path) {
        return true;
    }
    if bytes.len() as u64 > policy.max_text_bytes {
        return true;
    }
    let sniff = &bytes[..bytes.len().min(policy.sniff_bytes)];
    if sniff.contains(&0) {
        return true;
    }
    match std::str::from_utf8(sniff) {
        Ok(_) => false,
        // A multi-byte character cut off by the sniff window is still text.
        Err(err) => err.error_len().is_some() || sniff.len() == bytes.len(),
    }
}

/// Unified diff of `old` → `new` for `path`, or `None` when identical.
///
/// Line endings are normalised to LF so CRLF churn does not show up.
pub fn unified_diff(path: &str, old: &str, new: &str) -> Option<String> {
    let old = old.replace("\r\n", "\n");
    let new = new.replace("\r\n", "\n");
    if old == new {
        return None;
    }
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    Some(
        TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
