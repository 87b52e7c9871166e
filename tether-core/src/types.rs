//! Domain types for the Tether snapshot model.
//!
//! File paths inside an artifact tree are relative, `/`-separated strings;
//! they are keys into the tree, never resolved against the filesystem here.
//! All persisted types are serializable via serde.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for an artifact tracked by Tether.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    /// Reject ids that cannot be used as a single path component.
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_component(&self.0, "artifact id")
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ArtifactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of an immutable [`ArtifactVersion`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionId(pub String);

impl VersionId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VersionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VersionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lowercase hex SHA-256 digest of a file or a whole tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a project that artifacts are deployed into.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// Materialized artifact tree: relative path → file bytes.
pub type FileTree = BTreeMap<String, Vec<u8>>;

/// Hashed artifact tree: relative path → content hash.
///
/// A deleted file is an absent key, never a hash of empty content.
pub type FileHashes = BTreeMap<String, ContentHash>;

// ---------------------------------------------------------------------------
// Locations and directions
// ---------------------------------------------------------------------------

/// One of the places an artifact can live.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Location {
    /// The upstream repository the artifact was imported from.
    Source,
    /// The canonical local store.
    Collection,
    /// A deployment target.
    Project(ProjectId),
}

impl Location {
    /// Filesystem-safe key, used in store file names.
    pub fn key(&self) -> String {
        match self {
            Location::Source => "source".to_string(),
            Location::Collection => "collection".to_string(),
            Location::Project(p) => format!("project.{}", p.0),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            Location::Project(p) => validate_component(&p.0, "project id"),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Source => write!(f, "source"),
            Location::Collection => write!(f, "collection"),
            Location::Project(p) => write!(f, "project:{p}"),
        }
    }
}

impl FromStr for Location {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Location::Source),
            "collection" => Ok(Location::Collection),
            other => match other.strip_prefix("project:") {
                Some(name) if !name.is_empty() => Ok(Location::Project(ProjectId::from(name))),
                _ => Err(StoreError::Validation(format!(
                    "unknown location '{other}'; expected source, collection or project:<name>"
                ))),
            },
        }
    }
}

impl Serialize for Location {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Which way content flows during a sync. The second location is the
/// target that gets written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    SourceToCollection,
    CollectionToProject(ProjectId),
    ProjectToCollection(ProjectId),
}

impl Direction {
    /// Where content is read from (the "remote" / "theirs" side).
    pub fn from_location(&self) -> Location {
        match self {
            Direction::SourceToCollection => Location::Source,
            Direction::CollectionToProject(_) => Location::Collection,
            Direction::ProjectToCollection(p) => Location::Project(p.clone()),
        }
    }

    /// Where content is written (the "local" / "ours" side).
    pub fn target(&self) -> Location {
        match self {
            Direction::SourceToCollection => Location::Collection,
            Direction::CollectionToProject(p) => Location::Project(p.clone()),
            Direction::ProjectToCollection(_) => Location::Collection,
        }
    }

    /// The same pair walked the other way, if that is a valid direction.
    pub fn reverse(&self) -> Option<Direction> {
        match self {
            Direction::SourceToCollection => None,
            Direction::CollectionToProject(p) => Some(Direction::ProjectToCollection(p.clone())),
            Direction::ProjectToCollection(p) => Some(Direction::CollectionToProject(p.clone())),
        }
    }

    /// Origin recorded on the version a successful sync leaves on the target.
    pub fn applied_origin(&self) -> VersionOrigin {
        match self {
            Direction::SourceToCollection => VersionOrigin::UpstreamSync,
            Direction::CollectionToProject(_) => VersionOrigin::Deploy,
            Direction::ProjectToCollection(_) => VersionOrigin::LocalModification,
        }
    }

    /// Origin recorded when the read side is observed to have changed.
    pub fn observed_origin(&self) -> VersionOrigin {
        match self {
            Direction::SourceToCollection => VersionOrigin::UpstreamSync,
            _ => VersionOrigin::LocalModification,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.from_location(), self.target())
    }
}

// ---------------------------------------------------------------------------
// Versions and baselines
// ---------------------------------------------------------------------------

/// Why a version was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOrigin {
    UpstreamSync,
    LocalModification,
    Deploy,
    ManualSnapshot,
}

impl fmt::Display for VersionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrigin::UpstreamSync => write!(f, "upstream_sync"),
            VersionOrigin::LocalModification => write!(f, "local_modification"),
            VersionOrigin::Deploy => write!(f, "deploy"),
            VersionOrigin::ManualSnapshot => write!(f, "manual_snapshot"),
        }
    }
}

/// Immutable snapshot of an artifact tree at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub id: VersionId,
    pub artifact_id: ArtifactId,
    pub tree_hash: ContentHash,
    pub file_hashes: FileHashes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<VersionId>,
    pub origin: VersionOrigin,
    pub created_at: DateTime<Utc>,
}

/// Last point at which two locations agreed on an artifact.
///
/// `location_a` is the side content flowed from, `location_b` the side
/// that was written. `common_version_id` is the state of `location_a` and
/// the merge base for the next sync; `target_version_id` is what
/// `location_b` held when the sync finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub artifact_id: ArtifactId,
    pub location_a: Location,
    pub location_b: Location,
    pub common_version_id: VersionId,
    pub target_version_id: VersionId,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn validate_component(value: &str, what: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::Validation(format!("{what} must not be empty")));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(StoreError::Validation(format!(
            "{what} '{value}' must be a single path component"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
