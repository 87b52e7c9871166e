//! Tether core library: snapshot model, content hashing and persistence.
//!
//! - [`types`]: newtypes, locations, versions, baselines
//! - [`hasher`]: file and tree fingerprints
//! - [`store`]: [`SnapshotStore`] over a [`StoreBackend`]
//! - [`file_backend`]: JSON-on-disk backend
//! - [`manifest`]: pinned-version manifest
//! - [`config`]: `config.yaml`
//! - [`paths`]: `~/.tether/` layout

mod atomic;
pub mod config;
pub mod error;
pub mod file_backend;
pub mod hasher;
pub mod manifest;
pub mod paths;
pub mod store;
pub mod types;

pub use config::{BinaryPolicy, EngineConfig};
pub use error::StoreError;
pub use file_backend::FileBackend;
pub use manifest::{Manifest, PinnedVersion};
pub use store::{MemoryBackend, SnapshotStore, StoreBackend};
pub use types::{
    ArtifactId, ArtifactVersion, BaselineRecord, ContentHash, Direction, FileHashes, FileTree,
    Location, ProjectId, VersionId, VersionOrigin,
};
