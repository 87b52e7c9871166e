//! On-disk layout under `~/.tether/`.
//!
//! ```text
//! ~/.tether/
//!   config.yaml
//!   manifest.yaml
//!   manifest.lock
//!   store/
//!     versions/<version_id>.json
//!     baselines/<artifact_id>/<from>__<to>.json
//!     objects/<hash[..2]>/<hash>
//! ```
//!
//! Every helper takes an explicit `home`; [`home`] resolves the real one.

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::types::{ArtifactId, ContentHash, Location, VersionId};

pub const CONFIG_FILE: &str = "config.yaml";
pub const MANIFEST_FILE: &str = "manifest.yaml";
pub const MANIFEST_LOCK_FILE: &str = "manifest.lock";

pub fn tether_root(home: &Path) -> PathBuf {
    home.join(".tether")
}

pub fn config_path(home: &Path) -> PathBuf {
    tether_root(home).join(CONFIG_FILE)
}

pub fn manifest_path(home: &Path) -> PathBuf {
    tether_root(home).join(MANIFEST_FILE)
}

pub fn manifest_lock_path(home: &Path) -> PathBuf {
    tether_root(home).join(MANIFEST_LOCK_FILE)
}

pub fn store_root(home: &Path) -> PathBuf {
    tether_root(home).join("store")
}

pub fn versions_dir(home: &Path) -> PathBuf {
    store_root(home).join("versions")
}

pub fn version_path(home: &Path, id: &VersionId) -> PathBuf {
    versions_dir(home).join(format!("{}.json", id.0))
}

pub fn baselines_dir(home: &Path, artifact: &ArtifactId) -> PathBuf {
    store_root(home).join("baselines").join(&artifact.0)
}

pub fn baseline_path(
    home: &Path,
    artifact: &ArtifactId,
    from: &Location,
    to: &Location,
) -> PathBuf {
    baselines_dir(home, artifact).join(format!("{}__{}.json", from.key(), to.key()))
}

pub fn objects_dir(home: &Path) -> PathBuf {
    store_root(home).join("objects")
}

/// Content blob path, fanned out by the first two hex digits.
pub fn object_path(home: &Path, hash: &ContentHash) -> PathBuf {
    let fan = hash.0.get(..2).unwrap_or("00");
    objects_dir(home).join(fan).join(&hash.0)
}

/// The user's home directory.
pub fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectId;

    #[test]
    fn baseline_path_is_keyed_by_ordered_pair() {
        let home = Path::new("/home/u");
        let artifact = ArtifactId::from("review");
        let web = Location::Project(ProjectId::from("web"));
        let forward = baseline_path(home, &artifact, &Location::Collection, &web);
        let backward = baseline_path(home, &artifact, &web, &Location::Collection);
        assert!(forward.ends_with(".tether/store/baselines/review/collection__project.web.json"));
        assert_ne!(forward, backward);
    }

    #[test]
    fn object_path_fans_out() {
        let path = object_path(Path::new("/home/u"), &ContentHash::from("abcdef"));
        assert!(path.ends_with(".tether/store/objects/ab/abcdef"));
    }
}
