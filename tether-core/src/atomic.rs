//! Atomic file replacement shared by the manifest and the file backend.

use std::io::Write;
use std::path::Path;

use crate::error::{unavailable, StoreError};

/// Write `bytes` to `path` through a uniquely named hidden sibling, then
/// rename it into place.
///
/// Every writer gets its own temp file (created `0600` on unix), so two
/// writers of the same path never trip over each other's rename; the last
/// rename wins. The temp file is removed if anything fails.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(unavailable(path, std::io::Error::other("invalid store path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| unavailable(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| unavailable(dir, e))?;
    tmp.write_all(bytes).map_err(|e| unavailable(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| unavailable(path, e.error))?;
    Ok(())
}
