//! Atomic file writes for [`DirWorkspace`](crate::workspace::DirWorkspace).
//!
//! ## `atomic_write`
//!
//! 1. Create the parent directory.
//! 2. Write the bytes to a hidden sibling named `.tether-<random>.tmp`.
//! 3. Rename onto the final path (atomic on POSIX).
//! 4. On any failure the temporary file is removed.
//!
//! A reader never observes a half-written file; it sees the old content or
//! the new content. Temp names are reserved: tree walks skip them and
//! artifact paths may not use them (see [`is_tmp_name`]).

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

pub(crate) const TMP_PREFIX: &str = ".tether-";
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// True for file names of the form `.tether-<random>.tmp`.
pub(crate) fn is_tmp_name(name: &str) -> bool {
    name.len() > TMP_PREFIX.len() + TMP_SUFFIX.len()
        && name.starts_with(TMP_PREFIX)
        && name.ends_with(TMP_SUFFIX)
}

/// Write `content` to `path` via a uniquely named sibling and a rename.
/// An existing file keeps its permissions.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TMP_PREFIX)
        .suffix(TMP_SUFFIX)
        .tempfile_in(parent)?;
    tmp.write_all(content)?;
    match_permissions(tmp.as_file(), path)?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "wrote file");
    Ok(())
}

#[cfg(unix)]
fn match_permissions(tmp: &File, path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = match std::fs::metadata(path) {
        Ok(meta) => meta.permissions(),
        Err(_) => std::fs::Permissions::from_mode(0o644),
    };
    tmp.set_permissions(permissions)
}

#[cfg(not(unix))]
fn match_permissions(_tmp: &File, _path: &Path) -> io::Result<()> {
    Ok(())
}

/// Remove `path`, then prune directories it leaves empty up to (not
/// including) `root`. A file that is already gone is not an error.
pub(crate) fn remove_and_prune(root: &Path, path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tracing::debug!(path = %path.display(), "removed file");

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        // Fails on a non-empty directory, which ends the walk.
        if std::fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
