//! Ownership-aware directory creation.
//!
//! Ownership is asserted, not set once: the final directory is chowned to
//! the requested pair even when it already existed.

use std::fs::DirBuilder;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use bock_common::{BockError, BockResult};

/// Create `path` (single level) with `mode`, then chown it to `uid`:`gid`.
///
/// # Errors
///
/// Returns an error if creation fails for any reason other than the
/// directory already existing, or if the ownership change fails.
pub fn mkdir_as(path: &Path, mode: u32, uid: u32, gid: u32) -> BockResult<()> {
    mkdir_as_impl(path, mode, uid, gid, false)
}

/// Create `path` and any missing parents with `mode`, then chown the final
/// directory to `uid`:`gid`.
///
/// # Errors
///
/// Returns an error if creation or the ownership change fails.
pub fn mkdir_all_as(path: &Path, mode: u32, uid: u32, gid: u32) -> BockResult<()> {
    mkdir_as_impl(path, mode, uid, gid, true)
}

fn mkdir_as_impl(path: &Path, mode: u32, uid: u32, gid: u32, recursive: bool) -> BockResult<()> {
    match DirBuilder::new().recursive(recursive).mode(mode).create(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => {}
        Err(e) => return Err(BockError::fs("create directory", path, e)),
    }

    // even if it existed, ownership is changed as requested
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
        .map_err(|e| BockError::fs("change ownership of", path, e))?;

    tracing::trace!(path = %path.display(), uid, gid, mode = %format!("{mode:o}"), "Directory ready");
    Ok(())
}
