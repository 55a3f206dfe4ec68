//! Daemon root layout.
//!
//! The daemon root holds one subdirectory per root identity ever used:
//! `0.0` when root is not remapped and `<uid>.<gid>` otherwise. A root
//! created before namespacing existed is migrated into `0.0` the first
//! time; from then on the presence of `0.0` marks the migration as done.
//!
//! Migration is a sequence of renames with no rollback. If it is
//! interrupted, the root is left with some entries moved and some not.

use std::fs::{self, DirBuilder, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use bock_common::paths::{UNMAPPED_NAMESPACE, namespace_dir_name};
use bock_common::{BockError, BockResult};

use crate::idtools::mkdir_all_as;
use crate::remap::RemapSpec;

/// Prepare `root_dir` and return the namespace-qualified root for `remap`.
///
/// Must run once at startup, before any driver operation, and never
/// concurrently with itself.
///
/// # Errors
///
/// Returns an error on any filesystem failure; the daemon cannot start.
pub fn ensure_daemon_root(root_dir: &Path, remap: Option<&RemapSpec>) -> BockResult<PathBuf> {
    let unmapped = root_dir.join(UNMAPPED_NAMESPACE);

    match fs::metadata(root_dir) {
        Ok(_) => {
            if !exists(&unmapped)? {
                migrate_root(root_dir)?;
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(root = %root_dir.display(), "Creating daemon root");
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(root_dir)
                .map_err(|e| BockError::fs("create daemon root", root_dir, e))?;
            // marks the root as namespaced so it is never migrated
            create_private_dir(&unmapped)?;
        }
        Err(e) => return Err(BockError::fs("inspect daemon root", root_dir, e)),
    }

    let (uid, gid, name) = match remap {
        Some(spec) => (spec.uid, spec.gid, namespace_dir_name(spec.uid, spec.gid)),
        None => (0, 0, UNMAPPED_NAMESPACE.to_string()),
    };
    let root = root_dir.join(name);
    tracing::debug!(root = %root.display(), uid, gid, "Creating actual daemon root");

    mkdir_all_as(&root, 0o700, uid, gid)?;
    Ok(root)
}

/// Move a flat root into its `0.0` subdirectory and open up the outer
/// directory so remapped roots can traverse it.
fn migrate_root(root_dir: &Path) -> BockResult<()> {
    tracing::info!(root = %root_dir.display(), "Migrating daemon root for user namespaces");

    create_private_dir(&root_dir.join(UNMAPPED_NAMESPACE))?;
    move_dir_to_subdir(root_dir, UNMAPPED_NAMESPACE)?;
    fs::set_permissions(root_dir, Permissions::from_mode(0o755))
        .map_err(|e| BockError::fs("change mode of", root_dir, e))?;
    Ok(())
}

/// Move every entry of `dir` except `subdir` itself into `dir/subdir`.
///
/// # Errors
///
/// Returns the first rename failure; entries already moved stay moved.
pub fn move_dir_to_subdir(dir: &Path, subdir: &str) -> BockResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| BockError::fs("read directory", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BockError::fs("read directory", dir, e))?;
        let name = entry.file_name();
        if name == subdir {
            continue;
        }
        let to = dir.join(subdir).join(&name);
        fs::rename(entry.path(), &to).map_err(|e| BockError::fs("move", entry.path(), e))?;
        tracing::trace!(from = %entry.path().display(), to = %to.display(), "Moved");
    }
    Ok(())
}

fn create_private_dir(path: &Path) -> BockResult<()> {
    DirBuilder::new()
        .mode(0o700)
        .create(path)
        .map_err(|e| BockError::fs("create daemon root", path, e))
}

fn exists(path: &Path) -> BockResult<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BockError::fs("inspect", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_spec() -> Option<RemapSpec> {
        let uid = rustix::process::geteuid().as_raw();
        let gid = rustix::process::getegid().as_raw();
        (uid != 0).then_some(RemapSpec { uid, gid })
    }

    #[test]
    fn move_skips_target_subdir() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("a"), "a").unwrap();
        fs::create_dir(temp.path().join("b")).unwrap();

        move_dir_to_subdir(temp.path(), "sub").unwrap();

        assert!(temp.path().join("sub/a").is_file());
        assert!(temp.path().join("sub/b").is_dir());
        assert!(!temp.path().join("a").exists());
    }

    #[test]
    fn fresh_root_gets_unmapped_marker() {
        let temp = tempfile::tempdir().unwrap();
        let root_dir = temp.path().join("bock");
        let spec = current_spec();

        let root = ensure_daemon_root(&root_dir, spec.as_ref()).unwrap();

        assert!(root_dir.join("0.0").is_dir());
        assert!(root.is_dir());
        let mode = fs::metadata(&root_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn flat_root_is_migrated_once() {
        let temp = tempfile::tempdir().unwrap();
        let root_dir = temp.path().join("bock");
        fs::create_dir(&root_dir).unwrap();
        fs::write(root_dir.join("a"), "a").unwrap();
        fs::write(root_dir.join("b"), "b").unwrap();
        let spec = current_spec();

        ensure_daemon_root(&root_dir, spec.as_ref()).unwrap();
        assert_eq!(fs::read_to_string(root_dir.join("0.0/a")).unwrap(), "a");
        assert_eq!(fs::read_to_string(root_dir.join("0.0/b")).unwrap(), "b");
        assert!(!root_dir.join("a").exists());

        // anything created at the top level after migration stays put
        fs::write(root_dir.join("c"), "c").unwrap();
        ensure_daemon_root(&root_dir, spec.as_ref()).unwrap();
        assert!(root_dir.join("c").is_file());
        assert!(!root_dir.join("0.0/c").exists());
    }

    #[test]
    fn remapped_root_uses_pair_name() {
        let Some(spec) = current_spec() else {
            return;
        };
        let temp = tempfile::tempdir().unwrap();
        let root = ensure_daemon_root(temp.path(), Some(&spec)).unwrap();
        assert_eq!(root, temp.path().join(format!("{}.{}", spec.uid, spec.gid)));
    }

    #[test]
    fn unmapped_root_is_owned_by_host_root() {
        if rustix::process::geteuid().as_raw() != 0 {
            return;
        }
        let temp = tempfile::tempdir().unwrap();
        let root = ensure_daemon_root(&temp.path().join("bock"), None).unwrap();
        assert_eq!(root, temp.path().join("bock/0.0"));
    }
}
