//! Backing filesystem detection.

use std::path::Path;

use bock_common::{BockError, BockResult};

/// Name reported when the magic number is not recognised.
pub const UNKNOWN_FS: &str = "<unknown>";

const FS_NAMES: &[(u64, &str)] = &[
    (0x6161_7566, "aufs"),
    (0x9123_683E, "btrfs"),
    (0x0000_EF51, "ext2"),
    (0x0000_EF53, "extfs"),
    (0xF15F, "ecryptfs"),
    (0x6573_5546, "fuse"),
    (0x0000_6969, "nfs"),
    (0x794C_7630, "overlayfs"),
    (0x8584_58F6, "ramfs"),
    (0x5265_4973, "reiserfs"),
    (0x517B, "smb"),
    (0x7371_7368, "squashfs"),
    (0x0102_1994, "tmpfs"),
    (0x5846_5342, "xfs"),
    (0x2FC1_2FC1, "zfs"),
];

/// Filesystem type magic number of the filesystem holding `path`.
///
/// # Errors
///
/// Returns an error if `statfs` fails.
#[allow(clippy::cast_sign_loss, clippy::unnecessary_cast)]
pub fn fs_magic(path: &Path) -> BockResult<u64> {
    let stat = rustix::fs::statfs(path).map_err(|e| BockError::fs("statfs", path, e.into()))?;
    Ok(stat.f_type as u64)
}

/// Human-readable name for a filesystem magic number.
#[must_use]
pub fn fs_name(magic: u64) -> &'static str {
    FS_NAMES
        .iter()
        .find(|(m, _)| *m == magic)
        .map_or(UNKNOWN_FS, |(_, name)| name)
}

/// Name of the filesystem holding `path`.
///
/// # Errors
///
/// Returns an error if `statfs` fails.
pub fn backing_fs_name(path: &Path) -> BockResult<&'static str> {
    fs_magic(path).map(fs_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_magic_numbers() {
        assert_eq!(fs_name(0xEF53), "extfs");
        assert_eq!(fs_name(0x5846_5342), "xfs");
        assert_eq!(fs_name(0xDEAD_BEEF), UNKNOWN_FS);
    }

    #[test]
    fn statfs_on_temp_dir() {
        let temp = tempfile::tempdir().unwrap();
        assert!(!backing_fs_name(temp.path()).unwrap().is_empty());
    }
}
