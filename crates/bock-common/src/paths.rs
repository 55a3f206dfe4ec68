//! Standard filesystem paths for Bock storage.

use std::path::{Path, PathBuf};

/// Default daemon root directory.
pub const DEFAULT_ROOT: &str = "/var/lib/bock";

/// Namespace subdirectory used when root is not remapped.
pub const UNMAPPED_NAMESPACE: &str = "0.0";

/// Name of the namespace subdirectory for a remapped root pair.
#[must_use]
pub fn namespace_dir_name(uid: u32, gid: u32) -> String {
    format!("{uid}.{gid}")
}

/// Paths under an effective (namespace-qualified) storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// Effective storage root, e.g. `/var/lib/bock/0.0`.
    pub home: PathBuf,
}

impl StoragePaths {
    /// Create paths rooted at `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// The effective root.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Directory holding all device mountpoints.
    #[must_use]
    pub fn mnt(&self) -> PathBuf {
        self.home.join("mnt")
    }

    /// Mountpoint for a device.
    #[must_use]
    pub fn mountpoint(&self, id: &str) -> PathBuf {
        self.mnt().join(id)
    }

    /// Container filesystem view inside a mounted device.
    #[must_use]
    pub fn rootfs(&self, id: &str) -> PathBuf {
        self.mountpoint(id).join("rootfs")
    }

    /// Recovery marker holding the device id.
    #[must_use]
    pub fn id_file(&self, id: &str) -> PathBuf {
        self.mountpoint(id).join("id")
    }
}
