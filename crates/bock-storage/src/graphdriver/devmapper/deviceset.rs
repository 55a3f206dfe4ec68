//! The thin-provisioning device set consumed by the driver.

use std::path::Path;

use bock_common::BockResult;

/// Space accounting for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Bytes in use.
    pub used: u64,
    /// Total bytes.
    pub total: u64,
    /// Bytes still available.
    pub available: u64,
}

/// Pool status as reported by the device set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSetStatus {
    /// Name of the thin pool.
    pub pool_name: String,
    /// Pool block size in bytes.
    pub sector_size: u64,
    /// Data file backing the pool.
    pub data_file: String,
    /// Metadata file backing the pool.
    pub metadata_file: String,
    /// Data pool usage.
    pub data: DiskUsage,
    /// Metadata pool usage.
    pub metadata: DiskUsage,
    /// Whether udev synchronisation is available.
    pub udev_sync_supported: bool,
    /// Loopback file for data, if loopback backed.
    pub data_loopback: Option<String>,
    /// Loopback file for metadata, if loopback backed.
    pub metadata_loopback: Option<String>,
    /// Device-mapper library version, if it could be determined.
    pub library_version: Option<String>,
}

/// Thin-provisioned block devices keyed by layer or container id.
///
/// Implementations own copy-on-write inheritance and their own per-device
/// locking; calls for distinct ids may arrive concurrently.
pub trait DeviceSet: Send + Sync {
    /// Create device `id` as a snapshot of `parent`, or empty when `parent`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be created.
    fn add_device(&self, id: &str, parent: Option<&str>) -> BockResult<()>;

    /// Delete device `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be deleted.
    fn delete_device(&self, id: &str) -> BockResult<()>;

    /// Whether device `id` exists.
    fn has_device(&self, id: &str) -> bool;

    /// Activate and mount device `id` at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if activation or mounting fails.
    fn mount_device(&self, id: &str, path: &Path, mount_label: &str) -> BockResult<()>;

    /// Unmount device `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails; the mount state is then unknown.
    fn unmount_device(&self, id: &str) -> BockResult<()>;

    /// Current pool status.
    fn status(&self) -> DeviceSetStatus;

    /// Release the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if devices could not be deactivated.
    fn shutdown(&self) -> BockResult<()>;
}
