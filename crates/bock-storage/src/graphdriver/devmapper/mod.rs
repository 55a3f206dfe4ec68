//! Device-mapper graph driver.
//!
//! Every layer is a thin device owned by a [`DeviceSet`]. The driver only
//! owns the mountpoints under `home/mnt/<id>` and their ownership, which
//! follows the remapped root so containers can traverse their own rootfs.

mod deviceset;

pub use deviceset::{DeviceSet, DeviceSetStatus, DiskUsage};

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use bock_common::{BockError, BockResult, StoragePaths, human_size};

use super::{GraphDriver, Status, backing_fs_name};
use crate::idmap::IdMappings;
use crate::idtools::{mkdir_all_as, mkdir_as};
use crate::mount;

/// Name the driver registers under.
pub const DRIVER_NAME: &str = "devicemapper";

/// Device-mapper backed [`GraphDriver`].
pub struct Driver<D> {
    device_set: D,
    paths: StoragePaths,
    mappings: IdMappings,
    backing_fs: String,
}

impl<D: DeviceSet> Driver<D> {
    /// Create a driver over `device_set` rooted at `home`, recording the
    /// filesystem `home` lives on.
    ///
    /// # Errors
    ///
    /// Returns an error if `home` cannot be inspected.
    pub fn new(home: impl Into<PathBuf>, device_set: D, mappings: IdMappings) -> BockResult<Self> {
        let home = home.into();
        let backing_fs = backing_fs_name(&home)?.to_string();
        tracing::debug!(home = %home.display(), backing_fs = %backing_fs, "Device-mapper driver created");

        Ok(Self {
            device_set,
            paths: StoragePaths::new(home),
            mappings,
            backing_fs,
        })
    }

    /// Create the driver and make `home` a private mount so device mounts
    /// beneath it do not propagate to other namespaces.
    ///
    /// # Errors
    ///
    /// Returns an error if `home` cannot be inspected or remounted.
    pub fn init(home: impl Into<PathBuf>, device_set: D, mappings: IdMappings) -> BockResult<Self> {
        let driver = Self::new(home, device_set, mappings)?;
        mount::make_private(driver.home())?;
        Ok(driver)
    }

    /// The effective storage root.
    #[must_use]
    pub fn home(&self) -> &Path {
        self.paths.home()
    }

    /// Name of the filesystem holding `home`.
    #[must_use]
    pub fn backing_fs(&self) -> &str {
        &self.backing_fs
    }

    /// The underlying device set.
    pub fn device_set(&self) -> &D {
        &self.device_set
    }

    /// Unmount after a failed [`GraphDriver::get`] step and return the
    /// original error.
    fn abort_get(&self, id: &str, err: BockError) -> BockError {
        if let Err(unmount_err) = self.device_set.unmount_device(id) {
            tracing::warn!(id, error = %unmount_err, "Unmount after failed get also failed");
        }
        err
    }

    fn write_id_file(path: &Path, id: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(id.as_bytes())
    }
}

impl<D: DeviceSet> GraphDriver for Driver<D> {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn create(&self, id: &str, parent: Option<&str>) -> BockResult<()> {
        tracing::debug!(id, parent, "Creating device");
        self.device_set.add_device(id, parent)
    }

    fn remove(&self, id: &str) -> BockResult<()> {
        if !self.device_set.has_device(id) {
            // the device may have gone away after an earlier failure; let
            // container removal make progress
            tracing::debug!(id, "Device already absent");
            return Ok(());
        }

        // assumes the device was put and is no longer mounted
        self.device_set.delete_device(id)?;

        let mountpoint = self.paths.mountpoint(id);
        match fs::remove_dir_all(&mountpoint) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BockError::fs("remove mountpoint", mountpoint, e)),
        }

        tracing::debug!(id, "Device removed");
        Ok(())
    }

    fn get(&self, id: &str, mount_label: &str) -> BockResult<PathBuf> {
        let (uid, gid) = self.mappings.root_pair()?;
        let mountpoint = self.paths.mountpoint(id);

        mkdir_all_as(&self.paths.mnt(), 0o755, uid, gid)?;
        mkdir_as(&mountpoint, 0o755, uid, gid)?;

        self.device_set.mount_device(id, &mountpoint, mount_label)?;

        let rootfs = self.paths.rootfs(id);
        if let Err(e) = mkdir_all_as(&rootfs, 0o755, uid, gid) {
            return Err(self.abort_get(id, e));
        }

        // the id marker helps reconstruct state after a crash
        let id_file = self.paths.id_file(id);
        match fs::symlink_metadata(&id_file) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Err(e) = Self::write_id_file(&id_file, id) {
                    return Err(self.abort_get(id, BockError::fs("write", id_file, e)));
                }
            }
            Err(e) => return Err(self.abort_get(id, BockError::fs("inspect", id_file, e))),
        }

        tracing::debug!(id, rootfs = %rootfs.display(), uid, gid, "Device mounted");
        Ok(rootfs)
    }

    fn put(&self, id: &str) -> BockResult<()> {
        let result = self.device_set.unmount_device(id);
        if let Err(e) = &result {
            tracing::error!(id, error = %e, "Error unmounting device");
        }
        result
    }

    fn exists(&self, id: &str) -> bool {
        self.device_set.has_device(id)
    }

    fn status(&self) -> Status {
        let s = self.device_set.status();

        let mut status = vec![
            ("Pool Name", s.pool_name),
            ("Pool Blocksize", human_size(s.sector_size)),
            ("Backing Filesystem", self.backing_fs.clone()),
            ("Data file", s.data_file),
            ("Metadata file", s.metadata_file),
            ("Data Space Used", human_size(s.data.used)),
            ("Data Space Total", human_size(s.data.total)),
            ("Data Space Available", human_size(s.data.available)),
            ("Metadata Space Used", human_size(s.metadata.used)),
            ("Metadata Space Total", human_size(s.metadata.total)),
            ("Metadata Space Available", human_size(s.metadata.available)),
            ("Udev Sync Supported", s.udev_sync_supported.to_string()),
        ];
        let optional = [
            ("Data loop file", s.data_loopback),
            ("Metadata loop file", s.metadata_loopback),
            ("Library Version", s.library_version),
        ];
        status.extend(
            optional
                .into_iter()
                .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key, v))),
        );

        status
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    fn cleanup(&self) -> BockResult<()> {
        let shutdown = self.device_set.shutdown();
        if let Err(e) = &shutdown {
            tracing::error!(error = %e, "Device set shutdown failed");
        }
        let unmount = mount::unmount(self.home());
        shutdown.and(unmount)
    }
}
