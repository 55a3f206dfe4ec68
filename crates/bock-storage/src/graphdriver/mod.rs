//! Graph drivers: per-layer filesystem storage for containers and images.
//!
//! This module handles:
//! - The driver capability contract
//! - Backing filesystem detection
//! - The device-mapper driver

pub mod devmapper;
mod fsmagic;

pub use fsmagic::{UNKNOWN_FS, backing_fs_name, fs_name};

use std::path::PathBuf;

use bock_common::BockResult;

/// Display-ordered status key/value pairs.
pub type Status = Vec<(String, String)>;

/// Storage driver operations used by the daemon.
///
/// Calls for distinct ids may run concurrently. Calls for the same id must
/// be serialised by the caller.
pub trait GraphDriver: Send + Sync {
    /// Driver name.
    fn name(&self) -> &'static str;

    /// Create layer `id` on top of `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be created.
    fn create(&self, id: &str, parent: Option<&str>) -> BockResult<()>;

    /// Remove layer `id`; removing an absent layer succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer exists but cannot be removed.
    fn remove(&self, id: &str) -> BockResult<()>;

    /// Mount layer `id` and return the path of its filesystem view.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be mounted.
    fn get(&self, id: &str, mount_label: &str) -> BockResult<PathBuf>;

    /// Release a mount obtained with [`GraphDriver::get`].
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails; the mount state is then unknown.
    fn put(&self, id: &str) -> BockResult<()>;

    /// Whether layer `id` exists.
    fn exists(&self, id: &str) -> bool;

    /// Driver-specific status for display.
    fn status(&self) -> Status;

    /// Release driver resources at daemon shutdown.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered.
    fn cleanup(&self) -> BockResult<()>;
}
