//! Root remapping configuration.
//!
//! The daemon accepts a single option naming the host identity container
//! root is remapped to. Accepted forms:
//! - `user` (the gid is looked up using the same name as a group)
//! - `uid` (the gid defaults to the uid)
//! - `user:group`, `uid:gid` and mixtures of the two

use std::path::PathBuf;

use bock_common::paths::DEFAULT_ROOT;
use bock_common::{BockError, BockResult};

use crate::identity::{Identity, IdentityLookup};
use crate::idmap::IdMappings;

/// The only execution backend that honours user namespaces.
pub const NATIVE_EXEC_DRIVER: &str = "native";

/// The resolved host identity for container root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapSpec {
    /// Host uid for container uid 0.
    pub uid: u32,
    /// Host gid for container gid 0.
    pub gid: u32,
}

impl RemapSpec {
    /// Parse and resolve a remap specification. An empty string means no
    /// remapping.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::InvalidRemapSpec`] for more than two
    /// `:`-separated parts and [`BockError::IdentityLookup`] when a name
    /// cannot be resolved.
    pub fn parse(spec: &str, lookup: &dyn IdentityLookup) -> BockResult<Option<Self>> {
        if spec.is_empty() {
            return Ok(None);
        }

        let parts: Vec<&str> = spec.split(':').collect();
        let (user, group) = match parts.as_slice() {
            [user] => (Identity::parse(user), None),
            [user, group] => (Identity::parse(user), Some(Identity::parse(group))),
            _ => {
                return Err(BockError::InvalidRemapSpec {
                    spec: spec.to_string(),
                });
            }
        };

        let uid = user.resolve_user(lookup)?;
        let gid = match (&group, &user) {
            (Some(group), _) => group.resolve_group(lookup)?,
            // a bare uid is also the gid
            (None, Identity::Numeric(uid)) => *uid,
            // a bare username is also looked up as a group name
            (None, Identity::Named(name)) => lookup.lookup_group(name)?,
        };

        Ok(Some(Self { uid, gid }))
    }

    /// ID mappings that remap container root to this identity.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::InvalidIdRange`] if either id is 0.
    pub fn mappings(&self) -> BockResult<IdMappings> {
        IdMappings::for_root(self.uid, self.gid)
    }
}

/// Daemon-wide settings relevant to the storage layer.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory for daemon data (before namespacing).
    pub root: PathBuf,
    /// User/group for container root; empty disables remapping.
    pub remapped_root: String,
    /// Name of the container execution backend.
    pub exec_driver: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            remapped_root: String::new(),
            exec_driver: NATIVE_EXEC_DRIVER.to_string(),
        }
    }
}

impl DaemonConfig {
    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the remapped root specification.
    #[must_use]
    pub fn with_remapped_root(mut self, spec: impl Into<String>) -> Self {
        self.remapped_root = spec.into();
        self
    }

    /// Set the execution backend.
    #[must_use]
    pub fn with_exec_driver(mut self, driver: impl Into<String>) -> Self {
        self.exec_driver = driver.into();
        self
    }

    /// Returns true if a root remap is configured.
    #[must_use]
    pub fn remap_configured(&self) -> bool {
        !self.remapped_root.is_empty()
    }
}

/// Per-container settings checked against the daemon configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerSettings {
    /// Container requests privileged mode.
    pub privileged: bool,
}

/// The outcome of daemon startup remap resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemappedRoot {
    /// The resolved identity, if remapping is configured.
    pub spec: Option<RemapSpec>,
    /// The ID mappings in effect (identity when not remapped).
    pub mappings: IdMappings,
}

/// Validate the daemon settings, resolve the remap option and build the
/// ID mappings.
///
/// # Errors
///
/// Fails if remapping is requested with a non-native execution backend or
/// on a host without user namespaces, if the option cannot be resolved, or
/// if the resolved identity is outside the remappable range.
pub fn setup_remapped_root(
    config: &DaemonConfig,
    lookup: &dyn IdentityLookup,
) -> BockResult<RemappedRoot> {
    verify_daemon_settings(config, user_namespaces_supported())?;

    let Some(spec) = RemapSpec::parse(&config.remapped_root, lookup)? else {
        return Ok(RemappedRoot::default());
    };
    tracing::info!(
        uid = spec.uid,
        gid = spec.gid,
        "User namespaces: root will be remapped"
    );

    let mappings = spec.mappings().map_err(|e| BockError::Config {
        message: format!("Can't create ID mappings for remapped root: {e}"),
    })?;

    Ok(RemappedRoot {
        spec: Some(spec),
        mappings,
    })
}

/// Reject remapping on backends or hosts that cannot honour it.
///
/// # Errors
///
/// Returns [`BockError::Config`] or [`BockError::Unsupported`].
pub fn verify_daemon_settings(config: &DaemonConfig, userns_supported: bool) -> BockResult<()> {
    if !config.remap_configured() {
        return Ok(());
    }
    if config.exec_driver != NATIVE_EXEC_DRIVER {
        return Err(BockError::Config {
            message: format!(
                "User namespace root remapping is only supported with the {NATIVE_EXEC_DRIVER} execdriver"
            ),
        });
    }
    if !userns_supported {
        return Err(BockError::Unsupported {
            feature: "user namespaces".to_string(),
        });
    }
    Ok(())
}

/// Reject container settings that conflict with daemon-wide remapping.
///
/// # Errors
///
/// Returns [`BockError::IncompatibleSettings`] for a privileged container
/// while root remapping is active.
pub fn verify_container_settings(
    settings: &ContainerSettings,
    remap_configured: bool,
) -> BockResult<()> {
    if settings.privileged && remap_configured {
        return Err(BockError::IncompatibleSettings {
            message: "Privileged mode is incompatible with user namespaces/root remapping"
                .to_string(),
        });
    }
    Ok(())
}

/// Check if user namespaces are available on this host.
#[must_use]
pub fn user_namespaces_supported() -> bool {
    cfg!(target_os = "linux") && std::path::Path::new("/proc/self/ns/user").exists()
}
