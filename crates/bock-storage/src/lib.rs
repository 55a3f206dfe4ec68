//! # bock-storage
//!
//! Layer storage for the Bock daemon with user namespace root remapping.
//!
//! ## Features
//!
//! - **ID maps**: container/host uid and gid translation tables
//! - **Root layout**: namespace-qualified daemon root (`<root>/0.0` or `<root>/<uid>.<gid>`)
//! - **Layer extraction**: archives unpacked by a chrooted worker process
//! - **Device-mapper driver**: per-layer mountpoints over a thin-provisioned device set
//!
//! ## Usage
//!
//! ```no_run
//! use bock_storage::identity::SystemIdentities;
//! use bock_storage::layout::ensure_daemon_root;
//! use bock_storage::remap::{DaemonConfig, setup_remapped_root};
//!
//! # fn example() -> bock_common::BockResult<()> {
//! let config = DaemonConfig::default().with_remapped_root("dockremap");
//! let remapped = setup_remapped_root(&config, &SystemIdentities::new())?;
//! let home = ensure_daemon_root(&config.root, remapped.spec.as_ref())?;
//! println!("storage lives in {}", home.display());
//! # Ok(())
//! # }
//! ```
//!
//! Binaries embedding the layer applier must call [`reexec::init`] at the
//! top of `main`.

#![warn(missing_docs)]

pub mod chrootarchive;
pub mod cli;
pub mod graphdriver;
pub mod identity;
pub mod idmap;
pub mod idtools;
pub mod layout;
pub mod mount;
pub mod reexec;
pub mod remap;

pub use chrootarchive::{LayerApplier, TarOptions, apply_layer};
pub use graphdriver::GraphDriver;
pub use graphdriver::devmapper::{DeviceSet, Driver};
pub use idmap::{IdMap, IdMapTable, IdMappings};
pub use remap::{ContainerSettings, DaemonConfig, RemapSpec};
