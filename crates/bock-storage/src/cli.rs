//! CLI command definitions and handlers.

use std::fs::File;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};

use bock_common::paths::DEFAULT_ROOT;

use crate::chrootarchive::{TarOptions, apply_layer};
use crate::identity::SystemIdentities;
use crate::layout::ensure_daemon_root;
use crate::remap::{
    ContainerSettings, DaemonConfig, NATIVE_EXEC_DRIVER, setup_remapped_root,
    verify_container_settings,
};

/// Bock storage - layer storage with user namespace remapping
#[derive(Parser, Debug)]
#[command(name = "bock-storage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for bock data
    #[arg(long, global = true, env = "BOCK_ROOT", default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// User/group container root is remapped to (user, uid, user:group or uid:gid)
    #[arg(long, global = true, env = "BOCK_USERNS_REMAP", default_value = "")]
    pub userns_remap: String,

    /// Container execution backend
    #[arg(long, global = true, default_value = NATIVE_EXEC_DRIVER)]
    pub exec_driver: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Storage commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Prepare the daemon root and print the effective storage root
    Init,

    /// Unpack a layer archive into a directory through the chrooted worker
    ApplyLayer {
        /// Layer archive (tar, optionally gzip or zstd compressed)
        archive: PathBuf,

        /// Directory to unpack into
        #[arg(short, long)]
        dest: PathBuf,

        /// Glob of entries to skip (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Do not change ownership of unpacked entries
        #[arg(long)]
        no_lchown: bool,
    },

    /// Check container settings against the daemon configuration
    CheckContainer {
        /// The container runs privileged
        #[arg(long)]
        privileged: bool,
    },
}

impl Cli {
    /// The daemon configuration selected by the global flags.
    #[must_use]
    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig::default()
            .with_root(&self.root)
            .with_remapped_root(&self.userns_remap)
            .with_exec_driver(&self.exec_driver)
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn execute(self) -> Result<()> {
        let config = self.daemon_config();

        match self.command {
            Commands::Init => {
                let remapped = setup_remapped_root(&config, &SystemIdentities::new())
                    .map_err(|e| eyre!("Failed to configure root remapping: {}", e))?;
                let home = ensure_daemon_root(&config.root, remapped.spec.as_ref())
                    .map_err(|e| eyre!("Failed to prepare daemon root: {}", e))?;

                println!("{}", home.display());
                Ok(())
            }

            Commands::ApplyLayer {
                archive,
                dest,
                exclude,
                no_lchown,
            } => {
                let remapped = setup_remapped_root(&config, &SystemIdentities::new())
                    .map_err(|e| eyre!("Failed to configure root remapping: {}", e))?;
                let options = TarOptions {
                    exclude_patterns: exclude,
                    no_lchown,
                    uid_maps: remapped.mappings.uids,
                    gid_maps: remapped.mappings.gids,
                };

                let layer = File::open(&archive)
                    .map_err(|e| eyre!("Failed to open {}: {}", archive.display(), e))?;
                let size = apply_layer(&dest, layer, Some(options))
                    .map_err(|e| eyre!("Failed to apply layer: {}", e))?;

                println!("{size}");
                Ok(())
            }

            Commands::CheckContainer { privileged } => {
                verify_container_settings(
                    &ContainerSettings { privileged },
                    config.remap_configured(),
                )
                .map_err(|e| eyre!("{}", e))?;

                println!("ok");
                Ok(())
            }
        }
    }
}
