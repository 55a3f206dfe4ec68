//! Privilege-separated layer application.
//!
//! Layers come from untrusted registries. Extraction therefore runs in a
//! separate process that chroots into the destination before reading a
//! single entry, so no entry name can resolve outside it.
//!
//! The caller side:
//! 1. Decompresses the stream and normalises the [`TarOptions`]
//! 2. Re-executes the binary as `bock-applyLayer <dest>` with the options in
//!    `OPT` and the layer on stdin
//! 3. Parses the `{"layerSize": n}` response, or reports the captured
//!    output as [`BockError::ApplyLayerFailed`]

pub mod archive;
pub(crate) mod child;
pub mod worker;

pub use archive::{ArchiveCodec, TarCodec, clean_entry_path, decompress_stream};
pub use worker::{ReexecLauncher, WorkerLauncher, WorkerOutput, WorkerRequest};

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use bock_common::{BockError, BockResult};

use crate::idmap::IdMapTable;
use crate::reexec;

/// Environment variable carrying the serialized [`TarOptions`].
pub const OPTIONS_ENV: &str = "OPT";

/// Environment variable pointing at the worker's scratch directory.
pub const SCRATCH_ENV: &str = "TMPDIR";

/// Extraction options shared with the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TarOptions {
    /// Glob patterns of entries to skip.
    #[serde(deserialize_with = "null_as_empty")]
    pub exclude_patterns: Vec<String>,
    /// Leave ownership as the extracting process created it.
    pub no_lchown: bool,
    /// Container to host uid translation for entry owners.
    pub uid_maps: IdMapTable,
    /// Container to host gid translation for entry owners.
    pub gid_maps: IdMapTable,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// The worker's reply on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyLayerResponse {
    /// Bytes unpacked.
    pub layer_size: u64,
}

/// Applies layers through a launched worker.
#[derive(Debug, Clone, Default)]
pub struct LayerApplier<L = ReexecLauncher, C = TarCodec> {
    launcher: L,
    codec: C,
}

impl LayerApplier {
    /// An applier that re-executes the running binary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L: WorkerLauncher, C: ArchiveCodec> LayerApplier<L, C> {
    /// An applier with a custom launcher and codec.
    pub fn with_parts(launcher: L, codec: C) -> Self {
        Self { launcher, codec }
    }

    /// The launcher workers are started with.
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Unpack `layer` into `dest` and return the unpacked size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::ApplyLayerFailed`] if the worker exits non-zero
    /// or replies with something other than an [`ApplyLayerResponse`].
    pub fn apply_layer(
        &self,
        dest: &Path,
        layer: impl Read + Send,
        options: Option<TarOptions>,
    ) -> BockResult<u64> {
        let options = options.unwrap_or_default();
        let stream = self.codec.decompress(Box::new(layer))?;
        let encoded = serde_json::to_string(&options)?;

        tracing::debug!(dest = %dest.display(), "Applying layer");
        let output = self.launcher.run(WorkerRequest {
            command: reexec::APPLY_LAYER,
            args: vec![dest.to_string_lossy().into_owned()],
            env: vec![(OPTIONS_ENV.to_string(), encoded)],
            stdin: stream,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let failed = |status: String| BockError::ApplyLayerFailed {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };

        if !output.status.success() {
            return Err(failed(output.status.to_string()));
        }
        let response: ApplyLayerResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| failed(format!("failed to decode response: {e}")))?;

        tracing::info!(dest = %dest.display(), size = response.layer_size, "Layer applied");
        Ok(response.layer_size)
    }
}

/// Apply `layer` to `dest` by re-executing the running binary.
///
/// # Errors
///
/// See [`LayerApplier::apply_layer`].
pub fn apply_layer(
    dest: &Path,
    layer: impl Read + Send,
    options: Option<TarOptions>,
) -> BockResult<u64> {
    LayerApplier::new().apply_layer(dest, layer, options)
}
