//! Re-exec dispatch.
//!
//! Helpers run as fresh instances of the current binary, told apart by
//! `argv[0]`. [`init`] must be called first thing in `main`, before any
//! threads are started or a tracing subscriber claims stdout.

use std::path::Path;

use crate::chrootarchive::child::apply_layer_main;

/// `argv[0]` of the layer extraction worker.
pub const APPLY_LAYER: &str = "bock-applyLayer";

type Initializer = fn() -> !;

const INITIALIZERS: &[(&str, Initializer)] = &[(APPLY_LAYER, apply_layer_main)];

fn lookup(arg0: &str) -> Option<Initializer> {
    let name = Path::new(arg0).file_name()?.to_str()?;
    INITIALIZERS
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, init)| *init)
}

/// Run the helper named by `argv[0]` if there is one. Returns normally when
/// this process is not a helper.
pub fn init() {
    let Some(arg0) = std::env::args_os().next() else {
        return;
    };
    if let Some(initializer) = arg0.to_str().and_then(lookup) {
        initializer();
    }
}
