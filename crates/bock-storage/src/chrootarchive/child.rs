//! The `bock-applyLayer` worker entrypoint.
//!
//! Runs entirely on the main thread: nothing here spawns threads, so the
//! chroot and the extraction that follows happen on the same OS thread.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use rustix::fs::Mode;

use bock_common::{BockError, BockResult};

use super::archive::TarCodec;
use super::worker::drain;
use super::{ApplyLayerResponse, OPTIONS_ENV, SCRATCH_ENV, TarOptions};

#[derive(Parser, Debug)]
#[command(name = "bock-applyLayer")]
struct ApplyLayerArgs {
    /// Directory to chroot into and unpack under.
    destination: PathBuf,
}

/// Entry point of the re-executed worker.
pub(crate) fn apply_layer_main() -> ! {
    #[cfg(target_os = "linux")]
    if let Err(e) = rustix::process::set_parent_process_death_signal(Some(
        rustix::process::Signal::TERM,
    )) {
        eprintln!("bock-applyLayer: failed to set parent death signal: {e}");
    }

    let args = match ApplyLayerArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    match run(&args.destination) {
        Ok(response) => {
            let mut stdout = io::stdout().lock();
            let written = serde_json::to_writer(&mut stdout, &response)
                .map_err(io::Error::from)
                .and_then(|()| stdout.flush());
            if let Err(e) = written {
                eprintln!("bock-applyLayer: writing response: {e}");
                std::process::exit(1);
            }
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn run(destination: &Path) -> BockResult<ApplyLayerResponse> {
    let raw = std::env::var(OPTIONS_ENV).map_err(|e| BockError::Config {
        message: format!("{OPTIONS_ENV} is not set: {e}"),
    })?;
    let options: TarOptions = serde_json::from_str(&raw)?;

    std::os::unix::fs::chroot(destination).map_err(|e| BockError::fs("chroot", destination, e))?;
    std::env::set_current_dir("/").map_err(|e| BockError::fs("chdir", "/", e))?;

    // archived modes are reproduced exactly
    let _ = rustix::process::umask(Mode::empty());

    let scratch = tempfile::Builder::new()
        .prefix("temp-bock-extract")
        .tempdir_in("/")
        .map_err(|e| BockError::fs("create scratch directory in", "/", e))?;
    #[allow(unsafe_code)]
    // SAFETY: the worker is single-threaded, nothing reads the environment
    // concurrently.
    unsafe {
        std::env::set_var(SCRATCH_ENV, scratch.path());
    }

    let mut stdin = io::stdin().lock();
    let keep = [scratch.path().to_path_buf()];
    let result = TarCodec.unpack_layer_keeping(Path::new("/"), &mut stdin, &options, &keep);
    // the parent keeps writing until it sees a closed pipe or EOF
    let _ = drain(&mut stdin);
    let closed = scratch.close();

    let layer_size = result?;
    match closed {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(BockError::fs("remove scratch directory", &keep[0], e)),
    }
    Ok(ApplyLayerResponse { layer_size })
}
