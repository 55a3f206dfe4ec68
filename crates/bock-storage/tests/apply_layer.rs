//! Integration tests for privilege-separated layer application.
use std::error::Error;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use bock_common::{BockError, BockResult};
use bock_storage::chrootarchive::{
    LayerApplier, OPTIONS_ENV, ReexecLauncher, TarCodec, TarOptions, WorkerLauncher,
    WorkerOutput, WorkerRequest,
};
use bock_storage::reexec;
use parking_lot::Mutex;
use tempfile::TempDir;

/// What the fake worker saw.
#[derive(Debug, Default, Clone)]
struct Seen {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Vec<u8>,
}

/// Launcher that answers with canned output instead of spawning.
struct FakeLauncher {
    status: i32,
    stdout: &'static str,
    stderr: &'static str,
    seen: Mutex<Seen>,
}

impl FakeLauncher {
    fn replying(status: i32, stdout: &'static str, stderr: &'static str) -> Self {
        Self {
            status,
            stdout,
            stderr,
            seen: Mutex::new(Seen::default()),
        }
    }
}

impl WorkerLauncher for FakeLauncher {
    fn run(&self, mut request: WorkerRequest<'_>) -> BockResult<WorkerOutput> {
        let mut stdin = Vec::new();
        request.stdin.read_to_end(&mut stdin)?;
        *self.seen.lock() = Seen {
            command: request.command.to_string(),
            args: request.args,
            env: request.env,
            stdin,
        };
        Ok(WorkerOutput {
            // wait(2) encoding: exit code in the second byte
            status: ExitStatus::from_raw(self.status << 8),
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: self.stderr.as_bytes().to_vec(),
        })
    }
}

fn set_raw_name(header: &mut tar::Header, name: &str) {
    let field = &mut header.as_old_mut().name;
    field.fill(0);
    field[..name.len()].copy_from_slice(name.as_bytes());
    header.set_cksum();
}

/// A layer with `etc/hostname` = "X" and an entry trying to escape the root.
fn hostile_layer() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in [("etc/hostname", &b"X"[..]), ("../escape", &b"escaped"[..])] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        set_raw_name(&mut header, name);
        builder.append(&header, data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn worker_receives_decompressed_layer_and_options() -> Result<(), Box<dyn Error>> {
    let layer = hostile_layer();
    let applier = LayerApplier::with_parts(
        FakeLauncher::replying(0, r#"{"layerSize":8}"#, ""),
        TarCodec,
    );
    let options = TarOptions {
        exclude_patterns: vec!["proc".to_string()],
        ..TarOptions::default()
    };

    let size = applier.apply_layer("/srv/rootfs".as_ref(), &gzip(&layer)[..], Some(options))?;
    assert_eq!(size, 8);

    let seen = applier_seen(&applier);
    assert_eq!(seen.command, reexec::APPLY_LAYER);
    assert_eq!(seen.args, ["/srv/rootfs"]);
    assert_eq!(seen.stdin, layer);
    let (key, value) = &seen.env[0];
    assert_eq!(key, OPTIONS_ENV);
    let sent: TarOptions = serde_json::from_str(value)?;
    assert_eq!(sent.exclude_patterns, ["proc"]);
    Ok(())
}

#[test]
fn missing_options_are_sent_as_defaults() -> Result<(), Box<dyn Error>> {
    let applier = LayerApplier::with_parts(
        FakeLauncher::replying(0, r#"{"layerSize":0}"#, ""),
        TarCodec,
    );
    applier.apply_layer("/srv/rootfs".as_ref(), &b""[..], None)?;

    let seen = applier_seen(&applier);
    let sent: serde_json::Value = serde_json::from_str(&seen.env[0].1)?;
    assert_eq!(sent["excludePatterns"], serde_json::json!([]));
    Ok(())
}

#[test]
fn non_zero_exit_carries_stderr() {
    let applier = LayerApplier::with_parts(
        FakeLauncher::replying(1, "", "Failed to chroot /srv/rootfs: Operation not permitted"),
        TarCodec,
    );
    let err = applier
        .apply_layer("/srv/rootfs".as_ref(), &hostile_layer()[..], None)
        .unwrap_err();

    match err {
        BockError::ApplyLayerFailed { stderr, .. } => {
            assert!(stderr.contains("Operation not permitted"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_response_fails() {
    let applier = LayerApplier::with_parts(
        FakeLauncher::replying(0, "layer applied", "some warning"),
        TarCodec,
    );
    let err = applier
        .apply_layer("/srv/rootfs".as_ref(), &hostile_layer()[..], None)
        .unwrap_err();

    assert!(matches!(err, BockError::ApplyLayerFailed { .. }));
    let message = err.to_string();
    assert!(message.contains("layer applied"));
    assert!(message.contains("some warning"));
}

fn applier_seen(applier: &LayerApplier<FakeLauncher, TarCodec>) -> Seen {
    applier.launcher().seen.lock().clone()
}

fn reexec_applier() -> LayerApplier<ReexecLauncher, TarCodec> {
    LayerApplier::with_parts(
        ReexecLauncher::with_executable(env!("CARGO_BIN_EXE_bock-storage")),
        TarCodec,
    )
}

#[test_log::test]
fn layer_stays_inside_destination() -> Result<(), Box<dyn Error>> {
    if !rustix::process::geteuid().is_root() {
        return Ok(());
    }
    let temp = TempDir::new()?;
    let dest = temp.path().join("dest");
    fs::create_dir(&dest)?;

    let size = reexec_applier().apply_layer(&dest, &gzip(&hostile_layer())[..], None)?;

    assert_eq!(fs::read_to_string(dest.join("etc/hostname"))?, "X");
    assert!(size >= 1);
    assert!(!temp.path().join("escape").exists());
    assert_eq!(fs::read_to_string(dest.join("escape"))?, "escaped");
    // the scratch directory is gone
    let leftovers: Vec<_> = fs::read_dir(&dest)?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("temp-bock-extract"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn opaque_layer_root_succeeds() -> Result<(), Box<dyn Error>> {
    if !rustix::process::geteuid().is_root() {
        return Ok(());
    }
    let temp = TempDir::new()?;
    fs::write(temp.path().join("lower"), "lower")?;

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(0);
    header.set_mode(0o644);
    set_raw_name(&mut header, ".wh..wh..opq");
    builder.append(&header, &[][..])?;

    reexec_applier().apply_layer(temp.path(), &builder.into_inner()?[..], None)?;
    assert!(!temp.path().join("lower").exists());
    Ok(())
}

#[test]
fn unprivileged_worker_cannot_chroot() -> Result<(), Box<dyn Error>> {
    if rustix::process::geteuid().is_root() {
        return Ok(());
    }
    let temp = TempDir::new()?;

    let err = reexec_applier()
        .apply_layer(temp.path(), &hostile_layer()[..], None)
        .unwrap_err();

    match err {
        BockError::ApplyLayerFailed { stderr, .. } => assert!(stderr.contains("chroot")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!temp.path().join("etc").exists());
    Ok(())
}
