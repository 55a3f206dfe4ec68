//! Integration tests for the bock-storage binary.
use std::error::Error;
use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn bock_storage() -> Command {
    let mut cmd = Command::cargo_bin("bock-storage").unwrap();
    cmd.env_remove("BOCK_ROOT").env_remove("BOCK_USERNS_REMAP");
    cmd
}

/// Remap to the current user when unprivileged so ownership changes work.
fn remap_flag() -> Option<String> {
    let uid = rustix::process::geteuid().as_raw();
    let gid = rustix::process::getegid().as_raw();
    (uid != 0).then(|| format!("{uid}:{gid}"))
}

#[test]
fn init_prints_effective_root() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    let root = temp.path().join("bock");

    let mut cmd = bock_storage();
    cmd.arg("--root").arg(&root);
    let expected = match remap_flag() {
        Some(flag) => {
            cmd.arg("--userns-remap").arg(&flag);
            flag.replace(':', ".")
        }
        None => "0.0".to_string(),
    };
    cmd.arg("init")
        .assert()
        .success()
        .stdout(predicate::str::ends_with(format!("{expected}\n")));

    assert!(root.join("0.0").is_dir());
    assert!(root.join(expected).is_dir());
    Ok(())
}

#[test]
fn init_migrates_flat_root() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    let root = temp.path().join("bock");
    fs::create_dir(&root)?;
    fs::write(root.join("a"), "a")?;
    fs::create_dir(root.join("b"))?;

    let mut cmd = bock_storage();
    cmd.arg("--root").arg(&root);
    if let Some(flag) = remap_flag() {
        cmd.arg("--userns-remap").arg(flag);
    }
    cmd.arg("init").assert().success();

    assert!(root.join("0.0/a").is_file());
    assert!(root.join("0.0/b").is_dir());
    assert!(!root.join("a").exists());
    Ok(())
}

#[test]
fn invalid_remap_spec_is_rejected() {
    let temp = TempDir::new().unwrap();
    bock_storage()
        .arg("--root")
        .arg(temp.path())
        .args(["--userns-remap", "a:b:c", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("a:b:c"));
}

#[test]
fn remap_requires_native_exec_driver() {
    let temp = TempDir::new().unwrap();
    bock_storage()
        .arg("--root")
        .arg(temp.path())
        .args(["--userns-remap", "1000", "--exec-driver", "lxc", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("native"));
}

#[test]
fn privileged_container_conflicts_with_remap() {
    bock_storage()
        .args(["--userns-remap", "1000:1000", "check-container", "--privileged"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Privileged mode is incompatible"));

    bock_storage()
        .args(["check-container", "--privileged"])
        .assert()
        .success()
        .stdout("ok\n");
}

#[test]
fn apply_layer_reports_missing_archive() {
    let temp = TempDir::new().unwrap();
    bock_storage()
        .arg("apply-layer")
        .arg(temp.path().join("missing.tar"))
        .arg("--dest")
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.tar"));
}
