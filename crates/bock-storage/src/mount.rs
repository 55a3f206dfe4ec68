//! Mount helpers for the driver home directory.

use std::fs;
use std::path::Path;

use bock_common::{BockError, BockResult};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Returns true if `target` is a mount point according to
/// `/proc/self/mountinfo`.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn is_mounted(target: &Path) -> BockResult<bool> {
    let table = fs::read_to_string(MOUNTINFO).map_err(|e| BockError::fs("read", MOUNTINFO, e))?;
    Ok(mountinfo_contains(&table, target))
}

/// Field 5 of each mountinfo line is the mount point, with spaces and
/// other special characters octal-escaped.
fn mountinfo_contains(table: &str, target: &Path) -> bool {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .any(|mount_point| Path::new(&unescape(mount_point)) == target)
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let code: String = chars.by_ref().take(3).collect();
            match u8::from_str_radix(&code, 8) {
                Ok(byte) => out.push(char::from(byte)),
                Err(_) => {
                    out.push('\\');
                    out.push_str(&code);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Make `target` a private mount point, bind-mounting it onto itself first
/// if it is not one yet.
///
/// # Errors
///
/// Returns an error if either mount call fails.
#[cfg(target_os = "linux")]
pub fn make_private(target: &Path) -> BockResult<()> {
    use rustix::mount::{MountPropagationFlags, mount_bind, mount_change};

    if !is_mounted(target)? {
        tracing::debug!(path = %target.display(), "Bind mounting onto itself");
        mount_bind(target, target)
            .map_err(|e| BockError::fs("bind mount", target, e.into()))?;
    }

    tracing::debug!(path = %target.display(), "Making mount private");
    mount_change(target, MountPropagationFlags::PRIVATE)
        .map_err(|e| BockError::fs("make private", target, e.into()))?;

    Ok(())
}

/// Mount propagation is Linux-only.
#[cfg(not(target_os = "linux"))]
pub fn make_private(_target: &Path) -> BockResult<()> {
    Err(BockError::Unsupported {
        feature: "mount propagation".to_string(),
    })
}

/// Unmount `target` if it is mounted; an unmounted target is success.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or unmount fails.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> BockResult<()> {
    use rustix::mount::{UnmountFlags, unmount as sys_unmount};

    if !is_mounted(target)? {
        return Ok(());
    }

    tracing::debug!(path = %target.display(), "Unmounting filesystem");
    sys_unmount(target, UnmountFlags::empty())
        .map_err(|e| BockError::fs("unmount", target, e.into()))?;

    Ok(())
}

/// Unmounting is Linux-only.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> BockResult<()> {
    Err(BockError::Unsupported {
        feature: "unmount".to_string(),
    })
}
