use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};

mod shortcuts;
mod version_probe;

pub use shortcuts::{
    create_shortcut, create_shortcut_in, migrate_shortcuts, migrate_shortcuts_in,
    remove_shortcut, remove_shortcut_in, shortcut_file_name,
};
pub use version_probe::read_exe_version;

/// A process holding one of the files we need to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedProcess {
    pub pid: u64,
    pub display_name: String,
}

impl LockedProcess {
    pub fn describe(&self) -> String {
        format!("{} (PID {})", self.display_name, self.pid)
    }
}

pub fn desktop_dir() -> Option<PathBuf> {
    dirs_next::desktop_dir()
}

#[cfg(unix)]
const FILE_LOCK_ERRNOS: [i32; 2] = [16, 26]; // EBUSY, ETXTBSY
#[cfg(windows)]
const FILE_LOCK_ERRNOS: [i32; 2] = [32, 33]; // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION

/// Whether an I/O error means "another process holds this file open",
/// as opposed to a permission or disk problem.
pub fn is_file_lock_error(error: &io::Error) -> bool {
    error
        .raw_os_error()
        .is_some_and(|code| FILE_LOCK_ERRNOS.contains(&code))
}

/// Enumerate processes holding any of `paths` open. Linux reads
/// `/proc/<pid>/fd`; platforms without that interface report nothing and
/// callers degrade to surfacing the raw I/O error.
#[cfg(unix)]
pub fn find_locking_processes(paths: &[PathBuf]) -> Vec<LockedProcess> {
    use std::collections::HashSet;

    let mut result = Vec::new();
    if paths.is_empty() {
        return result;
    }

    let targets: HashSet<PathBuf> = paths
        .iter()
        .map(|path| fs::canonicalize(path).unwrap_or_else(|_| path.clone()))
        .collect();

    let Ok(entries) = fs::read_dir("/proc") else {
        return result;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<u64>().ok())
        else {
            continue;
        };

        let fd_dir = entry.path().join("fd");
        let Ok(fds) = fs::read_dir(&fd_dir) else {
            continue;
        };

        for fd in fds.flatten() {
            let Ok(link_target) = fs::read_link(fd.path()) else {
                continue;
            };
            if targets.contains(&link_target) {
                let display_name = fs::read_to_string(entry.path().join("comm"))
                    .map(|comm| comm.trim().to_string())
                    .ok()
                    .filter(|comm| !comm.is_empty())
                    .unwrap_or_else(|| pid.to_string());
                result.push(LockedProcess { pid, display_name });
                break;
            }
        }
    }

    result
}

#[cfg(windows)]
pub fn find_locking_processes(_paths: &[PathBuf]) -> Vec<LockedProcess> {
    // Restart Manager enumeration needs COM bindings; without it the
    // lock loop stops after one pass and the raw error surfaces.
    Vec::new()
}

pub fn kill_process(pid: u64) -> bool {
    let mut command = if cfg!(windows) {
        let mut command = Command::new("taskkill");
        command.arg("/PID").arg(pid.to_string()).arg("/F");
        command
    } else {
        let mut command = Command::new("kill");
        command.arg("-9").arg(pid.to_string());
        command
    };
    run_command(&mut command, "failed to terminate process").is_ok()
}

/// `<self>_old`, the sidecar name used while replacing a running binary.
pub fn old_self_path(self_path: &Path) -> PathBuf {
    let mut name = self_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("rollout"));
    name.push("_old");
    self_path.with_file_name(name)
}

pub fn rename_self_for_update(self_path: &Path) -> Result<()> {
    let old_path = old_self_path(self_path);
    if old_path.exists() {
        fs::remove_file(&old_path)
            .with_context(|| format!("failed to clear stale sidecar: {}", old_path.display()))?;
    }
    fs::rename(self_path, &old_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            self_path.display(),
            old_path.display()
        )
    })
}

pub fn cleanup_old_self(self_path: &Path) -> Result<()> {
    let old_path = old_self_path(self_path);
    if old_path.exists() {
        fs::remove_file(&old_path)
            .with_context(|| format!("failed to remove sidecar: {}", old_path.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
pub fn set_executable_permission(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("failed to set executable mode on {}", path.display()))
}

#[cfg(windows)]
pub fn set_executable_permission(_path: &Path) -> Result<()> {
    Ok(())
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

#[cfg(windows)]
pub(crate) fn escape_ps_single_quote(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(windows)]
pub(crate) fn escape_ps_single_quote_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}
