use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use rollout_core::parse_version;
use semver::Version;

/// Extract the embedded version of an application executable.
///
/// Returns `None` when the binary cannot be started, stays silent, or
/// prints nothing that looks like a version. Callers treat `None` as
/// "target version unknown" and force the update.
pub fn read_exe_version(exe_path: &Path) -> Option<Version> {
    let output = probe(exe_path)?;
    extract_version_text(&output).and_then(|text| parse_version(&text))
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+\.\d+(?:\.\d+)*)").expect("static pattern compiles"))
}

fn extract_version_text(output: &str) -> Option<String> {
    version_pattern()
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|capture| capture.as_str().to_string())
}

#[cfg(unix)]
fn probe(exe_path: &Path) -> Option<String> {
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    let mut child = Command::new(exe_path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }

    let output = child.wait_with_output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        return Some(stdout.into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        None
    } else {
        Some(stderr.into_owned())
    }
}

#[cfg(windows)]
fn probe(exe_path: &Path) -> Option<String> {
    use std::process::Command;

    use crate::escape_ps_single_quote_path;

    let script = format!(
        "(Get-Item '{}').VersionInfo.ProductVersion",
        escape_ps_single_quote_path(exe_path)
    );
    let output = Command::new("powershell")
        .arg("-NoProfile")
        .arg("-Command")
        .arg(script)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    if text.trim().is_empty() {
        None
    } else {
        Some(text.into_owned())
    }
}
