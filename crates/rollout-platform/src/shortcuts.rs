use std::path::Path;

use anyhow::{anyhow, Result};

use crate::desktop_dir;

/// File name of the desktop shortcut for `shortcut_name` on this OS.
pub fn shortcut_file_name(shortcut_name: &str) -> String {
    if cfg!(windows) {
        format!("{shortcut_name}.lnk")
    } else {
        format!("{shortcut_name}.desktop")
    }
}

pub fn create_shortcut(
    target_exe: &Path,
    shortcut_name: &str,
    icon_path: Option<&Path>,
) -> Result<()> {
    let desktop = desktop_dir().ok_or_else(|| anyhow!("no writable desktop directory"))?;
    create_shortcut_in(&desktop, target_exe, shortcut_name, icon_path)
}

pub fn remove_shortcut(shortcut_name: &str) -> Result<()> {
    let desktop = desktop_dir().ok_or_else(|| anyhow!("no writable desktop directory"))?;
    remove_shortcut_in(&desktop, shortcut_name)
}

/// Point desktop shortcuts whose target basename matches `old_exe_name`
/// at `new_target_exe`, renaming them to `new_shortcut_name`. Keeps user
/// pins alive across an application rename. Best-effort.
pub fn migrate_shortcuts(
    old_exe_name: &str,
    new_target_exe: &Path,
    new_shortcut_name: &str,
) -> Result<()> {
    let desktop = desktop_dir().ok_or_else(|| anyhow!("no writable desktop directory"))?;
    migrate_shortcuts_in(&desktop, old_exe_name, new_target_exe, new_shortcut_name)
}

#[cfg(unix)]
mod imp {
    use std::fs;
    use std::path::Path;

    use anyhow::{Context, Result};

    use super::shortcut_file_name;

    pub(crate) fn render_desktop_entry(
        shortcut_name: &str,
        target_exe: &Path,
        icon_path: Option<&Path>,
    ) -> String {
        let mut entry = String::new();
        entry.push_str("[Desktop Entry]\n");
        entry.push_str("Version=1.0\n");
        entry.push_str("Type=Application\n");
        entry.push_str(&format!("Name={shortcut_name}\n"));
        entry.push_str(&format!("Exec={}\n", target_exe.display()));
        if let Some(icon) = icon_path {
            entry.push_str(&format!("Icon={}\n", icon.display()));
        }
        entry.push_str("Terminal=false\n");
        entry
    }

    pub fn create_shortcut_in(
        desktop: &Path,
        target_exe: &Path,
        shortcut_name: &str,
        icon_path: Option<&Path>,
    ) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let path = desktop.join(shortcut_file_name(shortcut_name));
        fs::write(&path, render_desktop_entry(shortcut_name, target_exe, icon_path))
            .with_context(|| format!("failed to write shortcut: {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to set shortcut permissions: {}", path.display()))
    }

    pub fn remove_shortcut_in(desktop: &Path, shortcut_name: &str) -> Result<()> {
        let path = desktop.join(shortcut_file_name(shortcut_name));
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove shortcut: {}", path.display()))?;
        }
        Ok(())
    }

    pub fn migrate_shortcuts_in(
        desktop: &Path,
        old_exe_name: &str,
        new_target_exe: &Path,
        new_shortcut_name: &str,
    ) -> Result<()> {
        let entries = match fs::read_dir(desktop) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("desktop") {
                continue;
            }
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };

            let Some(exec_target) = exec_target_basename(&contents) else {
                continue;
            };
            if !exec_target.eq_ignore_ascii_case(old_exe_name) {
                continue;
            }

            let icon_line = contents
                .lines()
                .find(|line| line.starts_with("Icon="))
                .map(|line| line.trim_start_matches("Icon=").to_string());
            let icon_path = icon_line.as_deref().map(Path::new);

            let _ = fs::remove_file(&path);
            create_shortcut_in(desktop, new_target_exe, new_shortcut_name, icon_path)?;
        }

        Ok(())
    }

    fn exec_target_basename(desktop_entry: &str) -> Option<String> {
        let exec_line = desktop_entry
            .lines()
            .find(|line| line.starts_with("Exec="))?
            .trim_start_matches("Exec=");
        let first_token = exec_line
            .trim()
            .trim_start_matches('"')
            .split(['"', ' '])
            .next()?;
        Path::new(first_token)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

#[cfg(windows)]
mod imp {
    use std::path::Path;
    use std::process::Command;

    use anyhow::Result;

    use super::shortcut_file_name;
    use crate::{escape_ps_single_quote, escape_ps_single_quote_path, run_command};

    pub fn create_shortcut_in(
        desktop: &Path,
        target_exe: &Path,
        shortcut_name: &str,
        icon_path: Option<&Path>,
    ) -> Result<()> {
        let lnk_path = desktop.join(shortcut_file_name(shortcut_name));
        let working_dir = target_exe.parent().unwrap_or(desktop);

        let mut script = format!(
            "$ws = New-Object -ComObject WScript.Shell; \
             $s = $ws.CreateShortcut('{}'); \
             $s.TargetPath = '{}'; \
             $s.WorkingDirectory = '{}'; ",
            escape_ps_single_quote_path(&lnk_path),
            escape_ps_single_quote_path(target_exe),
            escape_ps_single_quote_path(working_dir),
        );
        if let Some(icon) = icon_path {
            script.push_str(&format!(
                "$s.IconLocation = '{}'; ",
                escape_ps_single_quote_path(icon)
            ));
        }
        script.push_str("$s.Save()");

        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(script);
        run_command(&mut command, "failed to create shortcut")
    }

    pub fn remove_shortcut_in(desktop: &Path, shortcut_name: &str) -> Result<()> {
        let path = desktop.join(shortcut_file_name(shortcut_name));
        if path.exists() {
            std::fs::remove_file(&path).map_err(|err| {
                anyhow::anyhow!("failed to remove shortcut {}: {err}", path.display())
            })?;
        }
        Ok(())
    }

    pub fn migrate_shortcuts_in(
        desktop: &Path,
        old_exe_name: &str,
        new_target_exe: &Path,
        new_shortcut_name: &str,
    ) -> Result<()> {
        let new_lnk = shortcut_file_name(new_shortcut_name);
        let script = format!(
            "Get-ChildItem '{}' -Filter *.lnk | ForEach-Object {{ \
               $ws = New-Object -ComObject WScript.Shell; \
               $s = $ws.CreateShortcut($_.FullName); \
               if ([IO.Path]::GetFileName($s.TargetPath) -ieq '{}') {{ \
                 $s.TargetPath = '{}'; \
                 $s.WorkingDirectory = '{}'; \
                 $s.Save(); \
                 if ($_.Name -ine '{}') {{ Rename-Item $_.FullName '{}' -Force }} \
               }} \
             }}",
            escape_ps_single_quote_path(desktop),
            escape_ps_single_quote(old_exe_name),
            escape_ps_single_quote_path(new_target_exe),
            escape_ps_single_quote_path(new_target_exe.parent().unwrap_or(desktop)),
            escape_ps_single_quote(&new_lnk),
            escape_ps_single_quote(&new_lnk),
        );

        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(script);
        run_command(&mut command, "failed to migrate shortcuts")
    }
}

pub use imp::{create_shortcut_in, migrate_shortcuts_in, remove_shortcut_in};

#[cfg(all(test, unix))]
pub(crate) use imp::render_desktop_entry;
