use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{channel, Receiver};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use semver::Version;
use walkdir::WalkDir;

use rollout_core::{
    hash_file, is_reserved_name, read_manifest, relative_key, write_manifest, FileHashes,
    Manifest, MANIFEST_FILE_NAME,
};
use rollout_engine::{EngineEvent, LockAction, Tone, UpdateEngine};
use rollout_platform::{read_exe_version, LockedProcess};

use crate::args::{GenerateConfig, InstallConfig, UpdateConfig, UpdateSource};
use crate::render::{render_log_line, LogPane, OutputStyle};

// ---- generate ----

pub fn run_generate_command(config: GenerateConfig, style: OutputStyle) -> Result<()> {
    let manifest = generate_manifest(
        &config.directory,
        &config.app_exe,
        config.min_version.as_ref(),
    )?;

    let version = manifest
        .version
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    println!(
        "{}",
        render_log_line(
            style,
            Tone::Stage,
            &format!("generated manifest for {}", config.directory.display()),
        )
    );
    println!("version: {version}");
    if let Some(min_version) = &manifest.min_version {
        println!("min_version: {min_version}");
    }
    println!("files: {}", manifest.files.len());
    println!(
        "manifest: {}",
        config.directory.join(MANIFEST_FILE_NAME).display()
    );
    Ok(())
}

/// Scan a release directory and write its manifest. Unlike the engine's
/// target scan, an unreadable file here aborts: a package with unhashable
/// content must never ship.
pub(crate) fn generate_manifest(
    directory: &Path,
    app_exe: &str,
    min_version: Option<&Version>,
) -> Result<Manifest> {
    let exe_path = directory.join(app_exe);
    if !exe_path.exists() {
        bail!("Application executable not found: {}", exe_path.display());
    }

    let version = read_exe_version(&exe_path).ok_or_else(|| {
        anyhow!(
            "Cannot read version information from: {}. The executable must report \
             a version (--version output, or embedded version resources on Windows).",
            exe_path.display()
        )
    })?;

    let manifest_path = directory.join(MANIFEST_FILE_NAME);
    if let Ok(existing) = read_manifest(&manifest_path) {
        if existing.version.as_ref() == Some(&version) {
            bail!(
                "Version {version} matches the existing manifest. Bump the version before regenerating."
            );
        }
    }

    if let Some(min_version) = min_version {
        if *min_version > version {
            bail!("min_version {min_version} is greater than version {version}");
        }
    }

    let mut files = FileHashes::new();
    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if entry.file_type().is_symlink() {
            eprintln!("warning: skipping symlink: {}", entry.path().display());
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if is_reserved_name(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let hash = hash_file(entry.path())
            .with_context(|| format!("Cannot read {}, aborting generation", entry.path().display()))?;
        if let Some(rel_path) = relative_key(directory, entry.path()) {
            files.insert(rel_path, hash);
        }
    }

    let manifest = Manifest {
        version: Some(version),
        min_version: min_version.cloned(),
        app_exe: app_exe.to_string(),
        changelog: None,
        files,
    };
    write_manifest(&manifest_path, &manifest)
        .with_context(|| format!("Failed to write manifest to: {}", manifest_path.display()))?;
    Ok(manifest)
}

// ---- install / update flows ----

pub fn run_install_flow(config: InstallConfig, style: OutputStyle) -> Result<()> {
    // `install` without --source operates on the invoking directory,
    // the way a payload directory shipped next to the updater is used.
    let source_dir = match config.source_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot resolve current directory")?,
    };

    let (sender, receiver) = channel();
    let mut engine = UpdateEngine::new(sender);
    engine.set_install_mode(true);
    engine.set_source_dir(source_dir.clone());
    engine.prepare();

    let target_dir = match config.target_dir {
        Some(target) => target,
        None => prompt_destination(&source_dir, engine.source_manifest())?,
    };
    fs::create_dir_all(&target_dir).with_context(|| {
        format!(
            "The provided directory cannot be created or is inaccessible: {}",
            target_dir.display()
        )
    })?;
    engine.set_target_dir(target_dir);
    engine.prepare();

    match confirm_screen(&engine, style)? {
        Decision::Proceed => run_progress_screen(engine, receiver, style, "INSTALLATION"),
        Decision::Later | Decision::Quit => Ok(()),
    }
}

pub fn run_update_flow(config: UpdateConfig, style: OutputStyle) -> Result<()> {
    let (sender, receiver) = channel();
    let mut engine = UpdateEngine::new(sender);
    match &config.source {
        UpdateSource::Dir(dir) => engine.set_source_dir(dir.clone()),
        UpdateSource::Url(url) => engine.set_source_url(url.clone()),
    }
    engine.set_target_dir(config.target_dir.clone());
    engine.set_force_update(config.force);
    engine.set_continue_update(config.continue_update);
    engine.prepare();

    if config.continue_update {
        // Relaunched half of a self-update: straight to the progress
        // screen, the user already confirmed.
        return run_progress_screen(engine, receiver, style, "UPDATE");
    }

    match confirm_screen(&engine, style)? {
        Decision::Proceed => run_progress_screen(engine, receiver, style, "UPDATE"),
        Decision::Later => {
            launch_without_updating(&engine);
            Ok(())
        }
        Decision::Quit => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Proceed,
    Later,
    Quit,
}

pub(crate) fn parse_confirm_choice(input: &str, allow_later: bool) -> Option<Decision> {
    match input.trim().to_ascii_lowercase().as_str() {
        "" | "c" | "continue" => Some(Decision::Proceed),
        "l" | "later" if allow_later => Some(Decision::Later),
        "q" | "quit" => Some(Decision::Quit),
        _ => None,
    }
}

pub(crate) fn parse_lock_choice(input: &str) -> Option<LockAction> {
    match input.trim().to_ascii_lowercase().as_str() {
        "" | "r" | "retry" => Some(LockAction::Retry),
        "k" | "kill" => Some(LockAction::KillAll),
        "c" | "cancel" => Some(LockAction::Cancel),
        _ => None,
    }
}

pub(crate) fn exe_display_name(app_exe: &str) -> String {
    Path::new(app_exe)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_default()
}

fn app_display_name(manifest: &Manifest) -> String {
    let name = exe_display_name(&manifest.app_exe);
    if name.is_empty() {
        "Application".to_string()
    } else {
        name
    }
}

fn version_badge(version: Option<&Version>) -> String {
    version
        .map(ToString::to_string)
        .unwrap_or_else(|| "?.?.?".to_string())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read input")?;
    Ok(line.trim().to_string())
}

/// Screen 1 (install only): pick the destination directory.
fn prompt_destination(source_dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let app_name = app_display_name(manifest);
    let dir_name = source_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| app_name.clone());
    let default_dir = dirs_next::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(dir_name);

    println!();
    println!("Select the directory where {app_name} will be installed.");
    let input = prompt_line(&format!("Destination folder [{}]: ", default_dir.display()))?;
    if input.is_empty() {
        Ok(default_dir)
    } else {
        Ok(PathBuf::from(input))
    }
}

/// Screen 2: confirmation with version badges and optional changelog.
fn confirm_screen(engine: &UpdateEngine, style: OutputStyle) -> Result<Decision> {
    let manifest = engine.source_manifest();
    let app_name = app_display_name(manifest);
    let new_version = version_badge(manifest.version.as_ref());
    let old_version = version_badge(engine.target_version());

    println!();
    if engine.is_install() {
        println!(
            "{}",
            render_log_line(style, Tone::Stage, &format!("Install {app_name}"))
        );
        println!("Version {new_version}");
    } else {
        println!(
            "{}",
            render_log_line(style, Tone::Stage, "Update Available")
        );
        println!("{app_name} will be updated to version {new_version}");
        println!("  {old_version} -> {new_version}");
    }

    let allow_later = !engine.is_install() && !engine.is_mandatory();
    if engine.is_mandatory() {
        println!("This update is mandatory and cannot be skipped.");
    } else if allow_later {
        println!("This update can be skipped. Choose \"Later\" to launch without updating.");
    }

    if let Some(changelog) = &manifest.changelog {
        println!();
        println!("What's new:");
        for line in changelog.lines() {
            println!("  {line}");
        }
    }

    let options = if allow_later {
        "[C]ontinue / [L]ater / [Q]uit: "
    } else {
        "[C]ontinue / [Q]uit: "
    };
    loop {
        let input = prompt_line(options)?;
        if let Some(decision) = parse_confirm_choice(&input, allow_later) {
            return Ok(decision);
        }
        println!("Please answer c, {}or q.", if allow_later { "l, " } else { "" });
    }
}

fn prompt_lock_dialog(processes: &[LockedProcess], style: OutputStyle) -> Result<LockAction> {
    println!();
    println!(
        "{}",
        render_log_line(
            style,
            Tone::Warning,
            "The following processes are locking files that need to be updated:"
        )
    );
    for process in processes {
        println!("  {}", process.describe());
    }
    println!("Close these processes and choose Retry, or Kill All to terminate them.");

    loop {
        let input = prompt_line("[R]etry / [K]ill all / [C]ancel: ")?;
        if let Some(action) = parse_lock_choice(&input) {
            return Ok(action);
        }
        println!("Please answer r, k, or c.");
    }
}

/// Screen 3: run the worker and render its event stream until a
/// terminal event. Failures past this point exit 0; the log carries the
/// diagnosis.
fn run_progress_screen(
    engine: UpdateEngine,
    receiver: Receiver<EngineEvent>,
    style: OutputStyle,
    operation: &str,
) -> Result<()> {
    let handle = engine.handle();
    let worker = thread::spawn(move || engine.execute());

    let mut pane = LogPane::new(style);
    let mut outcome = None;
    let mut relaunched = false;

    while let Ok(event) = receiver.recv() {
        match event {
            EngineEvent::Status { message, tone } => pane.line(tone, &message),
            EngineEvent::Progress { description, ok } => pane.file_outcome(&description, ok),
            EngineEvent::ProgressRange { total } => {
                pane.reset_bar();
                pane.begin_steps(total);
            }
            EngineEvent::DownloadProgress { received, total } => {
                pane.download_progress(received, total);
            }
            EngineEvent::LockDetected { processes } => {
                pane.reset_bar();
                let action = prompt_lock_dialog(&processes, style)?;
                handle.respond_to_lock_prompt(action);
            }
            EngineEvent::SelfUpdateRelaunch => {
                relaunched = true;
                break;
            }
            EngineEvent::Cancelled => {}
            EngineEvent::Finished { success } => {
                outcome = Some(success);
                break;
            }
        }
    }

    pane.finish();
    let _ = worker.join();

    if relaunched {
        // The relaunched updater owns the rest of the run.
        return Ok(());
    }

    match outcome {
        Some(true) => {
            println!(
                "{}",
                render_log_line(style, Tone::Stage, &format!("{operation} COMPLETE"))
            );
        }
        Some(false) => {
            println!(
                "{}",
                render_log_line(style, Tone::Error, &format!("{operation} FAILED"))
            );
            if !handle.is_cancelled() {
                println!(
                    "{}",
                    render_log_line(
                        style,
                        Tone::Error,
                        "See the log above for files that could not be processed. \
                         A backup was created before the operation and can be used for recovery.",
                    )
                );
            }
        }
        None => {}
    }
    Ok(())
}

/// "Update Later": start the installed application untouched and let it
/// know the update was skipped.
fn launch_without_updating(engine: &UpdateEngine) {
    let manifest = engine.source_manifest();
    if manifest.app_exe.is_empty() {
        return;
    }
    let app_path = engine.target_dir().join(&manifest.app_exe);
    if !app_path.exists() {
        return;
    }
    let _ = Command::new(&app_path)
        .arg("--update_skipped")
        .current_dir(engine.target_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
}
