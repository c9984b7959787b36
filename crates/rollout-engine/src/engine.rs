use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rollout_core::{
    compute_diff, hash_directory, hash_directory_until, is_reserved_name, read_manifest,
    relative_key, FileHashes, Manifest, MANIFEST_FILE_NAME,
};
use rollout_fetch::DownloadHandler;
use rollout_platform::{
    cleanup_old_self, create_shortcut, find_locking_processes, kill_process, migrate_shortcuts,
    old_self_path, remove_shortcut, rename_self_for_update, set_executable_permission,
    LockedProcess,
};
use semver::Version;
use walkdir::WalkDir;

use crate::fileops::{FileOps, LockResolver};
use crate::types::{EngineEvent, EngineShared, EventSender, Launcher, LockAction, Tone};

const KILL_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Reports the processes blocking the target scan. The default
/// implementation looks for files the hash pass could not read and asks
/// the platform who holds them; tests inject their own probe.
pub(crate) type LockScanProbe = Box<dyn FnMut(&Path, &FileHashes) -> Vec<LockedProcess> + Send>;

fn default_lock_scan_probe() -> LockScanProbe {
    Box::new(|target_dir: &Path, hashed: &FileHashes| {
        let unhashed = unhashed_files_under(target_dir, hashed);
        if unhashed.is_empty() {
            return Vec::new();
        }
        find_locking_processes(&unhashed)
    })
}

/// Files present in the target tree that the hash pass skipped: regular,
/// not reserved, yet absent from the hashed map.
pub(crate) fn unhashed_files_under(target_dir: &Path, hashed: &FileHashes) -> Vec<PathBuf> {
    let mut unhashed = Vec::new();
    for entry in WalkDir::new(target_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if is_reserved_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Some(rel_path) = relative_key(target_dir, entry.path()) else {
            continue;
        };
        if !hashed.contains_key(&rel_path) {
            unhashed.push(entry.into_path());
        }
    }
    unhashed
}

/// Cloneable control surface handed to the UI thread: cancellation and
/// lock-dialog responses. Everything else flows back through events.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    pub fn cancel(&self) {
        self.shared.request_cancel();
    }

    pub fn respond_to_lock_prompt(&self, action: LockAction) {
        self.shared.respond(action);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

/// Drives one install/update from source tree (or URL) to verified
/// target. Configure via the setters, call `prepare()` on the UI
/// thread, then move the engine to a worker and call `execute()`.
pub struct UpdateEngine {
    source_dir: Option<PathBuf>,
    source_url: Option<String>,
    target_dir: PathBuf,
    force_update: bool,
    install_mode: bool,
    continue_update: bool,
    mandatory: bool,
    self_path: PathBuf,
    source_manifest: Manifest,
    target_version: Option<Version>,
    target_files: FileHashes,
    events: EventSender,
    shared: Arc<EngineShared>,
    fileops: FileOps,
    download: DownloadHandler,
    launcher: Launcher,
    lock_scan: LockScanProbe,
}

impl UpdateEngine {
    pub fn new(events: Sender<EngineEvent>) -> Self {
        let events = EventSender::new(events);
        let shared = Arc::new(EngineShared::default());
        let self_path = env::current_exe().unwrap_or_else(|_| PathBuf::from("rollout"));
        let resolver = make_lock_resolver(Arc::clone(&shared), events.clone());
        let fileops = FileOps::new(
            self_path.clone(),
            Arc::clone(&shared),
            events.clone(),
            resolver,
        );

        Self {
            source_dir: None,
            source_url: None,
            target_dir: PathBuf::new(),
            force_update: false,
            install_mode: false,
            continue_update: false,
            mandatory: false,
            self_path,
            source_manifest: Manifest::default(),
            target_version: None,
            target_files: FileHashes::new(),
            events,
            shared,
            fileops,
            download: DownloadHandler::new(),
            launcher: detached_launcher(),
            lock_scan: default_lock_scan_probe(),
        }
    }

    pub fn set_source_dir(&mut self, dir: PathBuf) {
        self.source_dir = Some(dir);
        self.source_url = None;
    }

    pub fn set_source_url(&mut self, url: String) {
        self.source_url = Some(url);
        self.source_dir = None;
    }

    pub fn set_target_dir(&mut self, dir: PathBuf) {
        self.target_dir = dir;
    }

    pub fn set_force_update(&mut self, force: bool) {
        self.force_update = force;
    }

    pub fn set_install_mode(&mut self, install: bool) {
        self.install_mode = install;
    }

    pub fn set_continue_update(&mut self, continue_update: bool) {
        self.continue_update = continue_update;
    }

    /// Override the updater's own executable identity. The default is
    /// the running binary; tests point this at a scratch file.
    pub fn set_self_path(&mut self, self_path: PathBuf) {
        self.fileops.set_self_path(self_path.clone());
        self.self_path = self_path;
    }

    pub(crate) fn set_launcher(&mut self, launcher: Launcher) {
        self.launcher = launcher;
    }

    pub(crate) fn set_lock_scan(&mut self, lock_scan: LockScanProbe) {
        self.lock_scan = lock_scan;
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn source_manifest(&self) -> &Manifest {
        &self.source_manifest
    }

    pub fn target_version(&self) -> Option<&Version> {
        self.target_version.as_ref()
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn is_install(&self) -> bool {
        self.install_mode
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    /// Load the source manifest (or synthesize one by hashing the
    /// source tree), read the target's embedded version, and decide
    /// whether the update is mandatory. Cheap: no network, no hashing
    /// of the target.
    pub fn prepare(&mut self) {
        if self.source_url.is_some() && self.source_dir.is_none() {
            // URL sources resolve at the start of execute(); until then
            // the confirmation screen shows unknown versions.
            return;
        }

        let source_dir = self.source_dir.clone().unwrap_or_default();
        self.source_manifest = match read_manifest(&source_dir.join(MANIFEST_FILE_NAME)) {
            Ok(manifest) => manifest,
            Err(_) => Manifest {
                files: hash_directory(&source_dir),
                ..Manifest::default()
            },
        };

        self.target_version = None;
        if self.target_dir.exists() && !self.source_manifest.app_exe.is_empty() {
            let exe_path = self.target_dir.join(&self.source_manifest.app_exe);
            if exe_path.exists() {
                match rollout_platform::read_exe_version(&exe_path) {
                    Some(version) => self.target_version = Some(version),
                    None => self.events.status(
                        format!(
                            "Cannot read version from target exe, forcing update: {}",
                            exe_path.display()
                        ),
                        Tone::Warning,
                    ),
                }
            } else {
                self.events.status(
                    format!("Target exe not found, forcing update: {}", exe_path.display()),
                    Tone::Warning,
                );
            }
        }

        let below_min = match (&self.source_manifest.min_version, &self.target_version) {
            (Some(min_version), Some(current)) => current < min_version,
            _ => false,
        };
        self.mandatory = self.force_update || self.target_version.is_none() || below_min;
    }

    /// Run the full update sequence. Terminal outcomes are reported as
    /// `Finished(success)` or `SelfUpdateRelaunch`; the target is left
    /// byte-identical to its pre-update state on any failure before the
    /// apply phase, and rolled back on failures after it.
    pub fn execute(mut self) {
        self.shared.reset_cancel();

        if let Some(url) = self.source_url.clone() {
            if !self.resolve_source(&url) {
                self.events.status("DOWNLOAD FAILED", Tone::Error);
                self.finish(false);
                return;
            }
            self.prepare();
        }

        self.events.status("SCANNING TARGET...", Tone::Stage);
        self.scan_target_with_lock_retry();
        if self.is_cancelled() {
            self.events.status("CANCELLED", Tone::Warning);
            self.finish(false);
            return;
        }

        let mut diff = compute_diff(&self.source_manifest.files, &self.target_files);

        let self_rel = self.self_rel_in_target();
        if !self.continue_update {
            if let Some(rel_path) = self_rel.clone() {
                if diff.to_update.contains(&rel_path) || diff.to_add.contains(&rel_path) {
                    self.run_self_update(&rel_path);
                    return;
                }
            }
        } else {
            if let Err(err) = cleanup_old_self(&self.self_path) {
                self.events
                    .status(format!("Could not remove old updater: {err}"), Tone::Warning);
            }
            if let Some(rel_path) = &self_rel {
                diff.to_update.retain(|path| path != rel_path);
                diff.to_add.retain(|path| path != rel_path);
            }
        }

        let files_to_stage: Vec<String> = diff
            .to_add
            .iter()
            .chain(diff.to_update.iter())
            .cloned()
            .collect();

        if files_to_stage.is_empty() && diff.to_remove.is_empty() {
            self.events.status("Already up to date.", Tone::Stage);
            self.finish(true);
            return;
        }

        let total_steps =
            files_to_stage.len() * 2 + diff.to_update.len() + diff.to_remove.len();
        self.events.send(EngineEvent::ProgressRange {
            total: total_steps as u64,
        });

        self.events.status("STAGING FILES...", Tone::Stage);
        let staging_dir = self.staging_dir();
        if staging_dir.exists() {
            let _ = fs::remove_dir_all(&staging_dir);
        }
        if fs::create_dir_all(&staging_dir).is_err() {
            self.events
                .status("Failed to create staging directory", Tone::Error);
            self.finish(false);
            return;
        }

        let source_dir = self.source_dir.clone().unwrap_or_default();
        if !self.fileops.copy_files(&source_dir, &staging_dir, &files_to_stage) {
            if self.is_cancelled() {
                self.events.status("CANCELLED", Tone::Warning);
            } else {
                self.events.status("STAGING FAILED", Tone::Error);
            }
            let _ = fs::remove_dir_all(&staging_dir);
            self.finish(false);
            return;
        }

        self.events.status("VERIFYING STAGED FILES...", Tone::Stage);
        let staged_expected: FileHashes = files_to_stage
            .iter()
            .filter_map(|rel_path| {
                self.source_manifest
                    .files
                    .get(rel_path)
                    .map(|hash| (rel_path.clone(), *hash))
            })
            .collect();
        if !staged_expected.is_empty() {
            let mismatches = self.fileops.verify_files(&staging_dir, &staged_expected);
            if self.is_cancelled() {
                // A truncated verification pass proves nothing.
                self.events.status("CANCELLED", Tone::Warning);
                let _ = fs::remove_dir_all(&staging_dir);
                self.finish(false);
                return;
            }
            if !mismatches.is_empty() {
                for rel_path in &mismatches {
                    self.events
                        .status(format!("Staging mismatch: {rel_path}"), Tone::Error);
                }
                self.events
                    .status("STAGING VERIFICATION FAILED", Tone::Error);
                let _ = fs::remove_dir_all(&staging_dir);
                self.finish(false);
                return;
            }
        }

        if !diff.to_update.is_empty() {
            self.events.status("CREATING BACKUP...", Tone::Stage);
            if !self.fileops.rename_to_backup(&self.target_dir, &diff.to_update) {
                if self.is_cancelled() {
                    self.events.status("CANCELLED", Tone::Warning);
                } else {
                    self.events.status("BACKUP FAILED", Tone::Error);
                }
                let _ = fs::remove_dir_all(&staging_dir);
                self.finish(false);
                return;
            }
            self.events.status("BACKUP SUCCESS", Tone::Stage);
        }

        self.events.status("APPLYING UPDATE...", Tone::Stage);
        let mut placed = Vec::new();
        if !self.apply_staged(&staging_dir, &files_to_stage, &mut placed) {
            if self.is_cancelled() {
                self.events.status("CANCELLED - ROLLING BACK...", Tone::Warning);
            } else {
                self.events
                    .status("APPLY FAILED - ROLLING BACK...", Tone::Error);
            }
            let placed_adds: Vec<String> = placed
                .into_iter()
                .filter(|rel_path| diff.to_add.contains(rel_path))
                .collect();
            self.rollback(&placed_adds, &diff.to_update);
            let _ = fs::remove_dir_all(&staging_dir);
            self.finish(false);
            return;
        }

        let migrate_to_app =
            !self.source_manifest.app_exe.is_empty() && diff.to_add.contains(&self.source_manifest.app_exe);

        if !diff.to_remove.is_empty() {
            self.events
                .status("REMOVING OBSOLETE FILES...", Tone::Stage);
            for rel_path in &diff.to_remove {
                if is_windows_executable(rel_path) {
                    self.retire_executable_shortcut(rel_path, migrate_to_app);
                }
            }
            self.fileops.remove_files(&self.target_dir, &diff.to_remove);
        }

        self.events.status("CLEANING STALE FILES...", Tone::Stage);
        self.prune_stale_files(migrate_to_app);
        self.fileops.remove_empty_directories(&self.target_dir);

        self.events.status("VERIFYING TARGET...", Tone::Stage);
        let mismatches = self
            .fileops
            .verify_files(&self.target_dir, &self.source_manifest.files);
        if self.is_cancelled() {
            self.events
                .status("CANCELLED - ROLLING BACK...", Tone::Warning);
            self.rollback(&diff.to_add, &diff.to_update);
            let _ = fs::remove_dir_all(&staging_dir);
            self.finish(false);
            return;
        }
        if !mismatches.is_empty() {
            for rel_path in &mismatches {
                self.events
                    .status(format!("Target mismatch: {rel_path}"), Tone::Error);
            }
            self.events
                .status("TARGET VERIFICATION FAILED - ROLLING BACK...", Tone::Error);
            self.rollback(&diff.to_add, &diff.to_update);
            let _ = fs::remove_dir_all(&staging_dir);
            self.finish(false);
            return;
        }

        self.fileops.cleanup_backups(&self.target_dir, &diff.to_update);
        if staging_dir.exists() {
            let _ = fs::remove_dir_all(&staging_dir);
        }

        self.post_apply();
        self.finish(true);
    }

    fn finish(&mut self, success: bool) {
        self.events.send(EngineEvent::Finished { success });
    }

    fn rollback(&self, placed_adds: &[String], updated: &[String]) {
        // Rollback runs to completion even when a cancel request is what
        // brought us here: park the flag while the sidecars go back.
        let was_cancelled = self.shared.is_cancelled();
        self.shared.reset_cancel();

        self.fileops.remove_files(&self.target_dir, placed_adds);
        self.fileops.restore_from_backup(&self.target_dir, updated);

        if was_cancelled {
            self.shared.set_cancelled();
        }
    }

    fn resolve_source(&mut self, url: &str) -> bool {
        let status_events = self.events.clone();
        let mut status = move |message: String| status_events.status(message, Tone::Notice);
        let progress_events = self.events.clone();
        let mut progress = move |received: u64, total: Option<u64>| {
            progress_events.send(EngineEvent::DownloadProgress { received, total });
        };

        match self
            .download
            .fetch_and_extract(url, &mut status, &mut progress)
        {
            Ok(local_dir) => {
                self.source_dir = Some(local_dir);
                true
            }
            Err(err) => {
                self.events.status(
                    format!("Failed to download update package from {url}: {err}"),
                    Tone::Error,
                );
                false
            }
        }
    }

    /// Hash the target tree, looping through the lock dialog until every
    /// non-reserved file is accounted for or the user gives up. The walk
    /// itself watches the cancel flag, so a cancellation mid-scan stops
    /// between entries instead of after the full tree.
    fn scan_target_with_lock_retry(&mut self) {
        self.target_files.clear();
        if !self.target_dir.exists() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let interrupted = move || shared.is_cancelled();

        self.target_files = hash_directory_until(&self.target_dir, &interrupted);

        loop {
            if self.shared.is_cancelled() {
                break;
            }

            let locked = (self.lock_scan)(&self.target_dir, &self.target_files);
            if locked.is_empty() {
                // Either everything hashed, or nobody identifiable holds
                // the leftovers; the per-file primitives surface errors.
                break;
            }

            self.events.send(EngineEvent::LockDetected {
                processes: locked.clone(),
            });

            match self.shared.wait_for_lock_response() {
                LockAction::Cancel => {
                    self.shared.set_cancelled();
                    break;
                }
                LockAction::KillAll => {
                    for process in &locked {
                        kill_process(process.pid);
                    }
                    thread::sleep(KILL_SETTLE_DELAY);
                }
                LockAction::Retry => {}
            }

            self.target_files = hash_directory_until(&self.target_dir, &interrupted);
        }
    }

    fn self_rel_in_target(&self) -> Option<String> {
        let target = fs::canonicalize(&self.target_dir).unwrap_or_else(|_| self.target_dir.clone());
        let self_path = fs::canonicalize(&self.self_path).unwrap_or_else(|_| self.self_path.clone());
        relative_key(&target, &self_path)
    }

    /// Replace the running updater with the staged one and relaunch it
    /// with `--continue-update`. Terminal: the relaunched process picks
    /// the update back up.
    fn run_self_update(&mut self, self_rel: &str) {
        self.events
            .status("Self-update detected, relaunching...", Tone::Warning);

        if rename_self_for_update(&self.self_path).is_err() {
            self.events
                .status("Failed to rename updater for self-update", Tone::Error);
            self.finish(false);
            return;
        }

        let source_dir = self.source_dir.clone().unwrap_or_default();
        let staged_self = source_dir.join(self_rel);
        if fs::copy(&staged_self, &self.self_path).is_err() {
            let old_path = old_self_path(&self.self_path);
            if old_path.exists() {
                let _ = fs::rename(&old_path, &self.self_path);
            }
            self.events.status("Failed to copy new updater", Tone::Error);
            self.finish(false);
            return;
        }

        if let Err(err) = set_executable_permission(&self.self_path) {
            self.events
                .status(format!("Could not mark new updater executable: {err}"), Tone::Warning);
        }

        let mut args: Vec<OsString> = env::args_os().skip(1).collect();
        if !args.iter().any(|arg| arg == "--continue-update") {
            args.push(OsString::from("--continue-update"));
        }

        match (self.launcher)(&self.self_path, &args, &self.target_dir) {
            Ok(()) => self.events.send(EngineEvent::SelfUpdateRelaunch),
            Err(_) => {
                self.events.status("Failed to relaunch updater", Tone::Error);
                self.finish(false);
            }
        }
    }

    fn staging_dir(&self) -> PathBuf {
        let name = format!(".staging_{}", std::process::id());
        self.target_dir
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(name)
    }

    /// Move staged files into the target, creating directories and
    /// replacing existing files. `placed` records what landed so a
    /// failure can undo the partial apply.
    fn apply_staged(
        &self,
        staging_dir: &Path,
        files_to_stage: &[String],
        placed: &mut Vec<String>,
    ) -> bool {
        for rel_path in files_to_stage {
            if self.fileops.check_cancel() {
                return false;
            }

            let src = staging_dir.join(rel_path);
            let dst = self.target_dir.join(rel_path);

            if let Some(parent) = dst.parent() {
                if fs::create_dir_all(parent).is_err() {
                    self.events.progress(
                        format!("{rel_path} (APPLY) - cannot create directory"),
                        false,
                    );
                    return false;
                }
            }

            if dst.exists() && self.fileops.remove_file_with_retry(&dst).is_err() {
                self.events.progress(
                    format!("{rel_path} (APPLY) - cannot remove existing"),
                    false,
                );
                return false;
            }

            if self.fileops.rename_with_retry(&src, &dst).is_err() {
                self.events.progress(format!("{rel_path} (APPLY)"), false);
                return false;
            }

            placed.push(rel_path.clone());
            self.events.progress(format!("{rel_path} (APPLY)"), true);
        }

        true
    }

    /// Remove every target file that is neither in the manifest nor a
    /// `.bak` sidecar. A stale manifest from a previous layout falls
    /// under this sweep too.
    fn prune_stale_files(&mut self, migrate_to_app: bool) {
        let entries: Vec<PathBuf> = WalkDir::new(&self.target_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| !entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect();

        for path in entries {
            let Some(rel_path) = relative_key(&self.target_dir, &path) else {
                continue;
            };
            if rel_path.ends_with(".bak") {
                continue;
            }
            if self.source_manifest.files.contains_key(&rel_path) {
                continue;
            }

            let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            let self_canonical =
                fs::canonicalize(&self.self_path).unwrap_or_else(|_| self.self_path.clone());
            if canonical == self_canonical {
                self.events
                    .progress(format!("{rel_path} (SKIP self)"), true);
                continue;
            }

            if is_windows_executable(&rel_path) {
                self.retire_executable_shortcut(&rel_path, migrate_to_app);
            }

            if self.fileops.remove_file_with_retry(&path).is_ok() {
                self.events.progress(format!("{rel_path} (STALE)"), true);
            } else {
                self.events
                    .progress(format!("{rel_path} (STALE) - cannot remove"), false);
            }
        }
    }

    /// Drop the desktop shortcut of a removed executable. When the app
    /// executable itself was renamed in this update, matching shortcuts
    /// are first migrated to the new name so user pins survive.
    fn retire_executable_shortcut(&self, rel_path: &str, migrate_to_app: bool) {
        let base_name = exe_display_name(rel_path);

        if migrate_to_app {
            let app_base = exe_display_name(&self.source_manifest.app_exe);
            if !app_base.eq_ignore_ascii_case(&base_name) {
                let old_file_name = Path::new(rel_path)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| rel_path.to_string());
                let new_abs = self.target_dir.join(&self.source_manifest.app_exe);
                let _ = migrate_shortcuts(&old_file_name, &new_abs, &app_base);
            }
        }

        let _ = remove_shortcut(&base_name);
    }

    fn post_apply(&mut self) {
        if !self.source_manifest.app_exe.is_empty() {
            let app_abs = self.target_dir.join(&self.source_manifest.app_exe);
            let app_name = exe_display_name(&self.source_manifest.app_exe);

            if let Err(err) = create_shortcut(&app_abs, &app_name, None) {
                self.events
                    .status(format!("Failed to create shortcut: {err}"), Tone::Warning);
            }

            if app_abs.exists() {
                let launch_arg = if self.install_mode {
                    "--installation"
                } else {
                    "--update"
                };
                match (self.launcher)(&app_abs, &[OsString::from(launch_arg)], &self.target_dir) {
                    Ok(()) => self
                        .events
                        .status(format!("Launching: {}", app_abs.display()), Tone::Warning),
                    Err(_) => self
                        .events
                        .status(format!("Failed to launch: {}", app_abs.display()), Tone::Error),
                }
            } else {
                self.events.status(
                    format!("Cannot find application after update: {}", app_abs.display()),
                    Tone::Error,
                );
            }
        }

        self.download.cleanup();
    }
}

/// Per-path lock resolution used by the file primitives: enumerate the
/// holders, raise the dialog, act on the response, and report whether
/// the caller should retry.
fn make_lock_resolver(shared: Arc<EngineShared>, events: EventSender) -> LockResolver {
    Arc::new(move |path: &Path| {
        loop {
            let locked = find_locking_processes(&[path.to_path_buf()]);
            if locked.is_empty() {
                return false;
            }

            events.send(EngineEvent::LockDetected {
                processes: locked.clone(),
            });

            match shared.wait_for_lock_response() {
                LockAction::Cancel => {
                    shared.set_cancelled();
                    return false;
                }
                LockAction::KillAll => {
                    for process in &locked {
                        kill_process(process.pid);
                    }
                    thread::sleep(KILL_SETTLE_DELAY);
                }
                LockAction::Retry => {}
            }

            let still_locked = find_locking_processes(&[path.to_path_buf()]);
            if still_locked.is_empty() {
                return true;
            }
        }
    })
}

fn detached_launcher() -> Launcher {
    Box::new(|program: &Path, args: &[OsString], cwd: &Path| {
        Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    })
}

pub(crate) fn is_windows_executable(rel_path: &str) -> bool {
    rel_path.to_ascii_lowercase().ends_with(".exe")
}

/// Shortcut/display name of an executable path: file name without its
/// final extension.
pub(crate) fn exe_display_name(rel_path: &str) -> String {
    Path::new(rel_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| rel_path.to_string())
}
