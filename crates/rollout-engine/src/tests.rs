use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rollout_core::{
    hash_directory, write_manifest, FileHash, FileHashes, Manifest, MANIFEST_FILE_NAME,
};
use rollout_platform::LockedProcess;
use semver::Version;
use tempfile::tempdir;

use crate::engine::{exe_display_name, is_windows_executable};
use crate::fileops::{bak_sibling, FileOps};
use crate::types::{EngineEvent, EngineShared, EventSender, LockAction};
use crate::UpdateEngine;

fn write_file(root: &Path, rel_path: &str, contents: &[u8]) {
    let path = root.join(rel_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dirs");
    }
    fs::write(path, contents).expect("must write file");
}

fn manifest_for(dir: &Path, version: &str) -> Manifest {
    Manifest {
        version: Some(Version::parse(version).expect("test version")),
        min_version: None,
        app_exe: String::new(),
        changelog: None,
        files: hash_directory(dir),
    }
}

fn write_source_manifest(dir: &Path, manifest: &Manifest) {
    write_manifest(&dir.join(MANIFEST_FILE_NAME), manifest).expect("must write manifest");
}

fn test_fileops() -> (FileOps, Receiver<EngineEvent>, Arc<EngineShared>) {
    let (sender, receiver) = channel();
    let shared = Arc::new(EngineShared::default());
    let ops = FileOps::new(
        PathBuf::from("/nonexistent/rollout-test-self"),
        Arc::clone(&shared),
        EventSender::new(sender),
        Arc::new(|_: &std::path::Path| false),
    );
    (ops, receiver, shared)
}

fn test_engine(source: &Path, target: &Path) -> (UpdateEngine, Receiver<EngineEvent>) {
    let (sender, receiver) = channel();
    let mut engine = UpdateEngine::new(sender);
    engine.set_source_dir(source.to_path_buf());
    engine.set_target_dir(target.to_path_buf());
    (engine, receiver)
}

fn drain(receiver: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    receiver.try_iter().collect()
}

fn status_messages(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Status { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn progress_lines(events: &[EngineEvent]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Progress { description, ok } => Some((description.clone(), *ok)),
            _ => None,
        })
        .collect()
}

fn finished_flag(events: &[EngineEvent]) -> Option<bool> {
    events.iter().find_map(|event| match event {
        EngineEvent::Finished { success } => Some(*success),
        _ => None,
    })
}

fn no_bak_files(dir: &Path) -> bool {
    !walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name().to_string_lossy().ends_with(".bak"))
}

fn staging_sibling(target: &Path) -> PathBuf {
    target
        .parent()
        .expect("target has a parent in tests")
        .join(format!(".staging_{}", std::process::id()))
}

// ---- file operations ----

#[test]
fn copy_files_with_empty_list_emits_no_progress() {
    let dir = tempdir().expect("tempdir");
    let (ops, receiver, _) = test_fileops();

    assert!(ops.copy_files(dir.path(), dir.path(), &[]));
    assert!(drain(&receiver).is_empty());
}

#[test]
fn copy_files_creates_parents_and_replaces_existing() {
    let dir = tempdir().expect("tempdir");
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    write_file(&source, "data/a.txt", b"fresh");
    write_file(&target, "data/a.txt", b"stale");

    let (ops, receiver, _) = test_fileops();
    let list = vec!["data/a.txt".to_string()];
    assert!(ops.copy_files(&source, &target, &list));

    assert_eq!(fs::read(target.join("data/a.txt")).expect("copied"), b"fresh");
    let lines = progress_lines(&drain(&receiver));
    assert_eq!(lines, vec![("data/a.txt (COPY)".to_string(), true)]);
}

#[test]
fn copy_files_fails_fast_on_missing_source() {
    let dir = tempdir().expect("tempdir");
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    fs::create_dir_all(&source).expect("mkdir");
    fs::create_dir_all(&target).expect("mkdir");
    write_file(&source, "second.txt", b"later");

    let (ops, receiver, _) = test_fileops();
    let list = vec!["ghost.txt".to_string(), "second.txt".to_string()];
    assert!(!ops.copy_files(&source, &target, &list));

    let lines = progress_lines(&drain(&receiver));
    assert_eq!(
        lines,
        vec![("ghost.txt (COPY) - source not found".to_string(), false)]
    );
    assert!(!target.join("second.txt").exists(), "batch must stop at the failure");
}

#[test]
fn copy_files_skips_the_updater_itself() {
    let dir = tempdir().expect("tempdir");
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    write_file(&source, "updater", b"new build");
    write_file(&target, "updater", b"running build");

    let (sender, receiver) = channel();
    let shared = Arc::new(EngineShared::default());
    let ops = FileOps::new(
        target.join("updater"),
        shared,
        EventSender::new(sender),
        Arc::new(|_: &std::path::Path| false),
    );

    let list = vec!["updater".to_string()];
    assert!(ops.copy_files(&source, &target, &list));
    assert_eq!(
        fs::read(target.join("updater")).expect("still there"),
        b"running build"
    );
    let lines = progress_lines(&drain(&receiver));
    assert_eq!(lines, vec![("updater (SKIP self)".to_string(), true)]);
}

#[test]
fn cancelled_copy_stops_before_touching_files() {
    let dir = tempdir().expect("tempdir");
    let source = dir.path().join("src");
    let target = dir.path().join("dst");
    write_file(&source, "a.txt", b"abc");
    fs::create_dir_all(&target).expect("mkdir");

    let (ops, receiver, shared) = test_fileops();
    shared.set_cancelled();

    let list = vec!["a.txt".to_string()];
    assert!(!ops.copy_files(&source, &target, &list));
    assert!(!target.join("a.txt").exists());
    assert!(drain(&receiver)
        .iter()
        .any(|event| matches!(event, EngineEvent::Cancelled)));
}

#[test]
fn remove_files_treats_missing_as_success() {
    let dir = tempdir().expect("tempdir");
    write_file(dir.path(), "present.txt", b"x");

    let (ops, receiver, _) = test_fileops();
    let list = vec!["present.txt".to_string(), "gone.txt".to_string()];
    assert!(ops.remove_files(dir.path(), &list));

    assert!(!dir.path().join("present.txt").exists());
    let lines = progress_lines(&drain(&receiver));
    assert_eq!(
        lines,
        vec![
            ("present.txt (REMOVE)".to_string(), true),
            ("gone.txt (REMOVE) - already gone".to_string(), true),
        ]
    );
}

#[test]
fn remove_files_with_empty_list_emits_no_progress() {
    let dir = tempdir().expect("tempdir");
    let (ops, receiver, _) = test_fileops();
    assert!(ops.remove_files(dir.path(), &[]));
    assert!(drain(&receiver).is_empty());
}

#[test]
fn backup_and_restore_are_inverse() {
    let dir = tempdir().expect("tempdir");
    write_file(dir.path(), "b.txt", b"version one");
    write_file(dir.path(), "nested/c.txt", b"version two");
    let before = hash_directory(dir.path());

    let (ops, _receiver, _) = test_fileops();
    let list = vec!["b.txt".to_string(), "nested/c.txt".to_string()];

    assert!(ops.rename_to_backup(dir.path(), &list));
    assert!(!dir.path().join("b.txt").exists());
    assert!(dir.path().join("b.txt.bak").exists());
    assert!(dir.path().join("nested/c.txt.bak").exists());

    assert!(ops.restore_from_backup(dir.path(), &list));
    assert_eq!(hash_directory(dir.path()), before, "restore must be bytewise");
    assert!(no_bak_files(dir.path()));
}

#[test]
fn backup_skips_missing_originals() {
    let dir = tempdir().expect("tempdir");
    let (ops, receiver, _) = test_fileops();

    let list = vec!["never-existed.txt".to_string()];
    assert!(ops.rename_to_backup(dir.path(), &list));
    let lines = progress_lines(&drain(&receiver));
    assert_eq!(
        lines,
        vec![(
            "never-existed.txt (BACKUP) - not found, skipping".to_string(),
            true
        )]
    );
}

#[test]
fn restore_replaces_a_half_applied_file() {
    let dir = tempdir().expect("tempdir");
    write_file(dir.path(), "b.txt", b"half-applied new bytes");
    write_file(dir.path(), "b.txt.bak", b"original bytes");

    let (ops, _receiver, _) = test_fileops();
    assert!(ops.restore_from_backup(dir.path(), &["b.txt".to_string()]));
    assert_eq!(
        fs::read(dir.path().join("b.txt")).expect("restored"),
        b"original bytes"
    );
    assert!(!dir.path().join("b.txt.bak").exists());
}

#[test]
fn cleanup_backups_removes_sidecars_only() {
    let dir = tempdir().expect("tempdir");
    write_file(dir.path(), "b.txt", b"current");
    write_file(dir.path(), "b.txt.bak", b"old");

    let (ops, _receiver, _) = test_fileops();
    ops.cleanup_backups(dir.path(), &["b.txt".to_string()]);
    assert!(dir.path().join("b.txt").exists());
    assert!(!dir.path().join("b.txt.bak").exists());
}

#[test]
fn verify_files_reports_mismatch_and_missing() {
    let dir = tempdir().expect("tempdir");
    write_file(dir.path(), "good.txt", b"expected bytes");
    write_file(dir.path(), "bad.txt", b"tampered");

    let mut expected = hash_directory(dir.path());
    expected.insert("bad.txt".to_string(), FileHash([0; 32]));
    expected.insert("missing.txt".to_string(), FileHash([1; 32]));

    let (ops, _receiver, _) = test_fileops();
    let mut mismatches = ops.verify_files(dir.path(), &expected);
    mismatches.sort();
    assert_eq!(mismatches, vec!["bad.txt", "missing.txt"]);
}

#[test]
fn empty_directory_sweep_keeps_root_and_content() {
    let dir = tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("a/b/c")).expect("mkdir");
    fs::create_dir_all(dir.path().join("kept")).expect("mkdir");
    write_file(dir.path(), "kept/file.txt", b"x");

    let (ops, _receiver, _) = test_fileops();
    ops.remove_empty_directories(dir.path());

    assert!(dir.path().exists());
    assert!(!dir.path().join("a").exists(), "empty chain must be swept");
    assert!(dir.path().join("kept/file.txt").exists());
}

#[test]
fn bak_sibling_appends_to_full_name() {
    assert_eq!(
        bak_sibling(Path::new("/t/app/data.tar.gz")),
        PathBuf::from("/t/app/data.tar.gz.bak")
    );
}

// ---- lock gate protocol ----

#[test]
fn lock_gate_delivers_the_ui_response() {
    let shared = Arc::new(EngineShared::default());
    let waiter = Arc::clone(&shared);
    let worker = thread::spawn(move || waiter.wait_for_lock_response());

    thread::sleep(Duration::from_millis(50));
    shared.respond(LockAction::KillAll);
    assert_eq!(worker.join().expect("worker"), LockAction::KillAll);
}

#[test]
fn cancel_wakes_a_parked_lock_wait() {
    let gate = Arc::new(EngineShared::default());
    let parked = Arc::clone(&gate);
    let worker = thread::spawn(move || parked.wait_for_lock_response());

    thread::sleep(Duration::from_millis(50));
    gate.request_cancel();
    assert_eq!(worker.join().expect("worker"), LockAction::Cancel);
    assert!(gate.is_cancelled());
}

#[test]
fn engine_handle_cancel_sets_the_flag() {
    let (sender, _receiver) = channel();
    let engine = UpdateEngine::new(sender);
    let handle = engine.handle();

    assert!(!handle.is_cancelled());
    handle.cancel();
    assert!(handle.is_cancelled());
    assert!(engine.is_cancelled());
}

#[test]
fn a_response_posted_before_the_wait_is_consumed() {
    let shared = EngineShared::default();
    shared.respond(LockAction::Retry);
    assert_eq!(shared.wait_for_lock_response(), LockAction::Retry);
}

#[test]
fn cancelled_backup_verify_and_cleanup_stop_early() {
    let dir = tempdir().expect("tempdir");
    write_file(dir.path(), "b.txt", b"data");

    let (ops, receiver, shared) = test_fileops();
    shared.set_cancelled();

    assert!(!ops.rename_to_backup(dir.path(), &["b.txt".to_string()]));
    assert!(dir.path().join("b.txt").exists());
    assert!(!dir.path().join("b.txt.bak").exists(), "nothing renamed under cancel");

    let mut expected = FileHashes::new();
    expected.insert("b.txt".to_string(), FileHash([9; 32]));
    assert!(
        ops.verify_files(dir.path(), &expected).is_empty(),
        "cancelled verify returns the truncated list"
    );

    write_file(dir.path(), "b.txt.bak", b"old");
    ops.cleanup_backups(dir.path(), &["b.txt".to_string()]);
    assert!(dir.path().join("b.txt.bak").exists(), "cleanup stops under cancel");

    assert!(!ops.restore_from_backup(dir.path(), &["b.txt".to_string()]));
    assert_eq!(fs::read(dir.path().join("b.txt")).expect("b"), b"data");

    assert!(drain(&receiver)
        .iter()
        .any(|event| matches!(event, EngineEvent::Cancelled)));
}

// ---- lock conflicts through execute() ----

fn lock_scan_probe(
    polls: Arc<AtomicUsize>,
    keep_blocking: bool,
) -> crate::engine::LockScanProbe {
    Box::new(move |_: &Path, _: &FileHashes| {
        let first = polls.fetch_add(1, Ordering::SeqCst) == 0;
        if first || keep_blocking {
            vec![LockedProcess {
                pid: 4242,
                display_name: "blocker".to_string(),
            }]
        } else {
            Vec::new()
        }
    })
}

fn drive_to_terminal(
    receiver: &Receiver<EngineEvent>,
    handle: &crate::EngineHandle,
    answer: LockAction,
) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.recv() {
        if let EngineEvent::LockDetected { processes } = &event {
            assert_eq!(processes.len(), 1);
            assert_eq!(processes[0].display_name, "blocker");
            handle.respond_to_lock_prompt(answer);
        }
        let done = matches!(event, EngineEvent::Finished { .. });
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[test]
fn lock_conflict_resolved_by_retry_completes_the_update() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "b.txt", b"B2");
    write_file(&target, "b.txt", b"B1");
    write_source_manifest(&source, &manifest_for(&source, "2.0.0"));

    let (mut engine, receiver) = test_engine(&source, &target);
    engine.set_lock_scan(lock_scan_probe(Arc::new(AtomicUsize::new(0)), false));
    engine.prepare();

    let handle = engine.handle();
    let worker = thread::spawn(move || engine.execute());
    let events = drive_to_terminal(&receiver, &handle, LockAction::Retry);
    worker.join().expect("worker");

    assert!(
        events
            .iter()
            .any(|event| matches!(event, EngineEvent::LockDetected { .. })),
        "the probe must have raised the dialog"
    );
    assert_eq!(finished_flag(&events), Some(true));
    assert_eq!(fs::read(target.join("b.txt")).expect("b"), b"B2");
    assert!(no_bak_files(&target));
    assert!(!staging_sibling(&target).exists());
}

#[test]
fn lock_conflict_answered_with_cancel_preserves_the_target() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "b.txt", b"B2");
    write_file(&target, "b.txt", b"B1");
    write_source_manifest(&source, &manifest_for(&source, "2.0.0"));

    let before = hash_directory(&target);
    let (mut engine, receiver) = test_engine(&source, &target);
    engine.set_lock_scan(lock_scan_probe(Arc::new(AtomicUsize::new(0)), true));
    engine.prepare();

    let handle = engine.handle();
    let worker = thread::spawn(move || engine.execute());
    let events = drive_to_terminal(&receiver, &handle, LockAction::Cancel);
    worker.join().expect("worker");

    assert_eq!(finished_flag(&events), Some(false));
    assert!(status_messages(&events).contains(&"CANCELLED".to_string()));
    assert!(handle.is_cancelled());

    assert_eq!(fs::read(target.join("b.txt")).expect("b"), b"B1");
    assert_eq!(hash_directory(&target), before);
    assert!(no_bak_files(&target));
    assert!(!staging_sibling(&target).exists());
}

// ---- end-to-end scenarios ----

#[test]
fn identity_update_is_a_noop() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    for dir in [&source, &target] {
        write_file(dir, "a.txt", b"A");
        write_file(dir, "b.txt", b"B");
        write_file(dir, "sub/c.txt", b"C");
    }
    write_source_manifest(&source, &manifest_for(&source, "1.0.0"));

    let before = hash_directory(&target);
    let (mut engine, receiver) = test_engine(&source, &target);
    engine.prepare();
    engine.execute();

    let events = drain(&receiver);
    assert_eq!(finished_flag(&events), Some(true));
    assert!(status_messages(&events).contains(&"Already up to date.".to_string()));
    assert_eq!(hash_directory(&target), before);
    assert!(no_bak_files(&target));
    assert!(!staging_sibling(&target).exists());
}

#[test]
fn add_update_remove_brings_target_to_source_state() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "a.txt", b"A");
    write_file(&source, "b.txt", b"B2");
    write_file(&source, "c.txt", b"C");
    write_file(&target, "a.txt", b"A");
    write_file(&target, "b.txt", b"B1");
    write_file(&target, "d.txt", b"D");

    let manifest = manifest_for(&source, "2.0.0");
    write_source_manifest(&source, &manifest);

    let (mut engine, receiver) = test_engine(&source, &target);
    engine.prepare();
    engine.execute();

    let events = drain(&receiver);
    assert_eq!(finished_flag(&events), Some(true));

    assert_eq!(fs::read(target.join("a.txt")).expect("a"), b"A");
    assert_eq!(fs::read(target.join("b.txt")).expect("b"), b"B2");
    assert_eq!(fs::read(target.join("c.txt")).expect("c"), b"C");
    assert!(!target.join("d.txt").exists());
    assert_eq!(hash_directory(&target), manifest.files);
    assert!(no_bak_files(&target));
    assert!(!staging_sibling(&target).exists());

    let lines = progress_lines(&events);
    assert!(lines.contains(&("c.txt (COPY)".to_string(), true)));
    assert!(lines.contains(&("b.txt (BACKUP)".to_string(), true)));
    assert!(lines.contains(&("b.txt (APPLY)".to_string(), true)));
    assert!(lines.contains(&("d.txt (REMOVE)".to_string(), true)));
}

#[test]
fn stage_verification_failure_leaves_target_untouched() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "a.txt", b"A");
    write_file(&source, "b.txt", b"B2");
    write_file(&target, "a.txt", b"A");
    write_file(&target, "b.txt", b"B1");

    // The manifest promises different bytes than the source actually
    // carries, so the staged copy can never verify.
    let mut manifest = manifest_for(&source, "2.0.0");
    manifest.files.insert("b.txt".to_string(), FileHash([0; 32]));
    write_source_manifest(&source, &manifest);

    let before = hash_directory(&target);
    let (mut engine, receiver) = test_engine(&source, &target);
    engine.prepare();
    engine.execute();

    let events = drain(&receiver);
    assert_eq!(finished_flag(&events), Some(false));
    assert!(status_messages(&events)
        .iter()
        .any(|message| message == "STAGING VERIFICATION FAILED"));
    assert_eq!(hash_directory(&target), before);
    assert!(no_bak_files(&target));
    assert!(!staging_sibling(&target).exists());
}

#[test]
fn staging_copy_failure_aborts_without_target_changes() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "a.txt", b"A");
    write_file(&target, "a.txt", b"OLD");

    // A manifest entry with no backing file in the source tree.
    let mut manifest = manifest_for(&source, "2.0.0");
    manifest
        .files
        .insert("ghost.txt".to_string(), FileHash([7; 32]));
    write_source_manifest(&source, &manifest);

    let before = hash_directory(&target);
    let (mut engine, receiver) = test_engine(&source, &target);
    engine.prepare();
    engine.execute();

    let events = drain(&receiver);
    assert_eq!(finished_flag(&events), Some(false));
    assert!(status_messages(&events)
        .iter()
        .any(|message| message == "STAGING FAILED"));
    assert_eq!(hash_directory(&target), before);
    assert!(!staging_sibling(&target).exists());
}

#[test]
fn bare_source_tree_synthesizes_a_manifest_and_installs() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "a.txt", b"A");
    write_file(&source, "sub/b.txt", b"B");
    fs::create_dir_all(&target).expect("mkdir");

    let (mut engine, receiver) = test_engine(&source, &target);
    engine.set_install_mode(true);
    engine.prepare();

    assert_eq!(engine.source_manifest().version, None);
    assert!(engine.source_manifest().app_exe.is_empty());
    assert!(engine.is_mandatory(), "unknown target version forces the update");

    engine.execute();
    let events = drain(&receiver);
    assert_eq!(finished_flag(&events), Some(true));
    assert_eq!(fs::read(target.join("a.txt")).expect("a"), b"A");
    assert_eq!(fs::read(target.join("sub/b.txt")).expect("b"), b"B");
    assert!(!target.join(MANIFEST_FILE_NAME).exists());
}

#[test]
fn prune_removes_stale_manifest_and_sweeps_empty_dirs() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "a.txt", b"A2");
    write_file(&target, "a.txt", b"A1");
    write_file(&target, MANIFEST_FILE_NAME, b"{ \"stale\": true }");
    write_file(&target, "old/junk/leftover.dat", b"junk");

    write_source_manifest(&source, &manifest_for(&source, "2.0.0"));

    let (mut engine, receiver) = test_engine(&source, &target);
    engine.prepare();
    engine.execute();

    let events = drain(&receiver);
    assert_eq!(finished_flag(&events), Some(true));
    assert!(!target.join(MANIFEST_FILE_NAME).exists(), "stale manifest pruned");
    assert!(!target.join("old").exists(), "emptied directories swept");
    assert_eq!(fs::read(target.join("a.txt")).expect("a"), b"A2");

    let lines = progress_lines(&events);
    assert!(lines
        .iter()
        .any(|(description, ok)| description == "manifest.json (STALE)" && *ok));
}

#[test]
fn self_update_renames_relaunches_and_continues() {
    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "updater", b"new updater build");
    write_file(&source, "data.txt", b"payload");
    write_file(&target, "updater", b"old updater build");

    write_source_manifest(&source, &manifest_for(&source, "2.0.0"));

    let launches: Arc<Mutex<Vec<(PathBuf, Vec<OsString>, PathBuf)>>> =
        Arc::new(Mutex::new(Vec::new()));

    let (mut engine, receiver) = test_engine(&source, &target);
    engine.set_self_path(target.join("updater"));
    let recorded = Arc::clone(&launches);
    engine.set_launcher(Box::new(
        move |program: &Path, args: &[OsString], cwd: &Path| {
            recorded
                .lock()
                .expect("launch record")
                .push((program.to_path_buf(), args.to_vec(), cwd.to_path_buf()));
            Ok(())
        },
    ));
    engine.prepare();
    engine.execute();

    let events = drain(&receiver);
    assert!(
        events
            .iter()
            .any(|event| matches!(event, EngineEvent::SelfUpdateRelaunch)),
        "first run must end in a relaunch"
    );
    assert_eq!(finished_flag(&events), None, "relaunch is terminal, not finished");

    assert_eq!(
        fs::read(target.join("updater")).expect("new self"),
        b"new updater build"
    );
    assert_eq!(
        fs::read(target.join("updater_old")).expect("old self"),
        b"old updater build"
    );

    let calls = launches.lock().expect("launch record");
    assert_eq!(calls.len(), 1);
    let (program, args, cwd) = &calls[0];
    assert_eq!(program, &target.join("updater"));
    assert!(args.iter().any(|arg| arg == "--continue-update"));
    assert_eq!(cwd, &target);
    drop(calls);

    // The relaunched process: continue_update removes the sidecar and
    // finishes the remaining work.
    let (mut second, second_receiver) = test_engine(&source, &target);
    second.set_self_path(target.join("updater"));
    second.set_continue_update(true);
    second.set_launcher(Box::new(|_: &Path, _: &[OsString], _: &Path| Ok(())));
    second.prepare();
    second.execute();

    let events = drain(&second_receiver);
    assert_eq!(finished_flag(&events), Some(true));
    assert!(!target.join("updater_old").exists());
    assert_eq!(fs::read(target.join("data.txt")).expect("payload"), b"payload");
    assert!(no_bak_files(&target));
}

#[cfg(unix)]
#[test]
fn prepare_reads_target_version_and_decides_mandatory() {
    use std::os::unix::fs::PermissionsExt;

    let root = tempdir().expect("tempdir");
    let source = root.path().join("source");
    let target = root.path().join("target");
    write_file(&source, "fakeapp", b"#!/bin/sh\necho fakeapp 2.0.0\n");
    fs::create_dir_all(&target).expect("mkdir");
    write_file(&target, "fakeapp", b"#!/bin/sh\necho fakeapp 2.0.0\n");
    fs::set_permissions(
        &target.join("fakeapp"),
        fs::Permissions::from_mode(0o755),
    )
    .expect("chmod");

    let mut manifest = manifest_for(&source, "3.0.0");
    manifest.app_exe = "fakeapp".to_string();
    write_source_manifest(&source, &manifest);

    let (mut engine, _receiver) = test_engine(&source, &target);
    engine.prepare();
    assert_eq!(engine.target_version(), Some(&Version::new(2, 0, 0)));
    assert!(!engine.is_mandatory(), "no min_version, target known: skippable");

    // Raising min_version above the installed version makes it mandatory.
    manifest.min_version = Some(Version::new(2, 5, 0));
    write_source_manifest(&source, &manifest);
    engine.prepare();
    assert!(engine.is_mandatory());

    // So does --force, regardless of versions.
    manifest.min_version = None;
    write_source_manifest(&source, &manifest);
    engine.set_force_update(true);
    engine.prepare();
    assert!(engine.is_mandatory());
}

#[test]
fn url_source_defers_prepare_until_download() {
    let (sender, _receiver) = channel();
    let mut engine = UpdateEngine::new(sender);
    engine.set_source_url("https://example.test/pkg.zip".to_string());
    engine.set_target_dir(PathBuf::from("/nonexistent/target"));
    engine.prepare();

    assert_eq!(engine.source_manifest().version, None);
    assert!(engine.source_manifest().files.is_empty());
}

// ---- small helpers ----

#[test]
fn executable_name_helpers() {
    assert!(is_windows_executable("tools/App.EXE"));
    assert!(!is_windows_executable("tools/app.exe.bak"));
    assert_eq!(exe_display_name("tools/MyApp.exe"), "MyApp");
    assert_eq!(exe_display_name("plain"), "plain");
}
