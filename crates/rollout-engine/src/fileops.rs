use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rollout_core::{hash_file, FileHash, FileHashes};
use rollout_platform::is_file_lock_error;
use walkdir::WalkDir;

use crate::types::{EngineEvent, EngineShared, EventSender};

/// Returns true when the lock on `path` was resolved and the failed
/// primitive should be retried; false when the operation must give up.
pub type LockResolver = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// File-level primitives of the update engine.
///
/// Every operation consults the shared cancel flag at the top of each
/// per-file iteration, wraps its OS calls in a lock-resolver retry loop,
/// and reports one `(description, ok)` progress event per file.
pub struct FileOps {
    self_path: PathBuf,
    shared: Arc<EngineShared>,
    events: EventSender,
    resolver: LockResolver,
}

impl FileOps {
    pub fn new(
        self_path: PathBuf,
        shared: Arc<EngineShared>,
        events: EventSender,
        resolver: LockResolver,
    ) -> Self {
        let self_path = fs::canonicalize(&self_path).unwrap_or(self_path);
        Self {
            self_path,
            shared,
            events,
            resolver,
        }
    }

    pub fn set_self_path(&mut self, self_path: PathBuf) {
        self.self_path = fs::canonicalize(&self_path).unwrap_or(self_path);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// True (and a `Cancelled` event) when the user asked to stop.
    pub fn check_cancel(&self) -> bool {
        if self.shared.is_cancelled() {
            self.events.send(EngineEvent::Cancelled);
            return true;
        }
        false
    }

    fn is_self(&self, absolute: &Path) -> bool {
        let canonical = fs::canonicalize(absolute).unwrap_or_else(|_| absolute.to_path_buf());
        canonical == self.self_path
    }

    fn retry_with_resolver<F>(&self, path: &Path, mut operation: F) -> io::Result<()>
    where
        F: FnMut() -> io::Result<()>,
    {
        loop {
            match operation() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if !is_file_lock_error(&err) {
                        return Err(err);
                    }
                    if !(self.resolver)(path) {
                        return Err(err);
                    }
                }
            }
        }
    }

    pub fn remove_file_with_retry(&self, path: &Path) -> io::Result<()> {
        self.retry_with_resolver(path, || fs::remove_file(path))
    }

    pub fn rename_with_retry(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.retry_with_resolver(to, || fs::rename(from, to))
    }

    fn copy_with_retry(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.retry_with_resolver(to, || fs::copy(from, to).map(|_| ()))
    }

    fn hash_with_retry(&self, path: &Path) -> Option<FileHash> {
        loop {
            match hash_file(path) {
                Ok(hash) => return Some(hash),
                Err(err) => {
                    if !error_chain_has_lock(&err) {
                        return None;
                    }
                    if !(self.resolver)(path) {
                        return None;
                    }
                }
            }
        }
    }

    /// Copy `relpaths` from `source` into `target`, creating parent
    /// directories and replacing existing files. Fail-fast: the first
    /// unrecoverable file aborts the batch.
    pub fn copy_files(&self, source: &Path, target: &Path, relpaths: &[String]) -> bool {
        for rel_path in relpaths {
            if self.check_cancel() {
                return false;
            }

            let src = source.join(rel_path);
            let dst = target.join(rel_path);

            if self.is_self(&dst) {
                self.events.progress(format!("{rel_path} (SKIP self)"), true);
                continue;
            }

            if !src.exists() {
                self.events
                    .progress(format!("{rel_path} (COPY) - source not found"), false);
                return false;
            }

            if let Some(parent) = dst.parent() {
                if fs::create_dir_all(parent).is_err() {
                    self.events.progress(
                        format!("{rel_path} (COPY) - cannot create directory"),
                        false,
                    );
                    return false;
                }
            }

            if dst.exists() && self.remove_file_with_retry(&dst).is_err() {
                self.events.progress(
                    format!("{rel_path} (COPY) - cannot remove existing"),
                    false,
                );
                return false;
            }

            if self.copy_with_retry(&src, &dst).is_err() {
                self.events.progress(format!("{rel_path} (COPY)"), false);
                return false;
            }

            self.events.progress(format!("{rel_path} (COPY)"), true);
        }

        true
    }

    /// Remove `relpaths` under `dir`. Missing files count as success;
    /// failures are reported per file and fold into the return value.
    pub fn remove_files(&self, dir: &Path, relpaths: &[String]) -> bool {
        let mut overall = true;

        for rel_path in relpaths {
            if self.check_cancel() {
                return false;
            }

            let path = dir.join(rel_path);

            if self.is_self(&path) {
                self.events.progress(format!("{rel_path} (SKIP self)"), true);
                continue;
            }

            if !path.exists() {
                self.events
                    .progress(format!("{rel_path} (REMOVE) - already gone"), true);
                continue;
            }

            if self.remove_file_with_retry(&path).is_err() {
                self.events.progress(format!("{rel_path} (REMOVE)"), false);
                overall = false;
            } else {
                self.events.progress(format!("{rel_path} (REMOVE)"), true);
            }
        }

        overall
    }

    /// Rename each `p` to `p.bak`. On any failure (or a cancellation
    /// arriving mid-batch) the already-renamed prefix is renamed back
    /// and the batch reports failure, so no sidecar outlives it.
    pub fn rename_to_backup(&self, dir: &Path, relpaths: &[String]) -> bool {
        for (index, rel_path) in relpaths.iter().enumerate() {
            if self.check_cancel() {
                self.undo_backups(dir, &relpaths[..index]);
                return false;
            }

            let path = dir.join(rel_path);
            let bak_path = bak_sibling(&path);

            if bak_path.exists() {
                let _ = self.remove_file_with_retry(&bak_path);
            }

            if !path.exists() {
                self.events
                    .progress(format!("{rel_path} (BACKUP) - not found, skipping"), true);
                continue;
            }

            if self.rename_with_retry(&path, &bak_path).is_err() {
                self.events.progress(format!("{rel_path} (BACKUP)"), false);
                self.undo_backups(dir, &relpaths[..index]);
                return false;
            }

            self.events.progress(format!("{rel_path} (BACKUP)"), true);
        }

        true
    }

    fn undo_backups(&self, dir: &Path, relpaths: &[String]) {
        for rel_path in relpaths {
            let path = dir.join(rel_path);
            let bak_path = bak_sibling(&path);
            if bak_path.exists() {
                let _ = fs::rename(&bak_path, &path);
            }
        }
    }

    /// Put `.bak` sidecars back in place of their originals. A missing
    /// sidecar is a no-op; restores are attempted for every entry even
    /// after a failure.
    pub fn restore_from_backup(&self, dir: &Path, relpaths: &[String]) -> bool {
        let mut overall = true;

        for rel_path in relpaths {
            if self.check_cancel() {
                return false;
            }

            let path = dir.join(rel_path);
            let bak_path = bak_sibling(&path);

            if !bak_path.exists() {
                continue;
            }

            if path.exists() {
                let _ = self.remove_file_with_retry(&path);
            }

            if self.rename_with_retry(&bak_path, &path).is_err() {
                self.events.progress(format!("{rel_path} (RESTORE)"), false);
                overall = false;
            } else {
                self.events.progress(format!("{rel_path} (RESTORE)"), true);
            }
        }

        overall
    }

    pub fn cleanup_backups(&self, dir: &Path, relpaths: &[String]) {
        for rel_path in relpaths {
            if self.check_cancel() {
                return;
            }

            let bak_path = bak_sibling(&dir.join(rel_path));
            if bak_path.exists() {
                let _ = fs::remove_file(&bak_path);
            }
        }
    }

    /// Hash every expected file and return the ones whose digest does
    /// not match; a missing or unreadable file counts as a mismatch.
    /// Cancellation truncates the pass; callers consult the cancel flag
    /// before trusting an empty result.
    pub fn verify_files(&self, dir: &Path, expected: &FileHashes) -> Vec<String> {
        let mut mismatches = Vec::new();

        for (rel_path, expected_hash) in expected {
            if self.check_cancel() {
                return mismatches;
            }

            let path = dir.join(rel_path);
            match self.hash_with_retry(&path) {
                Some(actual) if actual == *expected_hash => {}
                _ => mismatches.push(rel_path.clone()),
            }
        }

        mismatches
    }

    /// Remove empty directories bottom-up, never `dir` itself.
    pub fn remove_empty_directories(&self, dir: &Path) {
        let mut dirs: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect();

        dirs.sort_by_key(|path| std::cmp::Reverse(path.as_os_str().len()));

        for path in dirs {
            let is_empty = fs::read_dir(&path)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if is_empty {
                let _ = fs::remove_dir(&path);
            }
        }
    }
}

/// `<original>.bak`, next to the original.
pub(crate) fn bak_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

fn error_chain_has_lock(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(is_file_lock_error)
    })
}
