use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Condvar, Mutex};

use rollout_platform::LockedProcess;

/// Rendering hint for a status line; the UI maps tones to colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Stage,
    Warning,
    Error,
    Notice,
}

/// What the user chose in the lock-conflict dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Retry,
    KillAll,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Status { message: String, tone: Tone },
    Progress { description: String, ok: bool },
    ProgressRange { total: u64 },
    DownloadProgress { received: u64, total: Option<u64> },
    LockDetected { processes: Vec<LockedProcess> },
    SelfUpdateRelaunch,
    Cancelled,
    Finished { success: bool },
}

/// Emits engine events toward the UI thread. Sends are fire-and-forget:
/// a closed receiver means the UI is gone and the worker just runs out.
#[derive(Clone)]
pub struct EventSender(Sender<EngineEvent>);

impl EventSender {
    pub fn new(sender: Sender<EngineEvent>) -> Self {
        Self(sender)
    }

    pub fn send(&self, event: EngineEvent) {
        let _ = self.0.send(event);
    }

    pub fn status(&self, message: impl Into<String>, tone: Tone) {
        self.send(EngineEvent::Status {
            message: message.into(),
            tone,
        });
    }

    pub fn progress(&self, description: impl Into<String>, ok: bool) {
        self.send(EngineEvent::Progress {
            description: description.into(),
            ok,
        });
    }
}

/// State shared between the worker and the UI thread: the cancel flag
/// and the lock-dialog gate. The worker parks on the condition variable
/// after emitting `LockDetected`; the UI wakes it with the chosen
/// action. `cancel()` doubles as a wake-up so a lock wait never outlives
/// the user's decision to stop.
#[derive(Default)]
pub struct EngineShared {
    cancel: AtomicBool,
    lock_response: Mutex<Option<LockAction>>,
    lock_condvar: Condvar,
}

impl EngineShared {
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.respond(LockAction::Cancel);
    }

    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn set_cancelled(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn respond(&self, action: LockAction) {
        let mut guard = self
            .lock_response
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(action);
        self.lock_condvar.notify_all();
    }

    /// Blocks until the UI answers the pending lock prompt. A response
    /// posted before the worker parks (including a racing `cancel`) is
    /// consumed immediately.
    pub fn wait_for_lock_response(&self) -> LockAction {
        let mut guard = self
            .lock_response
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(action) = guard.take() {
                return action;
            }
            guard = self
                .lock_condvar
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Spawns a detached process. Injected so tests can observe the
/// self-update relaunch and the post-apply application launch.
pub type Launcher = Box<dyn FnMut(&Path, &[OsString], &Path) -> io::Result<()> + Send>;
