//! Bounded-concurrency supervisor for the external `loop` helper (C3).
//!
//! The original counter-pair protocol (`pstarted`/`pfinished`, the
//! latter incremented from a `SIGCHLD` handler) maps onto a
//! [`tokio::sync::Semaphore`]: acquiring a permit is the async
//! equivalent of the bounded sleep-until-a-slot-frees loop, and tokio's
//! own child reaper retires the permit when the awaited `Child` exits —
//! no explicit `SIGCHLD` handler is needed in the async runtime.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::lifecycle::Lifecycle;

/// Which queue root a dispatched `loop` invocation should act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Queue,
    RQueue,
}

impl QueueKind {
    pub fn arg(self) -> &'static str {
        match self {
            QueueKind::Queue => "queue",
            QueueKind::RQueue => "rqueue",
        }
    }
}

/// Bounded-concurrency process supervisor.
pub struct ProcessSupervisor {
    loop_path: PathBuf,
    permits: Arc<Semaphore>,
    started: AtomicU64,
    finished: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(loop_path: PathBuf, max_concurrent: usize) -> Self {
        Self {
            loop_path,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            started: AtomicU64::new(0),
            finished: AtomicU64::new(0),
        }
    }

    /// Snapshot of `(started, finished)`. Live count is their difference.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.started.load(Ordering::Acquire),
            self.finished.load(Ordering::Acquire),
        )
    }

    /// Acquire a concurrency slot (blocking the caller if saturated,
    /// exactly as `run_process`'s backpressure sleep did) and spawn
    /// `loop <queue|rqueue> <name>`. Reaping and the `finished` bump
    /// happen in a detached task once the child exits.
    ///
    /// The permit wait races against `lifecycle.stopped()`: the original's
    /// backpressure sleep was interruptible by `SIGCHLD` *and* the stop
    /// flag (spec §5, "checked ... before every child spawn"), so a
    /// shutdown requested while `max_proc` children are live must not
    /// block here indefinitely waiting for one of them to exit.
    pub async fn spawn_loop(self: &Arc<Self>, kind: QueueKind, name: &str, lifecycle: &Lifecycle) {
        let permit = tokio::select! {
            acquired = self.permits.clone().acquire_owned() => match acquired {
                Ok(p) => p,
                Err(_) => return, // semaphore closed during shutdown
            },
            _ = lifecycle.stopped() => return,
        };

        let mut cmd = Command::new(&self.loop_path);
        cmd.arg(kind.arg())
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, path = %self.loop_path.display(), "failed to spawn loop helper");
                drop(permit);
                return;
            }
        };

        self.started.fetch_add(1, Ordering::AcqRel);
        info!(queue = kind.arg(), name, "spawned loop helper");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            match child.wait_with_output().await {
                Ok(output) => {
                    if !output.status.success() {
                        warn!(status = ?output.status, "loop helper exited non-zero");
                    }
                }
                Err(e) => warn!(error = %e, "failed to wait on loop helper"),
            }
            this.finished.fetch_add(1, Ordering::AcqRel);
        });
    }
}
