//! Stop flag and INT/TERM lifecycle (C4).
//!
//! C's two process-wide volatiles (`stop`, the started/finished
//! counters) become this module's `Lifecycle`: an atomic cell plus a
//! `Notify` that every suspension point in C8/C3 can await alongside
//! its normal work, and a private task owning the actual signal
//! handlers. `SIGCHLD` accounting itself is handled by
//! [`crate::process::ProcessSupervisor`] via tokio's child reaper, not
//! here — the async runtime already serializes it against the
//! supervisor's own bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{getpgrp, Pid};
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::Notify;
use tracing::info;

/// Process-wide stop flag plus a waker for suspension points.
pub struct Lifecycle {
    stop: AtomicBool,
    notify: Notify,
    /// Suppresses propagating `SIGTERM` to our own process group, for
    /// tests that do not want to tear down the test harness itself.
    test_mode: bool,
}

impl Lifecycle {
    pub fn new(test_mode: bool) -> Arc<Self> {
        Arc::new(Self {
            stop: AtomicBool::new(false),
            notify: Notify::new(),
            test_mode,
        })
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Waits until [`Self::request_stop`] is called. Cheap to call
    /// repeatedly from a `tokio::select!` arm.
    pub async fn stopped(&self) {
        if self.stop_requested() {
            return;
        }
        self.notify.notified().await;
    }

    pub fn request_stop(&self) {
        // The already-set flag is the recursion guard the original's
        // critical section provided via a blocked signal mask.
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify.notify_waiters();
        if !self.test_mode {
            // kill(-pgrp, sig) is POSIX's killpg: propagate SIGTERM to
            // every process in our group, including any running `loop`
            // children.
            let pgrp = getpgrp();
            let _ = signal::kill(Pid::from_raw(-pgrp.as_raw()), Signal::SIGTERM);
        }
    }

    /// Ignore `SIGPIPE` process-wide and spawn the INT/TERM listener
    /// tasks. Must run once, early in C9 wiring.
    pub fn install(self: &Arc<Self>) -> std::io::Result<()> {
        unsafe {
            let _ = signal::sigaction(
                Signal::SIGPIPE,
                &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
            );
        }

        let mut sigint = unix_signal(SignalKind::interrupt())?;
        let mut sigterm = unix_signal(SignalKind::terminate())?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        info!("received SIGINT, stopping");
                        this.request_stop();
                    }
                    _ = sigterm.recv() => {
                        info!("received SIGTERM, stopping");
                        this.request_stop();
                    }
                }
                if this.stop_requested() {
                    break;
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_stop_wakes_waiters() {
        let life = Lifecycle::new(true);
        let waiter = {
            let life = Arc::clone(&life);
            tokio::spawn(async move {
                life.stopped().await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        life.request_stop();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve promptly")
            .unwrap();
    }

    #[test]
    fn request_stop_is_idempotent() {
        let life = Lifecycle::new(true);
        life.request_stop();
        life.request_stop();
        assert!(life.stop_requested());
    }
}
