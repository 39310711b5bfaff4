//! Queue watcher / dispatcher loop (C8).
//!
//! Watches `QUEUE` and `RQUEUE` non-recursively, turning filesystem
//! events and a periodic rescan into bounded-concurrency `loop`
//! invocations via [`ProcessSupervisor`]. `notify`'s `RecommendedWatcher`
//! stands in for the original's raw `inotify_init1`/`select` pair (the
//! teacher depends on `notify` for the same job in `vrift-vdird::watch`
//! and `vrift-cas`); the registration-retry/backoff and alternating
//! rescan architecture from spec §4.8 is layered on top of it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cable_proto::is_msgdir_name;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fsutil::DirHandle;
use crate::lifecycle::Lifecycle;
use crate::process::{ProcessSupervisor, QueueKind};

/// Sleep for `dur`, but wake early if [`Lifecycle::request_stop`] fires.
/// Returns `true` if the sleep ran to completion, `false` if interrupted.
async fn interruptible_sleep(dur: Duration, lifecycle: &Lifecycle) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => true,
        _ = lifecycle.stopped() => false,
    }
}

/// Registers a non-recursive watch on both queue roots. All-or-nothing:
/// if either watch fails to register, the whole attempt is an error and
/// no partial registration is left behind.
///
/// Each root is opened as a [`DirHandle`] and held for the duration of
/// the registration attempt before `watcher.watch` is called on it —
/// the Rust analogue of `daemon.c:try_reg_watches` pinning `qpath` with
/// an `open()` fd first, so the filesystem cannot be unmounted out from
/// under the watcher between the existence check and the watch add.
fn register(
    queue_dir: &Path,
    rqueue_dir: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<notify::Result<Event>>)> {
    let pin = |dir: &Path| -> notify::Result<DirHandle> {
        DirHandle::open(dir)
            .map_err(|e| notify::Error::generic(&format!("failed to pin {}: {e}", dir.display())))
    };
    let queue_pin = pin(queue_dir)?;
    let rqueue_pin = pin(rqueue_dir)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        Config::default(),
    )?;
    watcher.watch(queue_dir, RecursiveMode::NonRecursive)?;
    watcher.watch(rqueue_dir, RecursiveMode::NonRecursive)?;
    drop(queue_pin);
    drop(rqueue_pin);
    Ok((watcher, rx))
}

/// Walk one queue root, dispatching `loop` for every entry whose name
/// passes [`is_msgdir_name`] and that is itself a directory. Checked
/// before each `readdir` step and between entries, so a stop request
/// mid-rescan with a large backlog exits promptly instead of spawning
/// `loop` for every remaining entry (spec §5 Cancellation; mirrors the
/// original's `for (errno = 0; !stop_requested() && (de = readdir(qdir));
/// )` in `daemon.c:retry_dir`).
async fn rescan_directory(
    dir: &Path,
    kind: QueueKind,
    supervisor: &std::sync::Arc<ProcessSupervisor>,
    lifecycle: &Lifecycle,
) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "rescan: readdir failed");
            return;
        }
    };

    loop {
        if lifecycle.stop_requested() {
            return;
        }

        let entry = match entries.next_entry().await {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "rescan: readdir entry failed");
                break;
            }
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_msgdir_name(name) {
            continue;
        }
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }

        if lifecycle.stop_requested() {
            return;
        }
        supervisor.spawn_loop(kind, name, lifecycle).await;
    }
}

/// `retrytmout = base * (1 + uniform(-0.5, 0.5))`; decorrelates rescans
/// across daemon instances sharing a filesystem.
fn jittered_timeout(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(-0.5..0.5_f64);
    base.mul_f64(1.0 + jitter)
}

/// One registration generation: process events and run the periodic
/// rescan until something requires re-registration or stop is
/// requested. Returns when either condition holds.
async fn run_generation(
    rx: &mut mpsc::UnboundedReceiver<notify::Result<Event>>,
    queue_dir: &Path,
    rqueue_dir: &Path,
    toggle: &mut QueueKind,
    supervisor: &std::sync::Arc<ProcessSupervisor>,
    lifecycle: &Lifecycle,
    retry_timeout: Duration,
) {
    let mut last_clock = Instant::now();
    let mut retrytmout = jittered_timeout(retry_timeout);
    let mut saw_event = false;

    loop {
        if lifecycle.stop_requested() {
            return;
        }

        let elapsed = last_clock.elapsed();
        if elapsed >= retrytmout {
            let (dir, kind) = match *toggle {
                QueueKind::Queue => (queue_dir, QueueKind::Queue),
                QueueKind::RQueue => (rqueue_dir, QueueKind::RQueue),
            };
            rescan_directory(dir, kind, supervisor, lifecycle).await;
            *toggle = match *toggle {
                QueueKind::Queue => QueueKind::RQueue,
                QueueKind::RQueue => QueueKind::Queue,
            };
            last_clock = Instant::now();
            retrytmout = jittered_timeout(retry_timeout);
            if !saw_event {
                // Unreliable notifications (e.g. fuse-backed filesystems)
                // never surfaced anything this generation; force a
                // re-registration on the next iteration.
                return;
            }
            saw_event = false;
            continue;
        }

        let remaining = retrytmout - elapsed;
        tokio::select! {
            _ = lifecycle.stopped() => return,
            _ = tokio::time::sleep(remaining) => {
                // loop back around; the elapsed check above will fire the rescan
            }
            maybe_event = rx.recv() => {
                match maybe_event {
                    None => return, // channel closed: watcher died, re-register
                    Some(Err(e)) => {
                        warn!(error = %e, "watch: notify error, re-registering");
                        return;
                    }
                    Some(Ok(event)) => {
                        if matches!(event.kind, EventKind::Remove(_)) && event.paths.iter().any(|p| p == queue_dir || p == rqueue_dir) {
                            // MOVE_SELF / UNMOUNT equivalent: the watched
                            // root itself disappeared from under us.
                            return;
                        }
                        for path in &event.paths {
                            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
                            if !is_msgdir_name(name) {
                                continue;
                            }
                            if !path.is_dir() {
                                continue;
                            }
                            let kind = if path.starts_with(queue_dir) {
                                QueueKind::Queue
                            } else {
                                QueueKind::RQueue
                            };
                            debug!(queue = kind.arg(), name, "watch: event matched message directory");
                            supervisor.spawn_loop(kind, name, lifecycle).await;
                            saw_event = true;
                        }
                    }
                }
            }
        }
    }
}

/// Run the watcher/dispatcher loop until `lifecycle` requests a stop.
/// When `nowatch` is set, notification registration is skipped and the
/// loop falls back to polling via the periodic rescan alone.
pub async fn run_watcher(
    queue_dir: PathBuf,
    rqueue_dir: PathBuf,
    nowatch: bool,
    backoff_floor: Duration,
    backoff_mult: f64,
    backoff_cap: Duration,
    retry_timeout: Duration,
    supervisor: std::sync::Arc<ProcessSupervisor>,
    lifecycle: std::sync::Arc<Lifecycle>,
) {
    let mut backoff = backoff_floor;
    let mut toggle = QueueKind::Queue;

    while !lifecycle.stop_requested() {
        if nowatch {
            // Polling-only mode: an unbounded channel that never
            // produces anything drives `run_generation` through
            // rescan-only generations forever.
            let (_tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
            run_generation(
                &mut rx,
                &queue_dir,
                &rqueue_dir,
                &mut toggle,
                &supervisor,
                &lifecycle,
                retry_timeout,
            )
            .await;
            continue;
        }

        match register(&queue_dir, &rqueue_dir) {
            Ok((watcher, mut rx)) => {
                info!(queue = %queue_dir.display(), rqueue = %rqueue_dir.display(), "watch: registered");
                backoff = backoff_floor;
                run_generation(
                    &mut rx,
                    &queue_dir,
                    &rqueue_dir,
                    &mut toggle,
                    &supervisor,
                    &lifecycle,
                    retry_timeout,
                )
                .await;
                drop(watcher);
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs_f64(), "watch: registration failed, retrying");
                if !interruptible_sleep(backoff, &lifecycle).await {
                    return;
                }
                backoff = backoff.mul_f64(backoff_mult).min(backoff_cap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_timeout_stays_within_bounds() {
        let base = Duration::from_secs(100);
        for _ in 0..200 {
            let t = jittered_timeout(base);
            assert!(t >= Duration::from_secs(50));
            assert!(t <= Duration::from_secs(150));
        }
    }

    #[tokio::test]
    async fn rescan_dispatches_only_valid_msgdir_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("0".repeat(40))).unwrap();
        std::fs::create_dir(dir.path().join("not-a-msgid")).unwrap();
        std::fs::write(dir.path().join("1".repeat(40)), b"not a dir").unwrap();

        let supervisor = std::sync::Arc::new(ProcessSupervisor::new(
            PathBuf::from("/bin/true"),
            4,
        ));
        let lifecycle = Lifecycle::new(true);
        rescan_directory(dir.path(), QueueKind::Queue, &supervisor, &lifecycle).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (started, _finished) = supervisor.counts();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn rescan_stops_promptly_when_stop_already_requested() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            std::fs::create_dir(dir.path().join(i.to_string().repeat(40))).unwrap();
        }

        let supervisor = std::sync::Arc::new(ProcessSupervisor::new(PathBuf::from("/bin/true"), 4));
        let lifecycle = Lifecycle::new(true);
        lifecycle.request_stop();
        rescan_directory(dir.path(), QueueKind::Queue, &supervisor, &lifecycle).await;
        let (started, _finished) = supervisor.counts();
        assert_eq!(started, 0);
    }

    #[tokio::test]
    async fn nowatch_mode_still_rescans() {
        let queue = tempfile::tempdir().unwrap();
        let rqueue = tempfile::tempdir().unwrap();
        std::fs::create_dir(queue.path().join("2".repeat(40))).unwrap();

        let supervisor = std::sync::Arc::new(ProcessSupervisor::new(
            PathBuf::from("/bin/true"),
            4,
        ));
        let lifecycle = Lifecycle::new(true);
        let stop_after = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                lifecycle.request_stop();
            })
        };

        run_watcher(
            queue.path().to_path_buf(),
            rqueue.path().to_path_buf(),
            true,
            Duration::from_millis(10),
            1.5,
            Duration::from_millis(100),
            Duration::from_millis(20),
            supervisor.clone(),
            lifecycle,
        )
        .await;
        stop_after.await.unwrap();

        let (started, _finished) = supervisor.counts();
        assert!(started >= 1);
    }
}
