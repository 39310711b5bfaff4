//! cable-daemon: server-side daemon for the cable anonymous message
//! relay (spec.md §1-§2). Wires together the filesystem primitives
//! (C2), process supervisor (C3), signal lifecycle (C4), state machine
//! (C5), request dispatcher (C6), HTTP front (C7) and watcher loop
//! (C8) behind a single `run_daemon` entry point, the same shape as
//! the teacher's `vrift_vdird::run_daemon`.

pub mod dispatch;
pub mod error;
pub mod fsutil;
pub mod handlers;
pub mod http;
pub mod lifecycle;
pub mod process;
pub mod watcher;

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use cable_proto::{is_b32, CableEnv, F_USERNAME_FILE, USERNAME_LENGTH};
use tracing::{error, info};

use crate::error::DaemonError;
use crate::fsutil::DirHandle;
use crate::http::HttpState;
use crate::lifecycle::Lifecycle;
use crate::process::ProcessSupervisor;

const USERNAME_READ_LIMIT: usize = USERNAME_LENGTH + 8;

/// Read and validate `CABLE_CERTS/username`: exactly one line of 32
/// lowercase base-32 characters (spec §6 HTTP surface).
fn read_local_username(certs_dir: &std::path::Path) -> Result<String, DaemonError> {
    let path = certs_dir.join(F_USERNAME_FILE);
    let certs = DirHandle::open(certs_dir).map_err(|e| DaemonError::UsernameIo {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    })?;
    let username = certs
        .read_line(F_USERNAME_FILE, USERNAME_READ_LIMIT)
        .map_err(|_| DaemonError::BadUsername {
            path: path.display().to_string(),
        })?;
    if !is_b32(USERNAME_LENGTH, &username) {
        return Err(DaemonError::BadUsername {
            path: path.display().to_string(),
        });
    }
    Ok(username)
}

fn resolve_bind_addr(env: &CableEnv) -> Result<SocketAddr, DaemonError> {
    let host = if env.host.is_empty() {
        "0.0.0.0"
    } else {
        env.host.as_str()
    };
    format!("{host}:{}", env.port)
        .to_socket_addrs()
        .map_err(|e| DaemonError::Bind {
            host: host.to_string(),
            port: env.port.clone(),
            source: e,
        })?
        .next()
        .ok_or_else(|| DaemonError::Bind {
            host: host.to_string(),
            port: env.port.clone(),
            source: std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no addresses"),
        })
}

/// Start every C8/C7 task and block until `lifecycle` requests a stop.
pub async fn run_daemon(env: CableEnv) -> anyhow::Result<()> {
    // Mirrors service.c's process-wide `umask(0077)`: DCREAT_MODE/FCREAT_MODE
    // request the liberal 0777/0666 bits and rely on the umask for the
    // effective narrower permissions.
    nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o077));

    let username = read_local_username(&env.certs)?;
    info!(%username, "resolved local username");

    let queue_dir = env.queue_dir();
    let rqueue_dir = env.rqueue_dir();
    let queue = DirHandle::open(&queue_dir).map_err(|e| {
        anyhow::anyhow!("failed to open queue root {}: {e}", queue_dir.display())
    })?;
    let rqueue = DirHandle::open(&rqueue_dir).map_err(|e| {
        anyhow::anyhow!("failed to open rqueue root {}: {e}", rqueue_dir.display())
    })?;

    let lifecycle = Lifecycle::new(env.test_mode);
    lifecycle.install()?;

    let supervisor = Arc::new(ProcessSupervisor::new(
        env.home.join("loop"),
        env.max_proc,
    ));

    let http_state = Arc::new(HttpState {
        username,
        certs_dir: env.certs.clone(),
        queue_dir: queue_dir.clone(),
        rqueue_dir: rqueue_dir.clone(),
        queue,
        rqueue,
    });

    let addr = resolve_bind_addr(&env)?;
    let http_lifecycle = Arc::clone(&lifecycle);
    let http_task = tokio::spawn(http::run_http_server(addr, http_state, http_lifecycle));

    let watcher_task = if env.noloop {
        info!("CABLE_NOLOOP set: watcher loop disabled, acting as pure HTTP server");
        None
    } else {
        let watcher_lifecycle = Arc::clone(&lifecycle);
        let watcher_supervisor = Arc::clone(&supervisor);
        Some(tokio::spawn(watcher::run_watcher(
            queue_dir,
            rqueue_dir,
            env.nowatch,
            env.reg_backoff_floor,
            env.reg_backoff_mult,
            env.reg_backoff_cap,
            env.retry_timeout,
            watcher_supervisor,
            watcher_lifecycle,
        )))
    };

    tokio::select! {
        result = http_task => {
            match result {
                Ok(Ok(())) => info!("HTTP server task exited"),
                Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
            lifecycle.request_stop();
        }
        _ = lifecycle.stopped() => {
            info!("stop requested, shutting down");
        }
    }

    if let Some(watcher_task) = watcher_task {
        if let Err(e) = watcher_task.await {
            error!(error = %e, "watcher task panicked");
        }
    }

    Ok(())
}
