//! Environment-variable configuration (C9 env lookup; spec §6 Environment).
//!
//! `CABLE_HOME`, `CABLE_QUEUES`, `CABLE_CERTS`, `CABLE_HOST` and
//! `CABLE_PORT` are mandatory; their absence is fatal at startup.
//! `CABLE_NOLOOP`/`CABLE_NOWATCH` are test-only toggles. The
//! `CABLE_TEST_*` overrides are not part of the original five but let
//! integration tests use the source's `TESTING`-build timing constants
//! without a compile-time feature flag.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Resolved daemon configuration, read once at startup (C9).
#[derive(Debug, Clone)]
pub struct CableEnv {
    /// Directory containing the `loop` helper executable.
    pub home: PathBuf,
    /// Parent of `queue/` and `rqueue/`.
    pub queues: PathBuf,
    /// Directory containing `username`, `ca.pem`, `verify.pem`.
    pub certs: PathBuf,
    /// Bind address; empty means all interfaces.
    pub host: String,
    /// Bind port.
    pub port: String,
    /// Disables the watcher loop entirely; pure HTTP server.
    pub noloop: bool,
    /// Skips notification watch registration (polling only).
    pub nowatch: bool,
    /// Suppresses propagating `SIGTERM` to our own process group on stop,
    /// so an integration test harness does not tear down its own test
    /// runner process. The original's compile-time `TESTING` build flag,
    /// surfaced here at runtime like the other `CABLE_TEST_*` overrides.
    pub test_mode: bool,

    /// Backoff floor for watch (re-)registration. Production default 2s.
    pub reg_backoff_floor: Duration,
    /// Backoff multiplier per failed registration attempt.
    pub reg_backoff_mult: f64,
    /// Backoff ceiling for watch (re-)registration. Production default 60s.
    pub reg_backoff_cap: Duration,
    /// Base rescan period (`retrytmout` before jitter). Production 150s.
    pub retry_timeout: Duration,
    /// Maximum concurrently live `loop` children. Production 100.
    pub max_proc: usize,
    /// Backpressure sleep when `max_proc` is saturated. Production 300s.
    pub wait_proc: Duration,
    /// HTTP worker thread pool size. Production 4.
    pub max_thread: usize,
}

impl CableEnv {
    pub fn queue_dir(&self) -> PathBuf {
        self.queues.join("queue")
    }

    pub fn rqueue_dir(&self) -> PathBuf {
        self.queues.join("rqueue")
    }

    pub fn username_path(&self) -> PathBuf {
        self.certs.join(crate::constants::F_USERNAME_FILE)
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = required_path("CABLE_HOME")?;
        let queues = required_path("CABLE_QUEUES")?;
        let certs = required_path("CABLE_CERTS")?;
        let host = required_str("CABLE_HOST")?;
        let port = required_str("CABLE_PORT")?;

        let noloop = flag_set("CABLE_NOLOOP");
        let nowatch = flag_set("CABLE_NOWATCH");
        let test_mode = flag_set("CABLE_TEST_MODE");

        Ok(Self {
            home,
            queues,
            certs,
            host,
            port,
            noloop,
            nowatch,
            test_mode,
            reg_backoff_floor: duration_secs_override("CABLE_TEST_REG_BACKOFF_FLOOR", 2.0)?,
            reg_backoff_mult: 1.5,
            reg_backoff_cap: duration_secs_override("CABLE_TEST_REG_BACKOFF_CAP", 60.0)?,
            retry_timeout: duration_secs_override("CABLE_TEST_RETRY_TIMEOUT", 150.0)?,
            max_proc: usize_override("CABLE_TEST_MAX_PROC", 100)?,
            wait_proc: duration_secs_override("CABLE_TEST_WAIT_PROC", 300.0)?,
            max_thread: usize_override("CABLE_TEST_MAX_THREAD", 4)?,
        })
    }
}

fn required_str(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn required_path(var: &'static str) -> Result<PathBuf, ConfigError> {
    required_str(var).map(PathBuf::from)
}

/// Presence (any value, including empty) is what flips these test-only
/// switches, matching the original's `getenv() != NULL` check.
fn flag_set(var: &str) -> bool {
    std::env::var(var).is_ok()
}

fn duration_secs_override(var: &'static str, default_secs: f64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(value) => {
            let secs: f64 = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var, value })?;
            Ok(Duration::from_secs_f64(secs))
        }
        Err(_) => Ok(Duration::from_secs_f64(default_secs)),
    }
}

fn usize_override(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}
