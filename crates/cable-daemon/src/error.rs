use thiserror::Error;

/// Errors from the directory-relative filesystem primitives (C2).
#[derive(Debug, Error)]
pub enum FsError {
    #[error("filesystem call failed: {0}")]
    Errno(#[from] nix::errno::Errno),
    #[error("advisory lock would block")]
    Busy,
    #[error("line read malformed or truncated")]
    Malformed,
}

impl FsError {
    pub fn is_eexist(&self) -> bool {
        matches!(self, FsError::Errno(nix::errno::Errno::EEXIST))
    }
}

/// Fatal startup errors (C9), surfaced to `main` as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] cable_proto::ConfigError),
    #[error("local username file {path} is malformed: expected 32 base-32 characters")]
    BadUsername { path: String },
    #[error("failed to read local username from {path}: {source}")]
    UsernameIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind HTTP server on {host}:{port}: {source}")]
    Bind {
        host: String,
        port: String,
        #[source]
        source: std::io::Error,
    },
}
