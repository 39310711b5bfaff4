//! `cabled` — server-side daemon for the cable anonymous message relay.

use anyhow::{Context, Result};
use cable_daemon::run_daemon;
use cable_proto::CableEnv;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let env = CableEnv::from_env().context("failed to load cable daemon configuration")?;
    run_daemon(env).await
}
