//! Serve command implementation.

use anyhow::{Context, Result};
use cantata_config::ConfigLoader;
use cantata_server::{AppState, create_router};
use clap::Args;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Arguments for the serve command.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind, overriding the configuration
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Do not run the background sync scheduler
    #[arg(long)]
    pub no_sync: bool,
}

/// Run the serve command until interrupted.
pub async fn run(config: Option<PathBuf>, args: ServeArgs) -> Result<()> {
    let mut config = ConfigLoader::new(config).load()?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let run_sync = config.sync.enabled && !args.no_sync;
    let listen = config.listen.clone();
    let state = AppState::from_config(config).context("failed to initialize mirrors")?;

    let shutdown = CancellationToken::new();
    let scheduler = run_sync.then(|| {
        let token = shutdown.clone();
        tokio::spawn(state.scheduler().run(async move { token.cancelled().await }))
    });

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(addr = %listener.local_addr()?, sync = run_sync, "listening");

    let token = shutdown.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            token.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    info!("shut down");
    Ok(())
}
