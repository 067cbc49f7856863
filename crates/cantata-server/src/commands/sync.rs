//! Sync command implementation.

use anyhow::{Context, Result};
use cantata_config::ConfigLoader;
use cantata_server::AppState;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the sync command.
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Only sync this mirror
    #[arg(long, value_name = "ALIAS")]
    pub alias: Option<String>,
}

/// Run one forced sync pass. Returns whether every mirror synced.
pub async fn run(config: Option<PathBuf>, args: SyncArgs) -> Result<bool> {
    let config = ConfigLoader::new(config).load()?;
    let state = AppState::from_config(config).context("failed to initialize mirrors")?;
    let outcomes = state
        .scheduler()
        .run_once(true, args.alias.as_deref())
        .await?;

    let mut ok = true;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                info!(mirror = %outcome.alias, root_changed = report.root_changed, "synced");
                println!(
                    "{}: ok (updated {}, include {}{})",
                    outcome.alias,
                    report.updated_packages,
                    report.include_packages,
                    if report.truncated { ", truncated" } else { "" }
                );
            }
            Err(e) => {
                ok = false;
                println!("{}: failed: {e}", outcome.alias);
            }
        }
    }
    Ok(ok)
}
