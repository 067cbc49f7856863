//! Import command implementation.

use anyhow::{Context, Result};
use cantata_core::NetworkSwitch;
use cantata_repository::{
    Credentials, DEFAULT_LIMIT_SIZE, HttpClient, HttpClientConfig, ImportComposerRepository,
    MetadataFetcher, ProxyOptions,
};
use clap::Args;
use std::sync::Arc;
use tracing::info;

/// Arguments for the import command.
#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Repository root URL
    pub url: String,

    /// Only import packages matching this glob (e.g. "symfony/*")
    #[arg(long)]
    pub filter: Option<String>,

    /// Stop after this many packages
    #[arg(long, default_value_t = DEFAULT_LIMIT_SIZE)]
    pub limit: usize,

    /// HTTP basic username
    #[arg(long, requires = "password")]
    pub username: Option<String>,

    /// HTTP basic password
    #[arg(long, env = "CANTATA_IMPORT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Bearer token
    #[arg(long, env = "CANTATA_IMPORT_TOKEN", hide_env_values = true, conflicts_with = "username")]
    pub token: Option<String>,
}

/// Run the import command.
pub async fn run(args: ImportArgs) -> Result<()> {
    let credentials = match (&args.username, &args.password, &args.token) {
        (Some(username), Some(password), _) => Some(Credentials::Basic {
            username: username.clone(),
            password: password.clone(),
        }),
        (_, _, Some(token)) => Some(Credentials::Bearer(token.clone())),
        _ => None,
    };
    let options = ProxyOptions::for_url(&args.url, credentials)?;
    let client = HttpClient::new(HttpClientConfig::default(), NetworkSwitch::new())?;
    let mut import = ImportComposerRepository::new(MetadataFetcher::new(Arc::new(client)), options)
        .with_limit(args.limit);
    if let Some(filter) = &args.filter {
        import = import
            .with_glob_filter(filter)
            .with_context(|| format!("invalid filter '{filter}'"))?;
    }

    let index = import
        .get_packages()
        .await
        .with_context(|| format!("failed to import {}", args.url))?;
    info!(
        url = %args.url,
        packages = index.packages.len(),
        truncated = index.truncated,
        "import finished"
    );
    println!("{}", serde_json::to_string_pretty(&index.packages)?);
    Ok(())
}
