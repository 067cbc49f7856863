//! Check-config command implementation.

use anyhow::Result;
use cantata_config::{ConfigLoader, Severity, validate};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the check-config command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Run the check-config command. Returns whether the configuration is usable.
pub fn run(config: Option<PathBuf>, args: &CheckConfigArgs) -> Result<bool> {
    let loader = ConfigLoader::new(config);
    let (path, _) = loader.config_path();
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            return Ok(false);
        }
    };

    let warnings: Vec<_> = validate(&config)
        .into_iter()
        .filter(|issue| issue.severity == Severity::Warning)
        .collect();
    for warning in &warnings {
        println!("warning: {warning}");
    }
    println!(
        "{}: ok ({} mirror{}, listen {})",
        path.display(),
        config.mirrors.len(),
        if config.mirrors.len() == 1 { "" } else { "s" },
        config.listen
    );
    Ok(!(args.strict && !warnings.is_empty()))
}
