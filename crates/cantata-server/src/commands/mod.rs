//! CLI commands for Cantata.

pub mod check_config;
pub mod import;
pub mod serve;
pub mod sync;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Cantata - a caching proxy and mirror for Composer repositories
#[derive(Parser, Debug)]
#[command(name = "cantata")]
#[command(author = "Cantata Contributors")]
#[command(version)]
#[command(about = "A caching proxy and mirror for Composer repositories", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Configuration file (default: ./cantata.json)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Increase the verbosity of messages: -v for info, -vv for debug, -vvv for trace
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable
    Text,
    /// One JSON object per line
    Json,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and the background sync scheduler
    Serve(serve::ServeArgs),

    /// Sync mirrors once and exit
    Sync(sync::SyncArgs),

    /// Crawl a Composer repository and print its source URL index
    Import(import::ImportArgs),

    /// Validate the configuration and exit
    CheckConfig(check_config::CheckConfigArgs),
}
