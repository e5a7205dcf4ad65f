//! Mirrorleaf CLI - Inspector for the local replica database
//!
//! Provides commands for:
//! - Rendering the tree of a stored or given remote snapshot
//! - Listing and clearing cached file content
//! - Showing the edit history timeline of a file
//! - Viewing, editing and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mirrorleaf_core::config::Config;

mod commands;
mod output;

use commands::{
    cache::CacheCommand, completions::CompletionsCommand, config::ConfigCommand,
    history::HistoryCommand, tree::TreeCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "mirrorleaf",
    version,
    about = "Inspect the local replica of a remote file tree"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Render the file tree
    Tree(TreeCommand),
    /// Inspect or clear cached content
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Show the edit history of a file
    History(HistoryCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// Filter directive: `-v` flags win over the configured level
fn log_directive(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    let directive = log_directive(cli.verbose, &config.logging.level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Tree(cmd) => cmd.execute(&config, format).await,
        Commands::Cache(cmd) => cmd.execute(&config, format).await,
        Commands::History(cmd) => cmd.execute(&config, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
        Commands::Completions(cmd) => cmd.execute(format).await,
    }
}
