mod config;
mod run;
mod summary;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use vecseed::{MilvusClient, SeedConfig, VectorDbClient};

#[derive(Parser)]
#[command(name = "vecseed")]
#[command(about = "Seed a Milvus-compatible vector database with a known fixture topology", long_about = None)]
pub struct Cli {
    /// Enable verbose output (debug logs)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Service URI, overriding configuration
    #[arg(long, global = true, env = "MILVUS_URI")]
    pub uri: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wait for the service, provision every fixture and print the summary
    Run(run::RunArgs),

    /// Wait until the service answers, then exit
    Wait,

    /// Print the current state of the service without changing it
    Summary(summary::SummaryArgs),

    /// Print the effective configuration as TOML
    Config,
}

/// Layered configuration plus command-line overrides
pub(crate) fn load_config(cli: &Cli) -> Result<SeedConfig> {
    let mut config = SeedConfig::load(cli.config.as_deref())?;
    if let Some(uri) = &cli.uri {
        config.service.uri = uri.clone();
    }
    Ok(config)
}

pub(crate) fn connect(config: &SeedConfig) -> Result<Arc<dyn VectorDbClient>> {
    let client = MilvusClient::new(&config.service)
        .with_context(|| format!("Failed to create client for {}", config.service.uri))?;
    tracing::debug!("Using service at {}", config.service.uri);
    Ok(Arc::new(client))
}

/// Execute the CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Run(args) => run::execute(args, config).await,
        Commands::Wait => run::execute_wait(config).await,
        Commands::Summary(args) => summary::execute(args, config).await,
        Commands::Config => config::execute(config),
    }
}
