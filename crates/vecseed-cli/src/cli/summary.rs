use anyhow::{Context, Result};
use clap::Args;
use vecseed::{SeedConfig, SummaryReporter};

#[derive(Args)]
pub struct SummaryArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: SummaryArgs, config: SeedConfig) -> Result<()> {
    let client = super::connect(&config)?;
    client
        .use_database(&config.service.database)
        .await
        .with_context(|| format!("Failed to select database {}", config.service.database))?;

    let report = SummaryReporter::new(client)
        .summarize()
        .await
        .context("Failed to read service state")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}
