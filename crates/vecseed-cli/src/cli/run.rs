use anyhow::{Context, Result};
use clap::Args;
use vecseed::pipeline::wait_for_service;
use vecseed::{Pipeline, SeedConfig};

#[derive(Args)]
pub struct RunArgs {
    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: RunArgs, config: SeedConfig) -> Result<()> {
    let client = super::connect(&config)?;
    let summary = Pipeline::new(client, config)
        .run()
        .await
        .context("Seeding run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", summary.report);
    println!(
        "Loaded {} rows into the primary collection in {} phase(s)",
        summary.primary.rows, summary.primary.phases
    );
    println!(
        "Searches: {} ok, {} failed",
        summary.activity.searches_ok, summary.activity.searches_failed
    );

    let failures: Vec<_> = summary.log.failures().collect();
    if !failures.is_empty() {
        println!("\nBest-effort steps that failed:");
        for record in failures {
            println!(
                "  [{}] {} '{}': {}",
                record.stage, record.step, record.target, record.outcome
            );
        }
    }
    Ok(())
}

pub async fn execute_wait(config: SeedConfig) -> Result<()> {
    let client = super::connect(&config)?;
    let ready = wait_for_service(client, &config)
        .await
        .with_context(|| format!("Service at {} is unavailable", config.service.uri))?;
    println!(
        "Service at {} ready after {} attempt(s)",
        config.service.uri,
        ready.attempts()
    );
    Ok(())
}
