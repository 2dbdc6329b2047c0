use anyhow::Result;
use vecseed::SeedConfig;

pub fn execute(config: SeedConfig) -> Result<()> {
    print!("{}", config.redacted().to_toml()?);
    Ok(())
}
