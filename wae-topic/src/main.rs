use anyhow::Result;
use clap::Parser;
use wae_topic::cli::{check_model, prior_mmd, sample_prior, Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::SamplePrior(args) => {
            sample_prior::run(args)?;
        }
        Commands::PriorMmd(args) => {
            prior_mmd::run(args)?;
        }
        Commands::CheckModel(args) => {
            check_model::run(args)?;
        }
    }

    Ok(())
}
