mod cache;
mod classifier;
mod config;
mod detectors;
mod error;
mod executor;
mod fingerprint;
mod git;
mod heads;
mod input;
mod logger;
mod oracle;
mod orchestrator;
mod report;
mod state;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use crate::error::Result;

#[derive(Parser)]
#[command(
    name = "mergesift",
    version,
    about = "Batch merge analyzer: finds merges worth testing and reports why."
)]
struct Cli {
    #[arg(long, global = true, help = "TOML config file (default: <config dir>/mergesift/config.toml)")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false, help = "Debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Classify every merge and write per-repository reports
    Analyze(orchestrator::AnalyzeArgs),
    /// Add the current head commit to a repository list
    HeadHashes(heads::HeadHashesArgs),
}

fn run(cli: Cli) -> Result<()> {
    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        CliCommand::Analyze(args) => {
            orchestrator::run(args, &config)?;
        }
        CliCommand::HeadHashes(args) => heads::run(args, &config)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
