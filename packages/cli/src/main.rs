#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch CLI for school closure risk projections.
//!
//! `closure_risk run` reads an institution directory and the demographic
//! and participation inputs named in a TOML run config, composes every
//! scenario, scores closure risk per geography and target year, and writes
//! `projections.json` plus `run_summary.json`.
//!
//! Uses `indicatif-log-bridge` (via [`closure_risk_cli_utils::init_logger`])
//! so that log lines and progress bars never fight for the terminal.

mod config;
mod error;
mod inputs;
mod output;
mod paths;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use closure_risk_risk::presets;

use crate::config::RunConfig;
use crate::error::PipelineError;

#[derive(Parser)]
#[command(name = "closure_risk", about = "School closure risk projections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write projections
    Run {
        /// Path to the run config (TOML)
        #[arg(long)]
        config: PathBuf,
        /// Output directory (overrides `output_dir` in the config)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Aggregate the population extract only
    Aggregate {
        /// Path to the run config (TOML)
        #[arg(long)]
        config: PathBuf,
        /// Output file (default: `aggregates.json` in the output directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a run config and its closure model without reading data
    Check {
        /// Path to the run config (TOML)
        #[arg(long)]
        config: PathBuf,
    },
    /// List the embedded closure model presets
    Presets,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = closure_risk_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output_dir } => {
            let run_config = RunConfig::load(&config)?;
            let output = pipeline::run(&run_config, &multi)?;
            let dir = run_config.output_dir(output_dir.as_deref());
            output::write_run(&dir, &output, &config)?;
            log::info!(
                "Done: {} geographies scored, {} excluded",
                output.results.len(),
                output.excluded.len()
            );
        }
        Commands::Aggregate { config, output } => {
            let run_config = RunConfig::load(&config)?;
            let report = pipeline::aggregate_population(&run_config, &multi)?;
            let path = output
                .unwrap_or_else(|| run_config.output_dir(None).join("aggregates.json"));
            output::write_aggregates(&path, &report)?;
        }
        Commands::Check { config } => {
            let run_config = RunConfig::load(&config)?;
            run_config.validate()?;
            let model = run_config.model.load()?;
            println!("{}: OK", config.display());
            println!(
                "  model {} ({} buckets, {} rules)",
                model.name(),
                model.buckets().len(),
                model.rules().len()
            );
            println!("  target years {:?}", run_config.years());
            println!("  demographic entries {}", run_config.demographic.len());
            println!(
                "  participation entries {}",
                run_config
                    .participation
                    .as_ref()
                    .map_or(1, |p| p.entries.len())
            );
        }
        Commands::Presets => {
            println!("{:<14} DESCRIPTION", "NAME");
            println!("{}", "-".repeat(60));
            for model in presets::all_presets() {
                println!("{:<14} {}", model.name(), model.definition().description);
            }
        }
    }

    Ok(())
}
