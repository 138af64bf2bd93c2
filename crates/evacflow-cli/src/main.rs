//! Evacflow CLI
//!
//! Operator tool over a configuration data directory.
//!
//! # Commands
//!
//! - `simulate`: Run one scenario over one region and print the response JSON
//! - `scenarios`: List loaded scenarios as JSON
//! - `regions`: List loaded regions
//!
//! Exit codes: 1 for a rejected request, 2 when the data directory cannot be
//! loaded, 3 when the run failed upstream or exhausted its solve budget.

use clap::{Parser, Subcommand};
use evacflow_core::engine::{Engine, EngineConfig, SimulationError};
use evacflow_data::{DataLoadError, load_config};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

/// Evacuation capacity simulator for regional road networks.
#[derive(Parser)]
#[command(name = "evacflow")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DataArgs {
    /// Directory holding regions, scenarios and segments files.
    #[arg(long, env = "EVACFLOW_DATA")]
    data: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario over a region and print the result
    Simulate {
        #[command(flatten)]
        data: DataArgs,
        /// Scenario id, exactly as configured.
        #[arg(long)]
        scenario: String,
        /// Region name, case-insensitive.
        #[arg(long)]
        region: String,
        /// Wall-clock budget for the solver, in milliseconds.
        #[arg(long, default_value_t = 5000)]
        solve_timeout_ms: u64,
        /// Cap on augmenting paths per solve.
        #[arg(long)]
        max_augmentations: Option<u64>,
    },
    /// List configured scenarios
    Scenarios {
        #[command(flatten)]
        data: DataArgs,
    },
    /// List configured regions
    Regions {
        #[command(flatten)]
        data: DataArgs,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Load(#[from] DataLoadError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Simulation(e) if e.is_input_error() => 1,
            Self::Load(_) => 2,
            Self::Simulation(_) | Self::Render(_) => 3,
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn load_engine(data: &DataArgs, config: EngineConfig) -> Result<Engine, CliError> {
    let loaded = load_config(&data.data)?;
    Ok(loaded.into_engine("segments", config))
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Simulate {
            data,
            scenario,
            region,
            solve_timeout_ms,
            max_augmentations,
        } => {
            let solve_timeout = Duration::from_millis(solve_timeout_ms);
            let config = EngineConfig {
                solve_timeout,
                max_augmentations,
                follower_wait: solve_timeout + Duration::from_secs(1),
                ..EngineConfig::default()
            };
            let engine = load_engine(&data, config)?;
            let result = engine.simulate(&scenario, &region)?;
            if result.skipped_segments > 0 {
                info!(skipped = result.skipped_segments, "segments skipped during build");
            }
            println!("{}", serde_json::to_string_pretty(&result.to_response())?);
        }
        Commands::Scenarios { data } => {
            let engine = load_engine(&data, EngineConfig::default())?;
            let scenarios: Vec<_> = engine.scenarios().collect();
            println!("{}", serde_json::to_string_pretty(&scenarios)?);
        }
        Commands::Regions { data } => {
            let engine = load_engine(&data, EngineConfig::default())?;
            for region in engine.regions() {
                println!(
                    "{}\tazimuth={}\tpopulation={}",
                    region.name, region.evacuation_azimuth_deg, region.population
                );
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "evacflow failed");
            ExitCode::from(e.exit_code())
        }
    }
}
