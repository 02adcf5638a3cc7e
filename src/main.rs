//! CLI Entry Point for charge-cycler
//!
//! Provides command-line interface for:
//! - Running a charge/discharge cycling protocol (`run`)
//! - Checking a configuration without touching an instrument (`check`)
//!
//! # Usage
//!
//! Dry run against the simulated potentiostat, 60x faster than real time:
//! ```bash
//! charge-cycler run --config config/charge_hybrid.toml --simulate --speedup 60
//! ```
//!
//! Show the effective configuration:
//! ```bash
//! charge-cycler check --config config/charge_hybrid.toml --max-repeats 5
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Result};
use charge_cycler::config::{ConfigOverrides, RunConfig};
use charge_cycler::hardware::mock::SimulatedPotentiostat;
use charge_cycler::procedures::CycleController;
use charge_cycler::{logging, CyclerError};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "charge-cycler")]
#[command(about = "Galvanostatic charge/discharge cycling with hybrid measurements", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cycling protocol
    Run {
        /// Run configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the simulated potentiostat
        #[arg(long)]
        simulate: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Simulation speed-up factor
        #[arg(long, default_value_t = 1.0)]
        speedup: f64,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Load and validate a configuration, then print it
    Check {
        /// Run configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

/// Command-line overrides, applied over file and environment.
#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Maximum number of hybrid cycles
    #[arg(long)]
    max_repeats: Option<u32>,

    /// Overall duration budget (s)
    #[arg(long)]
    duration: Option<f64>,

    /// Low voltage stop bound (V)
    #[arg(long, allow_negative_numbers = true)]
    stop_v_min: Option<f64>,

    /// High voltage stop bound (V)
    #[arg(long, allow_negative_numbers = true)]
    stop_v_max: Option<f64>,

    /// Run the potentiostatic voltage finish
    #[arg(long)]
    voltage_finish: bool,

    /// Finish voltage (V)
    #[arg(long, allow_negative_numbers = true)]
    finish_v: Option<f64>,

    /// Conditioning duration (s)
    #[arg(long)]
    condition_time: Option<f64>,

    /// Trace directory
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Base name for trace files
    #[arg(long)]
    file_suffix: Option<String>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        let mut overrides = ConfigOverrides::default();
        if let Some(n) = args.max_repeats {
            overrides = overrides.max_repeats(n);
        }
        if let Some(seconds) = args.duration {
            overrides = overrides.duration(seconds);
        }
        if let Some(volts) = args.stop_v_min {
            overrides = overrides.stop_v_min(volts);
        }
        if let Some(volts) = args.stop_v_max {
            overrides = overrides.stop_v_max(volts);
        }
        if args.voltage_finish {
            overrides = overrides.voltage_finish(true);
        }
        if let Some(volts) = args.finish_v {
            overrides = overrides.finish_v(volts);
        }
        if let Some(seconds) = args.condition_time {
            overrides = overrides.condition_time(seconds);
        }
        if let Some(path) = args.data_path {
            overrides = overrides.data_path(path);
        }
        if let Some(suffix) = args.file_suffix {
            overrides = overrides.file_suffix(suffix);
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            simulate,
            json,
            speedup,
            overrides,
        } => run(config, simulate, json, speedup, overrides.into()).await,
        Commands::Check { config, overrides } => check(config, overrides.into()),
    }
}

fn load(path: Option<PathBuf>, overrides: &ConfigOverrides) -> Result<RunConfig> {
    let config = RunConfig::load(path.as_deref(), overrides)?;
    config.validate()?;
    Ok(config)
}

async fn run(
    path: Option<PathBuf>,
    simulate: bool,
    json: bool,
    speedup: f64,
    overrides: ConfigOverrides,
) -> Result<()> {
    let config = load(path, &overrides)?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    if !simulate {
        return Err(CyclerError::Configuration(
            "no instrument driver is available in this build; pass --simulate for a dry run"
                .to_string(),
        )
        .into());
    }

    tracing::info!(speedup, "Using simulated potentiostat");
    let pstat = Arc::new(SimulatedPotentiostat::new().with_time_scale(speedup));
    let mut controller = CycleController::new(config, pstat)?;
    let report = controller.run().await?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

fn check(path: Option<PathBuf>, overrides: ConfigOverrides) -> Result<()> {
    let config = load(path, &overrides)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
