//! `tracklab` CLI: run simulated scenarios through the estimators, replay run logs.

mod filters;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filters::{run_filter, FilterKind, RunConfig, RunSummary};
use sim::replay::{load_log, save_log, RunLog};
use sim::scenarios::{Scenario, ScenarioKind};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "tracklab", about = "Single-target state estimation workbench")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a named scenario, filter it and report metrics.
    Run {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Filter to evaluate
        #[arg(long, value_enum, default_value_t = FilterKind::Imm)]
        filter: FilterKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the generated run log
        #[arg(long)]
        save_log: Option<PathBuf>,
        /// Filter tuning as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Filter a previously saved run log.
    Replay {
        /// Path to run log JSON file
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = FilterKind::Imm)]
        filter: FilterKind,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Filter tuning as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { scenario, filter, seed, output, save_log: log_path, config } => {
            let cfg = load_config(config.as_deref())?;
            let log = Scenario::build(scenario, seed).generate()?;
            if let Some(path) = log_path.as_deref() {
                save_log(&log, path)?;
                println!("Run log saved to {}", path.display());
            }
            evaluate(&log, filter, &cfg, output.as_deref())?;
        }
        Commands::Replay { input, filter, output, config } => {
            let cfg = load_config(config.as_deref())?;
            let log = load_log(&input).with_context(|| format!("reading {}", input.display()))?;
            evaluate(&log, filter, &cfg, output.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cfg = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), "loaded filter config");
    Ok(cfg)
}

fn evaluate(
    log: &RunLog,
    filter: FilterKind,
    cfg: &RunConfig,
    output: Option<&Path>,
) -> Result<()> {
    println!(
        "Filtering '{}' (seed={}, {} samples, dt={}s) with {:?}...",
        log.scenario_name,
        log.seed,
        log.measurements.len(),
        log.dt,
        filter
    );

    let start = std::time::Instant::now();
    let RunSummary { metrics, description, final_state } = run_filter(filter, log, cfg)?;
    let elapsed = start.elapsed();

    println!("{}", description.trim_end());
    println!(
        "Done: RMSE pos={:.2} m, vel={:.2} m/s, max pos err={:.2} m, elapsed={:.3}s",
        metrics.rmse_position(),
        metrics.rmse_velocity(),
        metrics.max_pos_err,
        elapsed.as_secs_f64(),
    );

    if let Some(path) = output {
        let json = serde_json::json!({
            "scenario": log.scenario_name,
            "seed": log.seed,
            "filter": filter,
            "samples": metrics.n_samples,
            "rmse_position": metrics.rmse_position(),
            "rmse_velocity": metrics.rmse_velocity(),
            "max_position_error": metrics.max_pos_err,
            "final_state": final_state.as_slice(),
            "elapsed_s": elapsed.as_secs_f64(),
        });
        std::fs::write(path, serde_json::to_string_pretty(&json)?)?;
        println!("Metrics saved to {}", path.display());
    }

    Ok(())
}
