use anyhow::Result;
use backtest_engine::commands::{backtest, sweep, walk_forward};
use backtest_engine::config::DEFAULT_TRAIN_RATIO;
use backtest_engine::models::parse_parameter_map_from_json;
use clap::{Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "An event-driven equity backtest and parameter sweep engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a strategy over a market data snapshot
    Backtest {
        /// Strategy template to run
        template_id: String,
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Strategy and engine parameters as a JSON object
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
        /// Write the JSON report here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Train/test split validation of a single parameter set
    WalkForward {
        /// Strategy template to run
        template_id: String,
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Strategy and engine parameters as a JSON object
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
        /// Fraction of bars assigned to the training segment
        #[arg(long, default_value_t = DEFAULT_TRAIN_RATIO)]
        train_ratio: f64,
        /// Write the JSON report here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Grid search over parameter combinations, ranked by Sharpe ratio
    Sweep {
        /// Strategy template to run
        template_id: String,
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Grid axes as a JSON object of value arrays
        #[arg(long, value_name = "JSON")]
        grid: String,
        /// Fixed parameters applied to every combination
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
        /// Validate each combination out of sample and rank on the test segment
        #[arg(long)]
        walk_forward: bool,
        /// Fraction of bars assigned to the training segment
        #[arg(long, default_value_t = DEFAULT_TRAIN_RATIO)]
        train_ratio: f64,
        /// How many ranked results to report
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Write the JSON report here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn parse_params(raw: Option<&str>) -> Result<HashMap<String, f64>> {
    match raw {
        Some(json) => parse_parameter_map_from_json(json),
        None => Ok(HashMap::new()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("Starting backtest engine. Simulated results are not a promise of live performance.");

    match cli.command {
        Commands::Backtest {
            template_id,
            data_file,
            params,
            output,
        } => {
            let parameters = parse_params(params.as_deref())?;
            backtest::run(&data_file, &template_id, parameters, output.as_deref())?;
        }
        Commands::WalkForward {
            template_id,
            data_file,
            params,
            train_ratio,
            output,
        } => {
            let parameters = parse_params(params.as_deref())?;
            walk_forward::run(
                &data_file,
                &template_id,
                parameters,
                train_ratio,
                output.as_deref(),
            )?;
        }
        Commands::Sweep {
            template_id,
            data_file,
            grid,
            params,
            walk_forward,
            train_ratio,
            top,
            output,
        } => {
            let parameters = parse_params(params.as_deref())?;
            let ratio = walk_forward.then_some(train_ratio);
            sweep::run(
                &data_file,
                &template_id,
                parameters,
                &grid,
                ratio,
                top,
                output.as_deref(),
            )?;
        }
    }

    Ok(())
}
