use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use xray::{
    commands::{run, summarize},
    context::AppContext,
};

const DEFAULT_ROWS_FILE: &str = "data/screened-rows.json";

#[derive(Parser)]
#[command(name = "xray")]
#[command(about = "Category backtest statistics for screened scan results")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest every category and report growth of 10k and win rates
    Run {
        /// Path to the screened rows JSON file
        #[arg(long = "input", value_name = "PATH")]
        input: Option<PathBuf>,
        /// Directory to write the JSON report into
        #[arg(short, long = "output", value_name = "DIR")]
        output: Option<PathBuf>,
        /// Comma separated list of horizons in periods
        #[arg(long, value_delimiter = ',')]
        horizons: Vec<u32>,
        /// Seconds to wait for category tasks
        #[arg(long)]
        timeout_secs: Option<f64>,
        /// Stop waiting once this percentage of categories has finished
        #[arg(long)]
        min_completion_percent: Option<f64>,
        /// Simulate a one-unit portfolio per category
        #[arg(long)]
        simulate_portfolio: bool,
        /// Upper bound on worker threads
        #[arg(long)]
        max_workers: Option<usize>,
        /// Treat the scan as a sell signal (a falling price is a win)
        #[arg(long)]
        sell_signal: bool,
        /// Ignore horizons longer than this many periods
        #[arg(long)]
        max_backtest_period: Option<u32>,
        /// Hide progress bars
        #[arg(long)]
        no_progress: bool,
    },
    /// Print win rates per category
    Summarize {
        /// Path to the screened rows JSON file
        #[arg(long = "input", value_name = "PATH")]
        input: Option<PathBuf>,
        /// Treat the scan as a sell signal (a falling price is a win)
        #[arg(long)]
        sell_signal: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app_context = AppContext::from_env();

    info!("Starting xray. Past performance of a scan does not predict future results.");

    match command {
        Commands::Run {
            input,
            output,
            horizons,
            timeout_secs,
            min_completion_percent,
            simulate_portfolio,
            max_workers,
            sell_signal,
            max_backtest_period,
            no_progress,
        } => {
            let overrides = run::RunOverrides {
                horizons,
                timeout_secs,
                min_completion_percent,
                simulate_portfolio,
                max_workers,
                sell_signal,
                max_backtest_period,
                no_progress,
            };
            run::run(&app_context, &resolve_rows_path(input), output, &overrides)?;
        }
        Commands::Summarize { input, sell_signal } => {
            summarize::run(&app_context, &resolve_rows_path(input), sell_signal)?;
        }
    }

    Ok(())
}

fn resolve_rows_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_ROWS_FILE)
}
