//! Crossover bot - main entry point
//!
//! Three subcommands:
//! - backtest: run the crossover strategy over historical CSV data
//! - live: run the live trading loop (paper or real)
//! - trades: query the persisted trade log

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "crossover-bot")]
#[command(about = "Risk-managed crossover trading bot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the strategy over historical data
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/config.json")]
        config: String,

        /// Initial capital (overrides config file)
        #[arg(long)]
        capital: Option<f64>,

        /// Symbols to test (comma-separated, overrides config file)
        #[arg(short, long)]
        symbols: Option<String>,
    },

    /// Run live trading
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/config.json")]
        config: String,

        /// Live trading mode (CAUTION - REAL MONEY!). Paper otherwise.
        #[arg(long)]
        live: bool,

        /// Cycle interval in seconds (overrides config file)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Query the trade log
    Trades {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/config.json")]
        config: String,

        /// Filter by symbol (exact match)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Start date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Live { .. } => "live",
        Commands::Trades { .. } => "trades",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest {
            config,
            capital,
            symbols,
        } => commands::backtest::run(config, capital, symbols),

        Commands::Live {
            config,
            live,
            interval,
        } => commands::live::run(config, live, interval),

        Commands::Trades {
            config,
            symbol,
            start,
            end,
        } => commands::trades::run(config, symbol, start, end),
    }
}
