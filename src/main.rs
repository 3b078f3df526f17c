//! DCA risk engine - main entry point
//!
//! This binary provides three subcommands:
//! - simulate: Replay CSV candles through a strategy with a paper wallet
//! - schedule: Preview the averaging order schedule and threshold ladder
//! - variants: List registered strategies and timeframe variants

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "dca-engine")]
#[command(about = "Position averaging and risk sizing engine with paper simulation", long_about = None)]
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
    /// Replay historical candles through the strategy
    Simulate {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/daily_buy.json")]
        config: String,

        /// Strategy name (overrides config file)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Timeframe variant (overrides config file)
        #[arg(long)]
        variant: Option<String>,

        /// Starting balance
        #[arg(long)]
        balance: Option<f64>,

        /// Directory with CSV candle files
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Write trades and summary as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the averaging order schedule and ladder
    Schedule {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/daily_buy.json")]
        config: String,

        /// Capital to spread across all currencies
        #[arg(long, default_value = "10000")]
        total: f64,

        /// Currencies traded concurrently (overrides config file)
        #[arg(long)]
        currencies: Option<usize>,

        /// Averaging steps after the initial order (overrides config file)
        #[arg(long)]
        steps: Option<usize>,

        /// Growth factor between consecutive orders (overrides config file)
        #[arg(long)]
        increment: Option<f64>,

        /// Smallest order the exchange accepts (overrides config file)
        #[arg(long)]
        min_stake: Option<f64>,

        /// Free capital for the ladder preview
        #[arg(long, default_value = "1000")]
        free_capital: f64,
    },

    /// List strategies and timeframe variants
    Variants,
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // File appender
    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // File layer - same format but without ANSI colors
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
        Commands::Simulate { .. } => "simulate",
        Commands::Schedule { .. } => "schedule",
        Commands::Variants => "variants",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Simulate {
            config,
            strategy,
            variant,
            balance,
            data_dir,
            output,
        } => commands::simulate::run(commands::simulate::SimulateArgs {
            config_path: config,
            strategy,
            variant,
            balance,
            data_dir,
            output,
        }),

        Commands::Schedule {
            config,
            total,
            currencies,
            steps,
            increment,
            min_stake,
            free_capital,
        } => commands::schedule::run(commands::schedule::ScheduleArgs {
            config_path: config,
            total,
            currencies,
            steps,
            increment,
            min_stake,
            free_capital,
        }),

        Commands::Variants => {
            commands::variants::run();
            Ok(())
        }
    }
}
