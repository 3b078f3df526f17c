//! Simulate command implementation

use anyhow::{Context, Result};
use dca_risk_engine::daily_buy::informative_timeframe;
use dca_risk_engine::simulation::Simulator;
use dca_risk_engine::state_manager::open_trade_store;
use dca_risk_engine::{data, strategies, Config};
use std::path::PathBuf;
use tracing::{debug, info};

pub struct SimulateArgs {
    pub config_path: String,
    pub strategy: Option<String>,
    pub variant: Option<String>,
    pub balance: Option<f64>,
    pub data_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

pub fn run(args: SimulateArgs) -> Result<()> {
    info!("Starting simulation");

    // Load configuration
    let mut config = Config::from_file(&args.config_path)?;
    info!("Loaded configuration from: {}", args.config_path);

    // Apply overrides
    if let Some(strategy) = args.strategy {
        info!("Overriding strategy to: {}", strategy);
        config.strategy_name = strategy;
    }

    if let Some(variant) = args.variant {
        info!("Overriding variant to: {}", variant);
        config.set_strategy_param("variant", serde_json::json!(variant));
    }

    if let Some(balance) = args.balance {
        info!("Overriding starting balance to: {:.2}", balance);
        config.simulation.starting_balance = balance;
    }

    if let Some(dir) = args.data_dir {
        config.simulation.data_dir = dir;
    }

    let store = open_trade_store(&config.state).context("Failed to open trade store")?;
    info!("Creating strategy: {}", config.strategy_name);
    let strategy = strategies::create_strategy(&config, store)?;
    let timeframe = strategy.timeframe().to_string();

    // Load data
    let data_dir = config.simulation.data_dir.clone();
    info!("Loading {} data from: {}", timeframe, data_dir.display());
    let symbols = config.symbols();
    debug!("Symbols: {:?}", symbols);

    let primary = data::load_multi_symbol(&data_dir, &symbols, &timeframe)?;
    let informative_tfs: Vec<&str> = informative_timeframe(&timeframe).into_iter().collect();
    let informative = data::load_informative(&data_dir, &symbols, &informative_tfs)?;
    info!(
        "Loaded data for {} symbols ({} informative series)",
        primary.len(),
        informative.len()
    );

    let mut simulator = Simulator::new(strategy, config.simulation.clone(), config.min_stake());
    let result = simulator.run(primary, informative);
    let summary = result.summary();

    // Print results
    println!("\n{}", "=".repeat(60));
    println!("SIMULATION RESULTS ({} {})", config.strategy_name, timeframe);
    println!("{}", "=".repeat(60));
    println!("Starting Balance:   {:.2}", result.starting_balance);
    println!("Final Balance:      {:.2}", result.final_balance);
    println!("Total Return:       {:.2}%", summary.return_pct);
    println!("Max Drawdown:       {:.2}%", summary.max_drawdown_pct);
    println!("Total Trades:       {}", summary.total_trades);
    println!("Winning Trades:     {}", summary.winning_trades);
    println!("Win Rate:           {:.2}%", summary.win_rate);
    println!("Mean Profit:        {:.2}%", summary.mean_profit_ratio * 100.0);
    println!("Profit Std Dev:     {:.2}%", summary.std_profit_ratio * 100.0);
    println!("Averaging Entries:  {}", summary.averaging_events);
    println!("Fallback Decisions: {}", summary.fallback_decisions);
    println!("{}", "=".repeat(60));

    if let Some(path) = args.output {
        let report = serde_json::json!({ "summary": summary, "result": result });
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Report written to: {}", path.display());
    }

    info!("Simulation completed successfully");

    Ok(())
}
