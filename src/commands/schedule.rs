//! Schedule command: preview the averaging order schedule and ladder

use anyhow::Result;
use dca_risk_engine::daily_buy::DailyBuyConfig;
use dca_risk_engine::Config;
use itertools::Itertools;
use tracing::{info, warn};

pub struct ScheduleArgs {
    pub config_path: String,
    pub total: f64,
    pub currencies: Option<usize>,
    pub steps: Option<usize>,
    pub increment: Option<f64>,
    pub min_stake: Option<f64>,
    /// Free capital used for the ladder preview
    pub free_capital: f64,
}

pub fn run(args: ScheduleArgs) -> Result<()> {
    let config = Config::from_file(&args.config_path)?;
    info!("Loaded configuration from: {}", args.config_path);
    let mut cfg = DailyBuyConfig::from_value(&config.strategy)?;

    // Apply overrides
    if let Some(currencies) = args.currencies {
        cfg.concurrent_pairs = currencies;
    }
    if let Some(steps) = args.steps {
        cfg.max_dca_count = steps;
    }
    if let Some(increment) = args.increment {
        cfg.dca_inc = increment;
    }
    let min_stake = args.min_stake.unwrap_or_else(|| config.min_stake());

    let decision = cfg.order_schedule(args.total, min_stake);
    if let Some(reason) = decision.reason() {
        warn!("Schedule fell back to the seed series: {}", reason);
    }
    let orders = decision.value();
    let per_currency: f64 = orders.iter().sum();

    println!("\n{}", "=".repeat(60));
    println!("ORDER SCHEDULE (x{:.2} per step)", cfg.dca_inc);
    println!("{}", "=".repeat(60));
    println!(
        "Orders:             {}",
        orders.iter().map(|o| format!("{:.2}", o)).join(", ")
    );
    println!("Per Currency:       {:.2}", per_currency);
    println!(
        "All Currencies:     {:.2} of {:.2}",
        per_currency * cfg.concurrent_pairs as f64,
        args.total
    );

    println!("\n{}", "-".repeat(60));
    println!("AVERAGING LADDER (free capital {:.2})", args.free_capital);
    println!("{}", "-".repeat(60));
    println!("{:>6} {:>12} {:>12} {:>12}", "Level", "Trigger", "Amount", "Next");

    let ladder = cfg.dca_ladder();
    let mut threshold = ladder.initial_threshold();
    for _ in 0..=cfg.max_dca_count {
        let step = ladder.next_step(args.free_capital, threshold)?;
        println!(
            "{:>6} {:>11.2}% {:>12.2} {:>11.2}%",
            step.level,
            threshold * 100.0,
            step.amount,
            step.new_threshold * 100.0
        );
        threshold = step.new_threshold;
    }
    println!("{}", "=".repeat(60));

    Ok(())
}
