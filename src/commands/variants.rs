//! Variants command: list registered strategies and timeframe presets

use dca_risk_engine::daily_buy::{informative_timeframe, VARIANTS};
use dca_risk_engine::strategies;

pub fn run() {
    println!("\nStrategies: {}", strategies::available_strategies().join(", "));

    println!("\n{}", "=".repeat(48));
    println!("{:<10} {:<10} {:<14} {:>10}", "Variant", "Timeframe", "Informative", "Lev. cap");
    println!("{}", "-".repeat(48));
    for variant in VARIANTS.iter() {
        println!(
            "{:<10} {:<10} {:<14} {:>10.1}",
            variant.name,
            variant.timeframe,
            informative_timeframe(variant.timeframe).unwrap_or("-"),
            variant.leverage_cap
        );
    }
    println!("{}", "=".repeat(48));
}
