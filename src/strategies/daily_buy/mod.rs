//! Daily Buy Strategy
//!
//! Long-only dip buyer that averages down into drawdowns. Entries fire when
//! price trades under the previous close of the next-higher timeframe; open
//! trades are averaged on resistance breakouts along a widening ladder of
//! drawdown thresholds, with a protective stop trailing each averaging entry.

pub mod averaging;
mod config;
pub mod exits;
mod strategy;

pub use config::{DailyBuyConfig, Variant, VARIANTS};
pub use strategy::DailyBuyStrategy;

use crate::host::TradeDataStore;
use crate::{Config, Strategy};
use anyhow::Result;

/// Registry name
pub const NAME: &str = "daily_buy";

/// Tag set on entry rows
pub const ENTRY_TAG: &str = "ALL_BUY";

/// Tag set on exit rows
pub const EXIT_TAG: &str = "macd_ema_exit";

/// Each trading timeframe and the next-higher timeframe used as informative
pub const TIMEFRAME_HIERARCHY: [(&str, &str); 7] = [
    ("1m", "5m"),
    ("5m", "15m"),
    ("15m", "1h"),
    ("1h", "4h"),
    ("4h", "1d"),
    ("1d", "1w"),
    ("1w", "1M"),
];

/// Next-higher timeframe, `None` for timeframes outside the hierarchy
pub fn informative_timeframe(timeframe: &str) -> Option<&'static str> {
    TIMEFRAME_HIERARCHY
        .iter()
        .find(|(tf, _)| *tf == timeframe)
        .map(|(_, informative)| *informative)
}

/// Create strategy from config (called by registry)
pub fn create(config: &Config, store: Box<dyn TradeDataStore>) -> Result<Box<dyn Strategy>> {
    let strategy_config = DailyBuyConfig::from_value(&config.strategy)?;
    Ok(Box::new(DailyBuyStrategy::new(
        strategy_config,
        config.min_stake(),
        store,
    )))
}
