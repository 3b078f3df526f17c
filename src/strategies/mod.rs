//! Trading Strategies Module
//!
//! Strategy framework with:
//! - The callback interface the host drives once per candle and per open trade
//! - Dynamic strategy registry (no hardcoded names)
//! - Automatic strategy discovery via registration

pub mod daily_buy;

use crate::frame::AnalyzedFrame;
use crate::host::{DataProvider, TradeDataStore, Wallet};
use crate::{Candle, ClosedTrade, Config, Decision, OpenTrade, Symbol};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

// =============================================================================
// Callback inputs
// =============================================================================

/// Inputs of the leverage callback
#[derive(Debug, Clone)]
pub struct LeverageRequest<'a> {
    pub pair: &'a Symbol,
    pub current_time: DateTime<Utc>,
    pub current_rate: f64,
    pub proposed_leverage: f64,
    /// Exchange ceiling for this pair
    pub max_leverage: f64,
    pub entry_tag: Option<&'a str>,
}

/// Market state handed to the position-adjustment callback
#[derive(Debug, Clone, Copy)]
pub struct AdjustmentContext {
    pub current_time: DateTime<Utc>,
    pub current_rate: f64,
    /// Unrealized profit ratio at `current_rate`
    pub current_profit: f64,
    pub min_stake: Option<f64>,
    pub max_stake: f64,
}

// =============================================================================
// Strategy Trait - The contract all strategies must implement
// =============================================================================

/// Trading strategy trait.
///
/// The host calls the populate methods once per new candle, then the trade
/// callbacks for every open trade. Callbacks never return errors: degraded
/// paths come back as [`Decision::Fallback`].
pub trait Strategy: Send + Sync {
    /// Strategy identifier (must match config's strategy_name)
    fn name(&self) -> &'static str;

    /// Primary timeframe the strategy trades on
    fn timeframe(&self) -> &str;

    /// Extra (pair, timeframe) series the host should keep loaded
    fn informative_pairs(&self, _whitelist: &[Symbol]) -> Vec<(Symbol, String)> {
        vec![]
    }

    /// Derive indicator columns for the pair's candles
    fn populate_indicators(&mut self, pair: &Symbol, candles: &[Candle]) -> AnalyzedFrame;

    /// Mark entry rows
    fn populate_entry_trend(&self, frame: &mut AnalyzedFrame, data: &dyn DataProvider);

    /// Mark exit rows
    fn populate_exit_trend(&self, frame: &mut AnalyzedFrame);

    /// Leverage for a new entry, within `[0, max_leverage]`
    fn leverage(&self, request: &LeverageRequest<'_>) -> Decision<f64>;

    /// Stake for a new entry
    fn custom_stake_amount(&self, proposed_stake: f64, wallet: &dyn Wallet) -> Decision<f64>;

    /// Additional stake to add to an open trade, `None` for no action
    fn adjust_trade_position(
        &mut self,
        trade: &OpenTrade,
        ctx: &AdjustmentContext,
        data: &dyn DataProvider,
        wallet: &dyn Wallet,
    ) -> Decision<Option<f64>>;

    /// Strategy-driven exit reason for an open trade
    fn custom_exit(&self, trade: &OpenTrade, current_rate: f64, current_profit: f64)
        -> Option<String>;

    /// Last word on a proposed exit; `false` keeps the trade open
    fn confirm_trade_exit(&mut self, trade: &OpenTrade, exit_reason: &str, rate: f64) -> bool;

    /// Notification when a trade is closed
    fn notify_trade(&mut self, trade: &ClosedTrade) {
        tracing::debug!(
            pair = %trade.pair,
            profit = trade.profit_abs,
            profit_pct = %format!("{:.2}%", trade.profit_ratio * 100.0),
            reason = %trade.exit_reason,
            "Trade closed"
        );
    }

    /// Initialize strategy (called once before trading starts)
    fn init(&mut self) {}
}

// =============================================================================
// Strategy Factory - Type alias for strategy constructor functions
// =============================================================================

/// Factory function type for creating strategies from config and a trade store
pub type StrategyFactory = fn(&Config, Box<dyn TradeDataStore>) -> Result<Box<dyn Strategy>>;

// =============================================================================
// Strategy Registry - Dynamic registration without hardcoding
// =============================================================================

/// Global strategy registry
static REGISTRY: OnceLock<RwLock<HashMap<&'static str, StrategyFactory>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<HashMap<&'static str, StrategyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(daily_buy::NAME, daily_buy::create as StrategyFactory);
        RwLock::new(map)
    })
}

/// Create a strategy from configuration
pub fn create_strategy(
    config: &Config,
    store: Box<dyn TradeDataStore>,
) -> Result<Box<dyn Strategy>> {
    let factory = {
        let registry = get_registry().read().unwrap_or_else(|e| e.into_inner());

        let strategy_name = config.strategy_name();
        *registry.get(strategy_name).ok_or_else(|| {
            let mut available: Vec<_> = registry.keys().copied().collect();
            available.sort_unstable();
            anyhow::anyhow!(
                "Unknown strategy: '{}'. Available: {}",
                strategy_name,
                available.join(", ")
            )
        })?
    };

    factory(config, store)
}

/// Get list of available strategy names
pub fn available_strategies() -> Vec<&'static str> {
    let mut names: Vec<_> = get_registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .keys()
        .copied()
        .collect();
    names.sort_unstable();
    names
}

/// Register a new strategy (for plugins or testing)
pub fn register_strategy(name: &'static str, factory: StrategyFactory) {
    get_registry()
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(name, factory);
}
