//! Host-side services consumed by the engine
//!
//! The host owns candles, balances and per-trade storage. The engine only sees
//! them through these traits so that a live adapter, the paper simulator or a
//! test double can stand behind them.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::EngineResult;
use crate::frame::AnalyzedFrame;
use crate::{Candle, Symbol, TradeId};

/// Per-trade key holding the averaging entry prices (`Vec<f64>`)
pub const DCA_KEY: &str = "DCA";

/// Per-trade key holding the protective stop price (`f64`)
pub const SL_KEY: &str = "SL";

/// Candle and indicator access
pub trait DataProvider {
    /// Latest analyzed frame for the pair/timeframe, if the host has one
    fn analyzed_frame(&self, pair: &Symbol, timeframe: &str) -> Option<&AnalyzedFrame>;

    /// Raw candles for the pair/timeframe; empty when none are available
    fn pair_candles(&self, pair: &Symbol, timeframe: &str) -> &[Candle];

    /// Pairs currently tradable
    fn whitelist(&self) -> Vec<Symbol>;
}

/// Wallet balance access
pub trait Wallet {
    /// Total stake-currency balance, including stake locked in open trades
    fn total_stake_amount(&self) -> EngineResult<f64>;

    /// Stake-currency balance free for new orders
    fn available_stake_amount(&self) -> EngineResult<f64>;
}

/// Key/value storage scoped to a single trade
pub trait TradeDataStore: Send + Sync {
    fn get(&self, trade_id: TradeId, key: &str) -> EngineResult<Option<Value>>;

    fn set(&mut self, trade_id: TradeId, key: &str, value: Value) -> EngineResult<()>;
}

/// Process-local trade store
#[derive(Debug, Default, Clone)]
pub struct InMemoryTradeStore {
    entries: HashMap<(TradeId, String), Value>,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TradeDataStore for InMemoryTradeStore {
    fn get(&self, trade_id: TradeId, key: &str) -> EngineResult<Option<Value>> {
        Ok(self.entries.get(&(trade_id, key.to_string())).cloned())
    }

    fn set(&mut self, trade_id: TradeId, key: &str, value: Value) -> EngineResult<()> {
        self.entries.insert((trade_id, key.to_string()), value);
        Ok(())
    }
}
