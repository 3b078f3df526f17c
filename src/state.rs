//! Engine state
//!
//! Everything the engine remembers between evaluations, owned by one engine
//! instance:
//! - per-pair averaging thresholds and volatility, held in process
//! - per-trade averaging entries and protective stop, written through to the
//!   host's [`TradeDataStore`] under [`DCA_KEY`] and [`SL_KEY`]

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::host::{TradeDataStore, DCA_KEY, SL_KEY};
use crate::{OpenTrade, Symbol};

pub struct EngineState {
    store: Box<dyn TradeDataStore>,
    thresholds: HashMap<Symbol, f64>,
    volatility: HashMap<Symbol, f64>,
    default_threshold: f64,
}

impl EngineState {
    pub fn new(store: Box<dyn TradeDataStore>, default_threshold: f64) -> Self {
        Self {
            store,
            thresholds: HashMap::new(),
            volatility: HashMap::new(),
            default_threshold,
        }
    }

    // -------------------------------------------------------------------------
    // Pair thresholds
    // -------------------------------------------------------------------------

    /// Drawdown that must be exceeded before the pair's next averaging event
    pub fn threshold(&self, pair: &Symbol) -> f64 {
        self.thresholds
            .get(pair)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn set_threshold(&mut self, pair: &Symbol, threshold: f64) {
        self.thresholds.insert(pair.clone(), threshold);
    }

    pub fn clear_threshold(&mut self, pair: &Symbol) -> Option<f64> {
        self.thresholds.remove(pair)
    }

    pub fn has_threshold(&self, pair: &Symbol) -> bool {
        self.thresholds.contains_key(pair)
    }

    // -------------------------------------------------------------------------
    // Volatility
    // -------------------------------------------------------------------------

    pub fn record_volatility(&mut self, pair: &Symbol, atr_percent: f64) {
        self.volatility.insert(pair.clone(), atr_percent);
    }

    pub fn volatility(&self, pair: &Symbol) -> Option<f64> {
        self.volatility.get(pair).copied()
    }

    // -------------------------------------------------------------------------
    // Per-trade records
    // -------------------------------------------------------------------------

    /// Prices of executed averaging entries, oldest first.
    ///
    /// A missing or unreadable record reads as "no averaging yet".
    pub fn averaging_entries(&self, trade: &OpenTrade) -> Vec<f64> {
        match self.store.get(trade.id, DCA_KEY) {
            Ok(Some(value)) => match serde_json::from_value::<Vec<f64>>(value) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(trade_id = %trade.id, "Unreadable DCA record, treating as empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(trade_id = %trade.id, "DCA record lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Active protective stop, or the host's native stop when none is stored
    pub fn protective_stop(&self, trade: &OpenTrade) -> f64 {
        match self.store.get(trade.id, SL_KEY) {
            Ok(Some(Value::Number(n))) => n.as_f64().unwrap_or(trade.stop_loss),
            Ok(Some(other)) => {
                warn!(trade_id = %trade.id, "Unreadable SL record {}, using host stop", other);
                trade.stop_loss
            }
            Ok(None) => trade.stop_loss,
            Err(e) => {
                debug!(trade_id = %trade.id, "SL record lookup failed, using host stop: {}", e);
                trade.stop_loss
            }
        }
    }

    /// Append an averaging entry and move the protective stop to
    /// `price * stop_coefficient`. Returns the new stop.
    pub fn record_averaging(
        &mut self,
        trade: &OpenTrade,
        price: f64,
        stop_coefficient: f64,
    ) -> EngineResult<f64> {
        let mut entries = self.averaging_entries(trade);
        entries.push(price);

        // Entry first: a failed stop write must not lose the averaging price
        let stop = price * stop_coefficient;
        self.store
            .set(trade.id, DCA_KEY, serde_json::to_value(&entries)?)?;
        self.store.set(trade.id, SL_KEY, serde_json::json!(stop))?;

        debug!(
            trade_id = %trade.id,
            entries = entries.len(),
            stop,
            "Averaging entry recorded"
        );
        Ok(stop)
    }
}
