//! Daily Buy Strategy Configuration
//!
//! Tunables for the averaging engine plus a table of timeframe variants. A
//! config may name a variant and override any individual field on top of it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::informative_timeframe;
use crate::error::{EngineError, EngineResult};
use crate::risk::{generate_dca_orders, DcaLadder, LeverageSelector, StakeSizer};
use crate::types::Decision;

/// Daily Buy Strategy Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyBuyConfig {
    /// Variant applied before the explicit fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Primary timeframe
    pub timeframe: String,
    /// Protective stop as a fraction of the latest averaging price
    pub new_sl_coef: f64,
    /// Trend Trigger Factor lookback
    pub lookback_length: usize,
    /// TTF level below which the trend is considered broken
    pub lower_trigger_level: f64,
    pub swing_window: usize,
    pub swing_min_periods: usize,
    pub buy_ema_short: usize,
    pub buy_ema_long: usize,
    /// Averaging is only evaluated on every n-th candle
    pub dca_candles_modulo: usize,
    /// Drawdown needed before the first averaging event
    pub dca_threshold: f64,
    /// Averaging steps budgeted per position by the stake sizer
    pub max_dca_count: usize,
    /// Growth factor of the averaging order schedule
    pub dca_inc: f64,
    /// Multiplier on the volatility-based leverage, in (0, 1]
    pub leverage_risk_coefficient: f64,
    pub fallback_leverage: f64,
    pub leverage_cap: f64,
    /// Share of the balance put at risk
    pub risk_fraction: f64,
    pub concurrent_pairs: usize,
    /// Multiplier on the initial stake
    pub stake_coefficient: f64,
    /// Minimum profit ratio for signal, trailing and ROI exits
    pub min_exit_profit: f64,
}

impl Default for DailyBuyConfig {
    fn default() -> Self {
        DailyBuyConfig {
            variant: None,
            timeframe: "1h".to_string(),
            new_sl_coef: 0.75,
            lookback_length: 15,
            lower_trigger_level: -100.0,
            swing_window: 50,
            swing_min_periods: 10,
            buy_ema_short: 10,
            buy_ema_long: 50,
            dca_candles_modulo: 3,
            dca_threshold: 0.01,
            max_dca_count: 10,
            dca_inc: 1.5,
            leverage_risk_coefficient: 0.6,
            fallback_leverage: 2.0,
            leverage_cap: 10.0,
            risk_fraction: 0.5,
            concurrent_pairs: 2,
            stake_coefficient: 1.0,
            min_exit_profit: 0.005,
        }
    }
}

// =============================================================================
// Variants
// =============================================================================

/// Preset for one trading timeframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Variant {
    pub name: &'static str,
    pub timeframe: &'static str,
    pub leverage_cap: f64,
}

/// Shorter timeframes tolerate more leverage per entry
pub const VARIANTS: [Variant; 5] = [
    Variant {
        name: "5m",
        timeframe: "5m",
        leverage_cap: 5.0,
    },
    Variant {
        name: "15m",
        timeframe: "15m",
        leverage_cap: 5.0,
    },
    Variant {
        name: "1h",
        timeframe: "1h",
        leverage_cap: 4.0,
    },
    Variant {
        name: "4h",
        timeframe: "4h",
        leverage_cap: 3.0,
    },
    Variant {
        name: "1d",
        timeframe: "1d",
        leverage_cap: 2.0,
    },
];

impl Variant {
    pub fn lookup(name: &str) -> Option<&'static Variant> {
        VARIANTS.iter().find(|v| v.name == name)
    }

    fn apply(&self, config: &mut DailyBuyConfig) {
        config.variant = Some(self.name.to_string());
        config.timeframe = self.timeframe.to_string();
        config.leverage_cap = self.leverage_cap;
    }
}

// =============================================================================
// Loading and validation
// =============================================================================

fn check(ok: bool, message: impl FnOnce() -> String) -> EngineResult<()> {
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(message()))
    }
}

impl DailyBuyConfig {
    /// Parse the strategy section of the config file.
    ///
    /// Starts from the defaults, applies the named variant, then the fields
    /// given explicitly in `section`.
    pub fn from_value(section: &serde_json::Value) -> Result<Self> {
        let mut base = DailyBuyConfig::default();
        if let Some(name) = section.get("variant").and_then(|v| v.as_str()) {
            let variant = Variant::lookup(name).ok_or_else(|| {
                let known: Vec<_> = VARIANTS.iter().map(|v| v.name).collect();
                anyhow::anyhow!("Unknown variant '{}'. Available: {}", name, known.join(", "))
            })?;
            variant.apply(&mut base);
        }

        let mut merged = serde_json::to_value(&base)?;
        if let (Some(target), Some(overrides)) = (merged.as_object_mut(), section.as_object()) {
            for (key, value) in overrides {
                target.insert(key.clone(), value.clone());
            }
        }

        let config: DailyBuyConfig =
            serde_json::from_value(merged).context("Failed to parse daily_buy config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check every tunable against its allowed range
    pub fn validate(&self) -> EngineResult<()> {
        check(informative_timeframe(&self.timeframe).is_some(), || {
            format!("unsupported timeframe '{}'", self.timeframe)
        })?;
        check((0.3..=0.9).contains(&self.new_sl_coef), || {
            format!("new_sl_coef {} outside [0.3, 0.9]", self.new_sl_coef)
        })?;
        check((1..=30).contains(&self.lookback_length), || {
            format!("lookback_length {} outside [1, 30]", self.lookback_length)
        })?;
        check((-300.0..=-1.0).contains(&self.lower_trigger_level), || {
            format!("lower_trigger_level {} outside [-300, -1]", self.lower_trigger_level)
        })?;
        check((10..=50).contains(&self.swing_window), || {
            format!("swing_window {} outside [10, 50]", self.swing_window)
        })?;
        check((1..=10).contains(&self.swing_min_periods), || {
            format!("swing_min_periods {} outside [1, 10]", self.swing_min_periods)
        })?;
        check((5..=50).contains(&self.buy_ema_short), || {
            format!("buy_ema_short {} outside [5, 50]", self.buy_ema_short)
        })?;
        check((50..=200).contains(&self.buy_ema_long), || {
            format!("buy_ema_long {} outside [50, 200]", self.buy_ema_long)
        })?;
        check((1..=100).contains(&self.dca_candles_modulo), || {
            format!("dca_candles_modulo {} outside [1, 100]", self.dca_candles_modulo)
        })?;
        check((0.01..=0.5).contains(&self.dca_threshold), || {
            format!("dca_threshold {} outside [0.01, 0.5]", self.dca_threshold)
        })?;
        check((1..=10).contains(&self.max_dca_count), || {
            format!("max_dca_count {} outside [1, 10]", self.max_dca_count)
        })?;
        check((1.2..=3.0).contains(&self.dca_inc), || {
            format!("dca_inc {} outside [1.2, 3.0]", self.dca_inc)
        })?;
        check(
            self.leverage_risk_coefficient > 0.0 && self.leverage_risk_coefficient <= 1.0,
            || {
                format!(
                    "leverage_risk_coefficient {} outside (0, 1]",
                    self.leverage_risk_coefficient
                )
            },
        )?;
        check(self.fallback_leverage.is_finite() && self.fallback_leverage > 0.0, || {
            format!("fallback_leverage {} must be positive", self.fallback_leverage)
        })?;
        check(self.leverage_cap.is_finite() && self.leverage_cap > 0.0, || {
            format!("leverage_cap {} must be positive", self.leverage_cap)
        })?;
        check(self.risk_fraction > 0.0 && self.risk_fraction <= 1.0, || {
            format!("risk_fraction {} outside (0, 1]", self.risk_fraction)
        })?;
        check(self.concurrent_pairs >= 1, || {
            "concurrent_pairs must be at least 1".to_string()
        })?;
        check(self.stake_coefficient > 0.0, || {
            format!("stake_coefficient {} must be positive", self.stake_coefficient)
        })?;
        check(self.min_exit_profit >= 0.0, || {
            format!("min_exit_profit {} must not be negative", self.min_exit_profit)
        })
    }

    pub fn leverage_selector(&self) -> LeverageSelector {
        LeverageSelector {
            risk_coefficient: self.leverage_risk_coefficient,
            fallback_leverage: self.fallback_leverage,
            leverage_cap: self.leverage_cap,
        }
    }

    pub fn stake_sizer(&self, min_stake: f64) -> StakeSizer {
        StakeSizer {
            risk_fraction: self.risk_fraction,
            concurrent_pairs: self.concurrent_pairs,
            max_dca_count: self.max_dca_count,
            coefficient: self.stake_coefficient,
            min_stake,
        }
    }

    /// Averaging ladder whose first rung is `dca_threshold`
    pub fn dca_ladder(&self) -> DcaLadder {
        DcaLadder {
            initial_threshold_pct: self.dca_threshold * 100.0,
            ..DcaLadder::default()
        }
    }

    /// Order schedule for `total` spread over `concurrent_pairs`, growing by `dca_inc`
    pub fn order_schedule(&self, total: f64, min_stake: f64) -> Decision<Vec<f64>> {
        generate_dca_orders(
            total,
            self.concurrent_pairs,
            self.max_dca_count,
            self.dca_inc,
            min_stake,
        )
    }
}
