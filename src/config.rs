//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::Symbol;

/// Minimum stake used when the host config does not set one
pub const DEFAULT_MIN_STAKE: f64 = 30.0;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,
    #[serde(default)]
    pub pairs: Vec<String>,
    /// Smallest stake the exchange accepts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_stake_amount: Option<f64>,
    /// Strategy-specific section, parsed by the strategy factory
    #[serde(default = "empty_object")]
    pub strategy: serde_json::Value,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_strategy_name() -> String {
    "daily_buy".to_string()
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(min_stake) = std::env::var("MIN_STAKE_AMOUNT") {
            let min_stake: f64 = min_stake
                .parse()
                .context("MIN_STAKE_AMOUNT must be a number")?;
            config.min_stake_amount = Some(min_stake);
        }

        Ok(config)
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn min_stake(&self) -> f64 {
        self.min_stake_amount.unwrap_or(DEFAULT_MIN_STAKE)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.pairs.iter().map(|s| Symbol::new(s.clone())).collect()
    }

    /// Timeframe from the strategy section, if set
    pub fn timeframe(&self) -> Option<&str> {
        self.strategy.get("timeframe").and_then(|v| v.as_str())
    }

    /// Set a field in the strategy section
    pub fn set_strategy_param(&mut self, key: &str, value: serde_json::Value) {
        if let Some(obj) = self.strategy.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strategy_name: default_strategy_name(),
            pairs: vec!["BTC/USDT:USDT".to_string(), "ETH/USDT:USDT".to_string()],
            min_stake_amount: None,
            strategy: empty_object(),
            state: StateConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Where per-trade records are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Trade data store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            backend: StateBackend::Memory,
            state_dir: default_state_dir(),
        }
    }
}

/// Paper simulation settings (host-side rules the strategy does not own)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Directory holding `<PAIR>_<timeframe>.csv` files
    pub data_dir: PathBuf,
    pub starting_balance: f64,
    /// Exchange leverage ceiling offered to the strategy
    pub max_leverage: f64,
    /// Native stop-loss as a profit ratio (-0.5 = -50%)
    pub stoploss: f64,
    /// Take-profit as a profit ratio
    pub minimal_roi: f64,
    /// Candles of history handed to indicator population
    pub max_lookback: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            data_dir: PathBuf::from("data"),
            starting_balance: 10_000.0,
            max_leverage: 10.0,
            stoploss: -0.5,
            minimal_roi: 0.03,
            max_lookback: 300,
        }
    }
}
