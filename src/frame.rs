//! Analyzed candle table
//!
//! The row-oriented equivalent of the host's dataframe: each raw candle plus
//! the indicator columns derived from it and the entry/exit flags set by the
//! signal callbacks.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Candle, Symbol};

/// One candle with its derived indicator columns
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedCandle {
    pub candle: Candle,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub previous_close: Option<f64>,
    pub max_since_buy: f64,
    pub atr: Option<f64>,
    pub atr_percent: Option<f64>,
    pub pivot_point: Option<f64>,
    pub resistance_1: Option<f64>,
    pub support_1: Option<f64>,
    pub swing_low: Option<f64>,
    pub swing_high: Option<f64>,
    /// Close above near-term resistance and above the previous close
    pub res_signal_breached: bool,
    pub bb_lower: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_upper: Option<f64>,
    pub hh: Option<f64>,
    pub ll: Option<f64>,
    pub buy_power: Option<f64>,
    pub sell_power: Option<f64>,
    /// Trend Trigger Factor
    pub ttf: Option<f64>,
    pub enter_long: bool,
    pub enter_tag: Option<String>,
    pub exit_long: bool,
    pub exit_tag: Option<String>,
}

impl AnalyzedCandle {
    /// A row with no derived columns yet
    pub fn bare(candle: Candle) -> Self {
        let max_since_buy = candle.high;
        AnalyzedCandle {
            candle,
            rsi: None,
            macd: None,
            macd_signal: None,
            ema_short: None,
            ema_long: None,
            previous_close: None,
            max_since_buy,
            atr: None,
            atr_percent: None,
            pivot_point: None,
            resistance_1: None,
            support_1: None,
            swing_low: None,
            swing_high: None,
            res_signal_breached: false,
            bb_lower: None,
            bb_middle: None,
            bb_upper: None,
            hh: None,
            ll: None,
            buy_power: None,
            sell_power: None,
            ttf: None,
            enter_long: false,
            enter_tag: None,
            exit_long: false,
            exit_tag: None,
        }
    }

    pub fn close(&self) -> f64 {
        self.candle.close
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.candle.datetime
    }
}

/// Analyzed candles for one pair and timeframe, oldest first
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedFrame {
    pub pair: Symbol,
    pub timeframe: String,
    /// Position of the first row in the pair's full candle history
    first_index: usize,
    rows: Vec<AnalyzedCandle>,
}

impl AnalyzedFrame {
    pub fn new(pair: Symbol, timeframe: impl Into<String>, rows: Vec<AnalyzedCandle>) -> Self {
        Self {
            pair,
            timeframe: timeframe.into(),
            first_index: 0,
            rows,
        }
    }

    /// Re-base row indices when the frame covers a window of a longer history
    pub fn starting_at(mut self, first_index: usize) -> Self {
        self.first_index = first_index;
        self
    }

    pub fn rows(&self) -> &[AnalyzedCandle] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [AnalyzedCandle] {
        &mut self.rows
    }

    pub fn last(&self) -> Option<&AnalyzedCandle> {
        self.rows.last()
    }

    /// Index of the latest candle within the pair's history
    pub fn last_index(&self) -> Option<usize> {
        self.rows.len().checked_sub(1).map(|i| self.first_index + i)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn datetimes(&self) -> Vec<DateTime<Utc>> {
        self.rows.iter().map(|r| r.datetime()).collect()
    }
}

/// Align `other` onto `times` by nearest timestamp, returning one close per time.
///
/// Ties resolve to the earlier candle. `other` must be sorted by time.
pub fn align_nearest_close(times: &[DateTime<Utc>], other: &[Candle]) -> Vec<Option<f64>> {
    if other.is_empty() {
        return vec![None; times.len()];
    }

    times
        .iter()
        .map(|t| {
            let idx = other.partition_point(|c| c.datetime < *t);
            let nearest = if idx == 0 {
                0
            } else if idx >= other.len() {
                other.len() - 1
            } else {
                let before = *t - other[idx - 1].datetime;
                let after = other[idx].datetime - *t;
                if after < before {
                    idx
                } else {
                    idx - 1
                }
            };
            Some(other[nearest].close)
        })
        .collect()
}
