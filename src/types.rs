//! Core data types used across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Reason a raw candle was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum CandleValidationError {
    NonFinite(&'static str),
    NegativePrice(&'static str),
    NegativeVolume,
    HighBelowLow { high: f64, low: f64 },
}

impl fmt::Display for CandleValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite(field) => write!(f, "{} is not a finite number", field),
            Self::NegativePrice(field) => write!(f, "{} is negative", field),
            Self::NegativeVolume => write!(f, "volume is negative"),
            Self::HighBelowLow { high, low } => {
                write!(f, "high {} is below low {}", high, low)
            }
        }
    }
}

impl std::error::Error for CandleValidationError {}

impl Candle {
    /// Build a candle, rejecting values no exchange would report
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        for (name, value) in [
            ("open", open),
            ("high", high),
            ("low", low),
            ("close", close),
            ("volume", volume),
        ] {
            if !value.is_finite() {
                return Err(CandleValidationError::NonFinite(name));
            }
        }
        for (name, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if value < 0.0 {
                return Err(CandleValidationError::NegativePrice(name));
            }
        }
        if volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume);
        }
        if high < low {
            return Err(CandleValidationError::HighBelowLow { high, low });
        }

        Ok(Candle {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

/// Opaque trade identifier assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub i64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host view of an open position.
///
/// The host owns the position; the engine only reads it. `stop_loss` is the
/// host's native stop price and `liquidation_price` is `None` for spot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTrade {
    pub id: TradeId,
    pub pair: Symbol,
    pub side: Side,
    pub open_time: DateTime<Utc>,
    pub entry_price: f64,
    /// Margin committed, including every averaging entry
    pub stake_amount: f64,
    pub leverage: f64,
    pub stop_loss: f64,
    pub liquidation_price: Option<f64>,
    pub entry_tag: Option<String>,
    /// Number of filled entries (initial + averaging)
    pub entries: usize,
}

impl OpenTrade {
    /// Position size in base currency
    pub fn amount(&self) -> f64 {
        if self.entry_price > 0.0 {
            self.stake_amount * self.leverage / self.entry_price
        } else {
            0.0
        }
    }

    /// Profit ratio on margin at `rate`, leverage included
    pub fn calc_profit_ratio(&self, rate: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        let move_ratio = match self.side {
            Side::Long => rate / self.entry_price - 1.0,
            Side::Short => 1.0 - rate / self.entry_price,
        };
        move_ratio * self.leverage
    }

    /// Absolute profit in stake currency at `rate`
    pub fn calc_profit(&self, rate: f64) -> f64 {
        self.stake_amount * self.calc_profit_ratio(rate)
    }

    /// Fill an additional entry and recompute the volume-weighted entry price
    pub fn add_entry(&mut self, stake: f64, rate: f64) {
        if stake <= 0.0 || rate <= 0.0 {
            return;
        }
        let added_amount = stake * self.leverage / rate;
        let total_amount = self.amount() + added_amount;
        self.stake_amount += stake;
        if total_amount > 0.0 {
            self.entry_price = self.stake_amount * self.leverage / total_amount;
        }
        self.entries += 1;
    }
}

/// Completed trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: TradeId,
    pub pair: Symbol,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stake_amount: f64,
    pub leverage: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub profit_ratio: f64,
    pub profit_abs: f64,
    pub exit_reason: String,
    pub entries: usize,
}

/// Outcome of a decision callback.
///
/// Decision functions never fail toward the host. A degraded path still yields
/// a definite value, tagged with the reason it was taken.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    Computed(T),
    Fallback { value: T, reason: String },
}

impl<T> Decision<T> {
    pub fn fallback(value: T, reason: impl Into<String>) -> Self {
        Decision::Fallback {
            value,
            reason: reason.into(),
        }
    }

    pub fn value(self) -> T {
        match self {
            Decision::Computed(value) | Decision::Fallback { value, .. } => value,
        }
    }

    pub fn as_value(&self) -> &T {
        match self {
            Decision::Computed(value) | Decision::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Decision::Fallback { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Computed(_) => None,
            Decision::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decision<U> {
        match self {
            Decision::Computed(value) => Decision::Computed(f(value)),
            Decision::Fallback { value, reason } => Decision::Fallback {
                value: f(value),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn trade(entry: f64, leverage: f64) -> OpenTrade {
        OpenTrade {
            id: TradeId(1),
            pair: Symbol::new("BTC/USDT"),
            side: Side::Long,
            open_time: Utc::now(),
            entry_price: entry,
            stake_amount: 100.0,
            leverage,
            stop_loss: entry * 0.5,
            liquidation_price: None,
            entry_tag: None,
            entries: 1,
        }
    }

    #[test]
    fn test_candle_validation() {
        let now = Utc::now();
        assert!(Candle::new(now, 1.0, 2.0, 0.5, 1.5, 10.0).is_ok());
        assert_eq!(
            Candle::new(now, 1.0, 0.5, 2.0, 1.5, 10.0),
            Err(CandleValidationError::HighBelowLow { high: 0.5, low: 2.0 })
        );
        assert_eq!(
            Candle::new(now, f64::NAN, 2.0, 0.5, 1.5, 10.0),
            Err(CandleValidationError::NonFinite("open"))
        );
        assert_eq!(
            Candle::new(now, 1.0, 2.0, 0.5, 1.5, -1.0),
            Err(CandleValidationError::NegativeVolume)
        );
    }

    #[test]
    fn test_profit_ratio_includes_leverage() {
        let t = trade(100.0, 3.0);
        assert_relative_eq!(t.calc_profit_ratio(99.0), -0.03, epsilon = 1e-12);
        assert_relative_eq!(t.calc_profit(102.0), 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_add_entry_lowers_average_price() {
        let mut t = trade(100.0, 1.0);
        t.add_entry(100.0, 50.0);
        // 1 unit @100 + 2 units @50 = 200 / 3 units
        assert_relative_eq!(t.entry_price, 200.0 / 3.0, epsilon = 1e-9);
        assert_eq!(t.entries, 2);
        assert_relative_eq!(t.stake_amount, 200.0);
    }

    #[test]
    fn test_decision_accessors() {
        let ok: Decision<f64> = Decision::Computed(2.0);
        assert!(!ok.is_fallback());
        assert_eq!(ok.reason(), None);

        let fb = Decision::fallback(1.0, "no data");
        assert!(fb.is_fallback());
        assert_eq!(fb.reason(), Some("no data"));
        assert_eq!(fb.map(|v| v * 2.0).value(), 2.0);
    }
}
