//! Technical indicators powered by the `ta` crate
//!
//! Thin wrappers around the `ta` crate plus the handful of rolling-window
//! helpers the strategy needs. Every function returns one value per input
//! row, with `None` during warmup so callers can keep rows aligned.
//!
//! Available indicators:
//! - Moving Averages: EMA
//! - Momentum: RSI, MACD
//! - Volatility: ATR, ATR %, Bollinger Bands
//! - Price structure: pivot points, rolling highs/lows, running max

use ta::indicators::{
    BollingerBands as TaBB, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use ta::Next;

// =============================================================================
// Type Aliases for Complex Return Types
// =============================================================================

/// Type alias for band indicators (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Exponential Moving Average
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let ema_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(ema_val));
        } else {
            result.push(None);
        }
    }

    result
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (ATR) using Wilder's smoothing
///
/// ATR = (prev_ATR * (period - 1) + current_TR) / period, seeded with the
/// SMA of the first `period` true ranges.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(high.len());
    let mut atr_value: Option<f64> = None;

    for i in 0..tr.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = tr[0..period].iter().sum();
            atr_value = Some(sum / period as f64);
            result.push(atr_value);
        } else if let Some(prev_atr) = atr_value {
            let new_atr = (prev_atr * (period - 1) as f64 + tr[i]) / period as f64;
            atr_value = Some(new_atr);
            result.push(atr_value);
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate ATR as percentage of price
pub fn atr_percent(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let atr_vals = atr(high, low, close, period);

    atr_vals
        .iter()
        .zip(close.iter())
        .map(|(atr_opt, &price)| {
            atr_opt.and_then(|atr_val| {
                if price > 0.0 {
                    Some((atr_val / price) * 100.0)
                } else {
                    None
                }
            })
        })
        .collect()
}

/// Calculate Bollinger Bands using ta crate
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    if values.is_empty() || period == 0 {
        return (vec![], vec![], vec![]);
    }

    let mut indicator = match TaBB::new(period, num_std) {
        Ok(i) => i,
        Err(_) => {
            return (
                vec![None; values.len()],
                vec![None; values.len()],
                vec![None; values.len()],
            )
        }
    };

    let mut upper = Vec::with_capacity(values.len());
    let mut middle = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let bb = indicator.next(value);
        if i + 1 >= period {
            upper.push(Some(bb.upper));
            middle.push(Some(bb.average));
            lower.push(Some(bb.lower));
        } else {
            upper.push(None);
            middle.push(None);
            lower.push(None);
        }
    }

    (upper, middle, lower)
}

// =============================================================================
// Momentum Indicators
// =============================================================================

/// Calculate RSI (Relative Strength Index) using ta crate
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match RelativeStrengthIndex::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let rsi_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(rsi_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate MACD using ta crate
///
/// Returns (macd line, signal line, histogram)
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> BandOutput {
    if values.is_empty() {
        return (vec![], vec![], vec![]);
    }

    let mut indicator =
        match MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period) {
            Ok(i) => i,
            Err(_) => {
                return (
                    vec![None; values.len()],
                    vec![None; values.len()],
                    vec![None; values.len()],
                )
            }
        };

    let warmup = slow_period;
    let mut macd_line = Vec::with_capacity(values.len());
    let mut signal_line = Vec::with_capacity(values.len());
    let mut histogram = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let macd_out = indicator.next(value);
        if i + 1 >= warmup {
            macd_line.push(Some(macd_out.macd));
            signal_line.push(Some(macd_out.signal));
            histogram.push(Some(macd_out.histogram));
        } else {
            macd_line.push(None);
            signal_line.push(None);
            histogram.push(None);
        }
    }

    (macd_line, signal_line, histogram)
}

// =============================================================================
// Price Structure
// =============================================================================

/// Classic floor pivots computed from the previous candle
///
/// Returns (pivot point, resistance 1, support 1). The first row has no
/// previous candle and is `None`.
pub fn pivots(high: &[f64], low: &[f64], close: &[f64]) -> BandOutput {
    let n = high.len();
    if n == 0 || n != low.len() || n != close.len() {
        return (vec![], vec![], vec![]);
    }

    let mut pp = vec![None; n];
    let mut r1 = vec![None; n];
    let mut s1 = vec![None; n];

    for i in 1..n {
        let pivot = (high[i - 1] + low[i - 1] + close[i - 1]) / 3.0;
        pp[i] = Some(pivot);
        r1[i] = Some(2.0 * pivot - low[i - 1]);
        s1[i] = Some(2.0 * pivot - high[i - 1]);
    }

    (pp, r1, s1)
}

fn rolling_extreme(
    values: &[f64],
    window: usize,
    min_periods: usize,
    pick: fn(f64, f64) -> f64,
) -> Vec<Option<f64>> {
    if values.is_empty() || window == 0 {
        return vec![];
    }
    let min_periods = min_periods.clamp(1, window);

    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            if slice.len() < min_periods {
                return None;
            }
            slice.iter().copied().reduce(pick)
        })
        .collect()
}

/// Rolling maximum over `window` rows, requiring at least `min_periods` rows
pub fn rolling_max(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling_extreme(values, window, min_periods, f64::max)
}

/// Rolling minimum over `window` rows, requiring at least `min_periods` rows
pub fn rolling_min(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling_extreme(values, window, min_periods, f64::min)
}

/// Running maximum from the first row
pub fn cumulative_max(values: &[f64]) -> Vec<f64> {
    let mut running = f64::NEG_INFINITY;
    values
        .iter()
        .map(|&v| {
            running = running.max(v);
            running
        })
        .collect()
}

/// Lag a series by `periods` rows, padding the front with `None`
pub fn shift(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    let n = values.len();
    (0..n)
        .map(|i| if i >= periods { values[i - periods] } else { None })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert!(result[2].is_some());
        let ema_val = result[4].unwrap();
        assert!(ema_val > 3.0 && ema_val < 5.0);
    }

    #[test]
    fn test_rsi() {
        let values = vec![
            44.0, 44.25, 44.5, 43.75, 44.5, 44.25, 44.0, 43.5, 44.0, 44.5, 45.0, 45.25, 45.5, 45.0,
            44.75,
        ];
        let result = rsi(&values, 14);

        assert!(result.last().unwrap().is_some());
        let rsi_val = result.last().unwrap().unwrap();
        assert!((0.0..=100.0).contains(&rsi_val));
    }

    #[test]
    fn test_macd() {
        let values: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        let (macd_line, signal, histogram) = macd(&values, 12, 26, 9);

        assert_eq!(macd_line[0], None);
        assert!(macd_line.last().unwrap().is_some());
        assert!(signal.last().unwrap().is_some());
        assert!(histogram.last().unwrap().is_some());
    }

    #[test]
    fn test_bollinger_bands() {
        let values = vec![20.0, 21.0, 22.0, 21.0, 20.0, 21.0, 22.0, 23.0, 22.0, 21.0];
        let (upper, middle, lower) = bollinger_bands(&values, 5, 2.0);

        assert!(upper[4].is_some());
        assert!(upper[4].unwrap() > middle[4].unwrap());
        assert!(middle[4].unwrap() > lower[4].unwrap());
    }

    #[test]
    fn test_atr() {
        let high = vec![10.0, 11.0, 12.0, 11.5, 12.0];
        let low = vec![9.0, 10.0, 11.0, 10.5, 11.0];
        let close = vec![9.5, 10.5, 11.5, 11.0, 11.5];

        let result = atr(&high, &low, &close, 3);

        assert_eq!(result[1], None);
        // TR = [1.0, 1.5, 1.5] -> seed SMA = 4/3
        assert!((result[2].unwrap() - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_percent_skips_non_positive_close() {
        let high = vec![10.0, 11.0, 12.0];
        let low = vec![9.0, 10.0, 11.0];
        let close = vec![9.5, 10.5, 0.0];

        let result = atr_percent(&high, &low, &close, 2);
        assert!(result[1].is_some());
        assert_eq!(result[2], None);
    }

    #[test]
    fn test_pivots_use_previous_candle() {
        let high = vec![12.0, 13.0];
        let low = vec![9.0, 10.0];
        let close = vec![11.0, 12.0];

        let (pp, r1, s1) = pivots(&high, &low, &close);
        assert_eq!(pp[0], None);
        // pp = (12 + 9 + 11) / 3
        let expected_pp = 32.0 / 3.0;
        assert!((pp[1].unwrap() - expected_pp).abs() < 1e-9);
        assert!((r1[1].unwrap() - (2.0 * expected_pp - 9.0)).abs() < 1e-9);
        assert!((s1[1].unwrap() - (2.0 * expected_pp - 12.0)).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window_with_min_periods() {
        let values = vec![3.0, 1.0, 4.0, 1.0, 5.0];

        let max = rolling_max(&values, 3, 2);
        assert_eq!(max, vec![None, Some(3.0), Some(4.0), Some(4.0), Some(5.0)]);

        let min = rolling_min(&values, 3, 3);
        assert_eq!(min, vec![None, None, Some(1.0), Some(1.0), Some(1.0)]);
    }

    #[test]
    fn test_cumulative_max_and_shift() {
        let values = vec![2.0, 1.0, 3.0, 2.5];
        assert_eq!(cumulative_max(&values), vec![2.0, 2.0, 3.0, 3.0]);

        let series = vec![Some(1.0), Some(2.0), None, Some(4.0)];
        assert_eq!(shift(&series, 2), vec![None, None, Some(1.0), Some(2.0)]);
    }
}
