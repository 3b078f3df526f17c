//! Risk sizing framework
//!
//! Implements the sizing rules behind the strategy callbacks: volatility-based
//! leverage, initial stake sizing, the averaging order-size schedule and the
//! averaging ladder (amount/threshold recompute).
//!
//! # Currency-Agnostic Design
//!
//! All monetary values are dimensionless numbers in the stake currency. The
//! rules produce the same exposure fractions regardless of denomination.
//!
//! Stake sizing formula:
//! ```text
//! stake = balance * risk_fraction / concurrent_pairs / (max_dca_count + 1) * coefficient
//! ```

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::Decision;

/// ATR % reported when the last close is unusable
pub const NEUTRAL_ATR_PERCENT: f64 = 1.0;

/// ATR % upper bounds and the base leverage below each
const LEVERAGE_BREAKPOINTS: [(f64, f64); 4] = [(0.5, 5.0), (1.0, 4.0), (1.5, 3.0), (2.0, 2.0)];
const CALM_FLOOR_LEVERAGE: f64 = 1.0;

// =============================================================================
// Volatility & Leverage
// =============================================================================

/// ATR as a percentage of close, or the neutral value when close is unusable
pub fn atr_percent_or_neutral(atr: Option<f64>, close: f64) -> f64 {
    match atr {
        Some(atr) if close > 0.0 && atr.is_finite() && close.is_finite() => atr / close * 100.0,
        _ => NEUTRAL_ATR_PERCENT,
    }
}

/// Discrete base leverage for an ATR %; higher volatility, lower leverage
pub fn base_leverage(atr_percent: f64) -> f64 {
    LEVERAGE_BREAKPOINTS
        .iter()
        .find(|(bound, _)| atr_percent < *bound)
        .map(|(_, leverage)| *leverage)
        .unwrap_or(CALM_FLOOR_LEVERAGE)
}

/// Leverage selection rules
#[derive(Debug, Clone)]
pub struct LeverageSelector {
    /// Multiplier on the base leverage, in (0, 1]
    pub risk_coefficient: f64,
    /// Returned (clamped) when the inputs are unusable
    pub fallback_leverage: f64,
    /// Upper bound applied on top of the host maximum
    pub leverage_cap: f64,
}

impl Default for LeverageSelector {
    fn default() -> Self {
        Self {
            risk_coefficient: 0.6,
            fallback_leverage: 2.0,
            leverage_cap: 10.0,
        }
    }
}

impl LeverageSelector {
    fn compute(&self, atr_percent: f64, max_leverage: f64) -> EngineResult<f64> {
        if !atr_percent.is_finite() || atr_percent < 0.0 {
            return Err(EngineError::Arithmetic(format!(
                "unusable ATR percent {}",
                atr_percent
            )));
        }
        if !(self.risk_coefficient > 0.0 && self.risk_coefficient <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "risk coefficient {} outside (0, 1]",
                self.risk_coefficient
            )));
        }
        if !max_leverage.is_finite() {
            return Err(EngineError::Arithmetic(format!(
                "unusable max leverage {}",
                max_leverage
            )));
        }

        let leverage = base_leverage(atr_percent) * self.risk_coefficient;
        Ok(self.clamp(leverage, max_leverage))
    }

    fn clamp(&self, leverage: f64, max_leverage: f64) -> f64 {
        let ceiling = if max_leverage.is_finite() {
            max_leverage.max(0.0)
        } else {
            0.0
        };
        leverage.min(self.leverage_cap).clamp(0.0, ceiling)
    }

    /// Final leverage for the given volatility, within `[0, max_leverage]`
    pub fn select(&self, atr_percent: f64, max_leverage: f64) -> Decision<f64> {
        match self.compute(atr_percent, max_leverage) {
            Ok(leverage) => Decision::Computed(leverage),
            Err(e) => {
                warn!("Leverage fallback: {}", e);
                Decision::fallback(self.clamp(self.fallback_leverage, max_leverage), e.to_string())
            }
        }
    }
}

// =============================================================================
// Stake Sizing
// =============================================================================

/// Initial stake sizing rules
#[derive(Debug, Clone)]
pub struct StakeSizer {
    /// Share of the balance put at risk; the rest is buffer
    pub risk_fraction: f64,
    /// Instruments traded concurrently
    pub concurrent_pairs: usize,
    /// Averaging steps planned per position
    pub max_dca_count: usize,
    /// Tunable multiplier on the per-entry allocation
    pub coefficient: f64,
    pub min_stake: f64,
}

impl Default for StakeSizer {
    fn default() -> Self {
        Self {
            risk_fraction: 0.5,
            concurrent_pairs: 2,
            max_dca_count: 10,
            coefficient: 1.0,
            min_stake: 30.0,
        }
    }
}

impl StakeSizer {
    /// Per-entry allocation before the minimum-stake floor
    pub fn raw_stake(&self, balance: f64) -> EngineResult<f64> {
        if !balance.is_finite() {
            return Err(EngineError::Arithmetic(format!("unusable balance {}", balance)));
        }
        if self.concurrent_pairs == 0 {
            return Err(EngineError::InvalidConfig(
                "concurrent_pairs must be at least 1".to_string(),
            ));
        }
        let per_pair = balance * self.risk_fraction / self.concurrent_pairs as f64;
        let planned_entries = (self.max_dca_count + 1) as f64;
        Ok(per_pair / planned_entries * self.coefficient)
    }

    /// Stake for a new entry, never below `min_stake`
    pub fn size(&self, balance: EngineResult<f64>) -> Decision<f64> {
        match balance.and_then(|b| self.raw_stake(b)) {
            Ok(stake) => Decision::Computed(stake.max(self.min_stake)),
            Err(e) => {
                warn!("Stake sizing fallback to minimum stake: {}", e);
                Decision::fallback(self.min_stake, e.to_string())
            }
        }
    }
}

// =============================================================================
// Averaging Order Schedule
// =============================================================================

fn to_decimal(value: f64) -> EngineResult<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| EngineError::Arithmetic(format!("{} is not representable", value)))
}

fn to_f64(value: Decimal) -> EngineResult<f64> {
    value
        .to_f64()
        .ok_or_else(|| EngineError::Arithmetic(format!("{} overflows f64", value)))
}

/// Truncate to cents so no order exceeds its exact share of the pool
fn truncate_cents(value: Decimal) -> EngineResult<f64> {
    to_f64(value.round_dp_with_strategy(2, RoundingStrategy::ToZero))
}

fn try_dca_orders(
    total_amount: f64,
    num_currencies: usize,
    num_dca_positions: usize,
    increment: f64,
    minimal_stake: f64,
) -> EngineResult<Vec<f64>> {
    if num_currencies == 0 {
        return Err(EngineError::Arithmetic("division by zero currencies".to_string()));
    }
    if !increment.is_finite() || increment <= 0.0 {
        return Err(EngineError::Arithmetic(format!("unusable increment {}", increment)));
    }

    // Geometric series seeded at 1, then scaled to exhaust the pool
    let mut relative = vec![1.0_f64];
    for _ in 0..num_dca_positions {
        let next = relative[relative.len() - 1] * increment;
        relative.push(next);
    }
    let cost_per_currency: f64 = relative.iter().sum();
    if !cost_per_currency.is_finite() {
        return Err(EngineError::Arithmetic("schedule overflows".to_string()));
    }

    let initial = to_decimal(total_amount / (cost_per_currency * num_currencies as f64))?;
    if initial < dec!(0) {
        return Err(EngineError::Arithmetic(format!(
            "negative initial order {}",
            initial
        )));
    }
    let initial = truncate_cents(initial)?.max(minimal_stake);

    let mut orders = Vec::with_capacity(num_dca_positions + 1);
    orders.push(initial);
    for _ in 0..num_dca_positions {
        let next = truncate_cents(to_decimal(orders[orders.len() - 1] * increment)?)?;
        orders.push(next.max(minimal_stake));
    }

    Ok(orders)
}

/// Stake schedule for an initial entry plus `num_dca_positions` averaging steps.
///
/// Each step is the previous one times `increment`, truncated to cents and
/// floored at `minimal_stake`. The initial stake is back-solved so that the
/// whole schedule across `num_currencies` fits within `total_amount`.
pub fn generate_dca_orders(
    total_amount: f64,
    num_currencies: usize,
    num_dca_positions: usize,
    increment: f64,
    minimal_stake: f64,
) -> Decision<Vec<f64>> {
    match try_dca_orders(
        total_amount,
        num_currencies,
        num_dca_positions,
        increment,
        minimal_stake,
    ) {
        Ok(orders) => Decision::Computed(orders),
        Err(e) => {
            info!("Exception occurred while building DCA schedule: {}", e);
            let fallback = (0..=num_dca_positions)
                .map(|i| increment.powi(i as i32).max(minimal_stake))
                .collect();
            Decision::fallback(fallback, e.to_string())
        }
    }
}

// =============================================================================
// Averaging Ladder
// =============================================================================

/// Amount and next trigger distance produced by one averaging event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcaStep {
    pub level: u32,
    pub amount: f64,
    pub new_threshold: f64,
}

/// Averaging ladder: each event shrinks the next amount geometrically and
/// widens the drawdown needed to trigger it arithmetically.
#[derive(Debug, Clone)]
pub struct DcaLadder {
    /// First trigger distance, in percent
    pub initial_threshold_pct: f64,
    /// Trigger distance added per level, in percent
    pub threshold_step_pct: f64,
    /// Share of free capital used at level 0
    pub initial_allocation: f64,
    /// Per-level decay of the allocation
    pub decay_rate: f64,
}

impl Default for DcaLadder {
    fn default() -> Self {
        Self {
            initial_threshold_pct: 1.0,
            threshold_step_pct: 2.0,
            initial_allocation: 0.2,
            decay_rate: 0.8,
        }
    }
}

impl DcaLadder {
    /// Threshold used before any averaging event, as a fraction
    pub fn initial_threshold(&self) -> f64 {
        self.initial_threshold_pct / 100.0
    }

    /// Recompute the averaging amount and next threshold.
    ///
    /// `previous_threshold` is a fraction (0.01 = 1%). A value below the
    /// initial threshold means the stored state is corrupt.
    pub fn next_step(&self, free_capital: f64, previous_threshold: f64) -> EngineResult<DcaStep> {
        let floor = self.initial_threshold();
        if previous_threshold.is_nan() || previous_threshold < floor {
            return Err(EngineError::ThresholdBelowFloor {
                previous: previous_threshold,
                floor,
            });
        }
        if !free_capital.is_finite() || !previous_threshold.is_finite() {
            return Err(EngineError::Arithmetic(format!(
                "unusable inputs: free capital {}, threshold {}",
                free_capital, previous_threshold
            )));
        }
        if self.threshold_step_pct <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "threshold step must be positive".to_string(),
            ));
        }

        // Thresholds are stored as fractions; snap the percent back onto the
        // ladder so 0.29 * 100 = 28.999... still lands on its level
        let previous_pct = (previous_threshold * 100.0 * 1e6).round() / 1e6;
        let level = ((previous_pct - self.initial_threshold_pct) / self.threshold_step_pct).floor();
        let level = level.max(0.0) as u32;

        let amount = free_capital * self.initial_allocation * self.decay_rate.powi(level as i32);
        let new_threshold =
            (self.initial_threshold_pct + self.threshold_step_pct * (level as f64 + 1.0)) / 100.0;

        Ok(DcaStep {
            level,
            amount,
            new_threshold,
        })
    }
}
