//! Averaging (DCA) trigger
//!
//! Evaluated once per candle for each open trade. A chain of guards decides
//! whether the trade may be averaged down now; when all pass, the entry is
//! recorded, the protective stop moves under it and the ladder sizes the
//! additional stake.

use std::fmt;
use tracing::{debug, error, info};

use crate::frame::AnalyzedFrame;
use crate::host::Wallet;
use crate::risk::DcaLadder;
use crate::state::EngineState;
use crate::strategies::AdjustmentContext;
use crate::{Decision, OpenTrade};

/// Price must be below this share of the previous averaging price
pub const REENTRY_DISCOUNT: f64 = 0.99;

/// Why an averaging evaluation took no action
#[derive(Debug, Clone, PartialEq)]
pub enum Refusal {
    /// Price has not fallen far enough below the previous averaging entry
    AboveLastEntry { last_entry: f64, price: f64 },
    /// Drawdown has not reached the pair threshold yet
    InsufficientDrawdown { profit: f64, threshold: f64 },
    NoCandles,
    /// Averaging only runs on every n-th candle
    OffCadence { index: usize, cadence: usize },
    /// Latest candle did not break above resistance
    NoBreakout,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::AboveLastEntry { last_entry, price } => write!(
                f,
                "price {} not below {:.0}% of last averaging entry {}",
                price,
                REENTRY_DISCOUNT * 100.0,
                last_entry
            ),
            Refusal::InsufficientDrawdown { profit, threshold } => {
                write!(f, "profit {:.4} has not reached -{:.4}", profit, threshold)
            }
            Refusal::NoCandles => write!(f, "no analyzed candles"),
            Refusal::OffCadence { index, cadence } => {
                write!(f, "candle {} is off the {}-candle cadence", index, cadence)
            }
            Refusal::NoBreakout => write!(f, "resistance not breached"),
        }
    }
}

/// Averaging parameters
#[derive(Debug, Clone)]
pub struct AveragingRules {
    pub cadence: usize,
    /// Protective stop as a fraction of the averaging price
    pub stop_coefficient: f64,
    pub ladder: DcaLadder,
}

impl AveragingRules {
    /// Run the guards in order, returning the pair threshold when all pass
    pub fn check(
        &self,
        state: &EngineState,
        trade: &OpenTrade,
        ctx: &AdjustmentContext,
        frame: Option<&AnalyzedFrame>,
    ) -> Result<f64, Refusal> {
        let price = ctx.current_rate;

        if let Some(&last_entry) = state.averaging_entries(trade).last() {
            let discounted = price < last_entry * REENTRY_DISCOUNT;
            if !discounted {
                return Err(Refusal::AboveLastEntry { last_entry, price });
            }
        }

        let threshold = state.threshold(&trade.pair);
        let drawn_down = ctx.current_profit < -threshold;
        if !drawn_down {
            return Err(Refusal::InsufficientDrawdown {
                profit: ctx.current_profit,
                threshold,
            });
        }

        let (Some(frame), Some(index)) = (frame, frame.and_then(|f| f.last_index())) else {
            return Err(Refusal::NoCandles);
        };

        if self.cadence == 0 || index % self.cadence != 0 {
            return Err(Refusal::OffCadence {
                index,
                cadence: self.cadence,
            });
        }

        if !frame.last().map(|row| row.res_signal_breached).unwrap_or(false) {
            return Err(Refusal::NoBreakout);
        }

        Ok(threshold)
    }

    /// Evaluate one averaging opportunity.
    ///
    /// The entry and the moved stop are persisted before the ladder runs, so a
    /// failed capital lookup still leaves them recorded; that path comes back
    /// as a fallback with no stake.
    pub fn evaluate(
        &self,
        state: &mut EngineState,
        trade: &OpenTrade,
        ctx: &AdjustmentContext,
        frame: Option<&AnalyzedFrame>,
        wallet: &dyn Wallet,
    ) -> Decision<Option<f64>> {
        let threshold = match self.check(state, trade, ctx, frame) {
            Ok(threshold) => threshold,
            Err(refusal) => {
                debug!(trade_id = %trade.id, pair = %trade.pair, "No averaging: {}", refusal);
                return Decision::Computed(None);
            }
        };

        let stop = match state.record_averaging(trade, ctx.current_rate, self.stop_coefficient) {
            Ok(stop) => stop,
            Err(e) => {
                error!(trade_id = %trade.id, "Failed to record averaging entry: {}", e);
                return Decision::fallback(None, e.to_string());
            }
        };

        let step = wallet
            .available_stake_amount()
            .and_then(|free| self.ladder.next_step(free, threshold));

        match step {
            Ok(step) => {
                state.set_threshold(&trade.pair, step.new_threshold);
                info!(
                    trade_id = %trade.id,
                    pair = %trade.pair,
                    price = ctx.current_rate,
                    level = step.level,
                    amount = step.amount,
                    stop,
                    next_threshold = step.new_threshold,
                    "Averaging triggered"
                );
                Decision::Computed(Some(step.amount))
            }
            Err(e) => {
                error!(
                    trade_id = %trade.id,
                    pair = %trade.pair,
                    "Averaging recorded but stake not sized: {}",
                    e
                );
                Decision::fallback(None, e.to_string())
            }
        }
    }
}
