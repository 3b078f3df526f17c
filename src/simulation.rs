//! Paper simulation
//!
//! Replays candles through a strategy the way a live host would drive it:
//! indicators and signals on every new candle, then the trade callbacks for
//! open positions. The simulator owns the host-side rules the strategy does
//! not: the native stop-loss, the ROI take-profit, liquidation and the paper
//! wallet.

use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::error::{EngineError, EngineResult};
use crate::frame::AnalyzedFrame;
use crate::host::{DataProvider, Wallet};
use crate::strategies::{AdjustmentContext, LeverageRequest};
use crate::{Candle, ClosedTrade, OpenTrade, Side, Strategy, Symbol, TradeId};

/// Exit reason used when the exchange liquidates a position
pub const LIQUIDATION_REASON: &str = "liquidation";
pub const STOP_LOSS_REASON: &str = "stop_loss";
pub const ROI_REASON: &str = "roi";
pub const END_OF_DATA_REASON: &str = "end_of_data";

// =============================================================================
// Host stand-ins
// =============================================================================

/// Stake-currency balance split into free and locked-in-trades
#[derive(Debug, Clone)]
pub struct PaperWallet {
    free: f64,
    locked: f64,
}

impl PaperWallet {
    pub fn new(balance: f64) -> Self {
        Self {
            free: balance,
            locked: 0.0,
        }
    }

    pub fn free(&self) -> f64 {
        self.free
    }

    fn lock(&mut self, stake: f64) {
        self.free -= stake;
        self.locked += stake;
    }

    fn release(&mut self, stake: f64, profit: f64) {
        self.locked -= stake;
        self.free += stake + profit;
    }
}

impl Wallet for PaperWallet {
    fn total_stake_amount(&self) -> EngineResult<f64> {
        let total = self.free + self.locked;
        if total.is_finite() {
            Ok(total)
        } else {
            Err(EngineError::Wallet(format!("balance is {}", total)))
        }
    }

    fn available_stake_amount(&self) -> EngineResult<f64> {
        if self.free.is_finite() {
            Ok(self.free.max(0.0))
        } else {
            Err(EngineError::Wallet(format!("free balance is {}", self.free)))
        }
    }
}

/// Latest analyzed frames plus informative candles visible up to `now`
#[derive(Debug, Default)]
pub struct FrameStore {
    frames: HashMap<Symbol, AnalyzedFrame>,
    informative: HashMap<(Symbol, String), Vec<Candle>>,
    whitelist: Vec<Symbol>,
    now: Option<DateTime<Utc>>,
}

impl FrameStore {
    pub fn new(whitelist: Vec<Symbol>, informative: HashMap<(Symbol, String), Vec<Candle>>) -> Self {
        Self {
            frames: HashMap::new(),
            informative,
            whitelist,
            now: None,
        }
    }

    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = Some(now);
    }

    pub fn insert_frame(&mut self, frame: AnalyzedFrame) {
        self.frames.insert(frame.pair.clone(), frame);
    }
}

impl DataProvider for FrameStore {
    fn analyzed_frame(&self, pair: &Symbol, timeframe: &str) -> Option<&AnalyzedFrame> {
        self.frames.get(pair).filter(|f| f.timeframe == timeframe)
    }

    fn pair_candles(&self, pair: &Symbol, timeframe: &str) -> &[Candle] {
        let Some(candles) = self.informative.get(&(pair.clone(), timeframe.to_string())) else {
            return &[];
        };
        match self.now {
            Some(now) => &candles[..candles.partition_point(|c| c.datetime <= now)],
            None => candles.as_slice(),
        }
    }

    fn whitelist(&self) -> Vec<Symbol> {
        self.whitelist.clone()
    }
}

// =============================================================================
// Results
// =============================================================================

/// Simulation output
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationResult {
    pub starting_balance: f64,
    pub final_balance: f64,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    /// Averaging entries actually filled
    pub averaging_events: usize,
    /// Callback decisions that came back degraded
    pub fallback_decisions: usize,
}

/// Aggregate statistics over the closed trades
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub mean_profit_ratio: f64,
    pub std_profit_ratio: f64,
    pub total_profit: f64,
    pub return_pct: f64,
    pub max_drawdown_pct: f64,
    pub averaging_events: usize,
    pub fallback_decisions: usize,
}

impl SimulationResult {
    pub fn summary(&self) -> SimulationSummary {
        let ratios: Vec<f64> = self.trades.iter().map(|t| t.profit_ratio).collect();
        let winning_trades = self.trades.iter().filter(|t| t.profit_abs > 0.0).count();
        let total_trades = self.trades.len();

        let mean_profit_ratio = if ratios.is_empty() {
            0.0
        } else {
            ratios.iter().mean()
        };
        let std_profit_ratio = if ratios.len() < 2 {
            0.0
        } else {
            ratios.iter().std_dev()
        };

        let mut peak = self.starting_balance;
        let mut max_drawdown = 0.0_f64;
        for &(_, equity) in &self.equity_curve {
            peak = peak.max(equity);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - equity) / peak);
            }
        }

        let total_profit = self.final_balance - self.starting_balance;
        SimulationSummary {
            total_trades,
            winning_trades,
            win_rate: if total_trades > 0 {
                winning_trades as f64 / total_trades as f64 * 100.0
            } else {
                0.0
            },
            mean_profit_ratio,
            std_profit_ratio,
            total_profit,
            return_pct: if self.starting_balance > 0.0 {
                total_profit / self.starting_balance * 100.0
            } else {
                0.0
            },
            max_drawdown_pct: max_drawdown * 100.0,
            averaging_events: self.averaging_events,
            fallback_decisions: self.fallback_decisions,
        }
    }
}

// =============================================================================
// Simulator
// =============================================================================

pub struct Simulator {
    strategy: Box<dyn Strategy>,
    settings: SimulationConfig,
    min_stake: f64,
    next_trade_id: i64,
}

impl Simulator {
    pub fn new(strategy: Box<dyn Strategy>, settings: SimulationConfig, min_stake: f64) -> Self {
        Simulator {
            strategy,
            settings,
            min_stake,
            next_trade_id: 1,
        }
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    /// Replay `data` (primary timeframe candles per pair, oldest first)
    pub fn run(
        &mut self,
        data: HashMap<Symbol, Vec<Candle>>,
        informative: HashMap<(Symbol, String), Vec<Candle>>,
    ) -> SimulationResult {
        let mut result = SimulationResult {
            starting_balance: self.settings.starting_balance,
            ..SimulationResult::default()
        };

        // Sort symbols for deterministic iteration order
        let mut series: Vec<(Symbol, Vec<Candle>)> = data.into_iter().collect();
        series.sort_by(|a, b| a.0 .0.cmp(&b.0 .0));

        let mut timestamps: Vec<DateTime<Utc>> = series
            .iter()
            .flat_map(|(_, candles)| candles.iter().map(|c| c.datetime))
            .collect();
        timestamps.sort();
        timestamps.dedup();

        if timestamps.is_empty() {
            warn!("No candles to simulate");
            return result;
        }

        let whitelist = series.iter().map(|(s, _)| s.clone()).collect();
        let mut provider = FrameStore::new(whitelist, informative);
        let mut wallet = PaperWallet::new(self.settings.starting_balance);
        let mut open: HashMap<Symbol, OpenTrade> = HashMap::new();
        let mut cursors = vec![0usize; series.len()];
        let lookback = self.settings.max_lookback.max(1);

        self.strategy.init();
        info!(
            "Simulating {} pairs over {} candles with {}",
            series.len(),
            timestamps.len(),
            self.strategy.name()
        );

        for now in &timestamps {
            provider.set_now(*now);

            for ((pair, candles), cursor) in series.iter().zip(cursors.iter_mut()) {
                let i = *cursor;
                if i >= candles.len() || candles[i].datetime != *now {
                    continue;
                }
                *cursor += 1;

                // Windowed slice: indicators only need recent history
                let start = i.saturating_sub(lookback - 1);
                let mut frame = self
                    .strategy
                    .populate_indicators(pair, &candles[start..=i])
                    .starting_at(start);
                self.strategy.populate_entry_trend(&mut frame, &provider);
                self.strategy.populate_exit_trend(&mut frame);
                provider.insert_frame(frame);

                let candle = &candles[i];
                match open.remove(pair) {
                    Some(mut trade) => {
                        let exit = self.manage_trade(
                            &mut trade,
                            candle,
                            &provider,
                            &mut wallet,
                            &mut result,
                        );
                        match exit {
                            Some((rate, reason)) => {
                                let closed =
                                    self.close_trade(trade, rate, *now, &reason, &mut wallet);
                                result.trades.push(closed);
                            }
                            None => {
                                open.insert(pair.clone(), trade);
                            }
                        }
                    }
                    None => {
                        let entered =
                            self.try_enter(pair, candle, &provider, &mut wallet, &mut result);
                        if let Some(trade) = entered {
                            open.insert(pair.clone(), trade);
                        }
                    }
                }
            }

            let unrealized: f64 = open
                .values()
                .map(|t| {
                    let close = provider
                        .analyzed_frame(&t.pair, self.strategy.timeframe())
                        .and_then(|f| f.last())
                        .map(|r| r.close())
                        .unwrap_or(t.entry_price);
                    t.stake_amount + t.calc_profit(close).max(-t.stake_amount)
                })
                .sum();
            result.equity_curve.push((*now, wallet.free() + unrealized));
        }

        // Close any remaining positions (sorted for deterministic order)
        let mut remaining: Vec<OpenTrade> = open.into_values().collect();
        remaining.sort_by_key(|t| t.id);
        for trade in remaining {
            let last = series
                .iter()
                .find(|(s, _)| *s == trade.pair)
                .and_then(|(_, candles)| candles.last());
            if let Some(last) = last {
                let (rate, time) = (last.close, last.datetime);
                let closed = self.close_trade(trade, rate, time, END_OF_DATA_REASON, &mut wallet);
                result.trades.push(closed);
            }
        }

        result.final_balance = wallet.free();
        info!(
            "Simulation finished: {} trades, {} averaging events, final balance {:.2}",
            result.trades.len(),
            result.averaging_events,
            result.final_balance
        );
        result
    }

    /// Evaluate exits then averaging for an open trade; returns the exit
    /// rate and reason when the trade closes on this candle
    fn manage_trade(
        &mut self,
        trade: &mut OpenTrade,
        candle: &Candle,
        provider: &FrameStore,
        wallet: &mut PaperWallet,
        result: &mut SimulationResult,
    ) -> Option<(f64, String)> {
        if let Some(liquidation) = trade.liquidation_price {
            if candle.low <= liquidation {
                warn!(trade_id = %trade.id, pair = %trade.pair, "Position liquidated at {}", liquidation);
                return Some((liquidation, LIQUIDATION_REASON.to_string()));
            }
        }

        if candle.low <= trade.stop_loss
            && self
                .strategy
                .confirm_trade_exit(trade, STOP_LOSS_REASON, trade.stop_loss)
        {
            return Some((trade.stop_loss, STOP_LOSS_REASON.to_string()));
        }

        let rate = candle.close;
        let profit = trade.calc_profit_ratio(rate);

        if let Some(reason) = self.strategy.custom_exit(trade, rate, profit) {
            if self.strategy.confirm_trade_exit(trade, &reason, rate) {
                return Some((rate, reason));
            }
        }

        if profit >= self.settings.minimal_roi
            && self.strategy.confirm_trade_exit(trade, ROI_REASON, rate)
        {
            return Some((rate, ROI_REASON.to_string()));
        }

        let exit_tag = provider
            .analyzed_frame(&trade.pair, self.strategy.timeframe())
            .and_then(|f| f.last())
            .filter(|row| row.exit_long)
            .and_then(|row| row.exit_tag.clone());
        if let Some(tag) = exit_tag {
            if self.strategy.confirm_trade_exit(trade, &tag, rate) {
                return Some((rate, tag));
            }
        }

        let ctx = AdjustmentContext {
            current_time: candle.datetime,
            current_rate: rate,
            current_profit: profit,
            min_stake: Some(self.min_stake),
            max_stake: wallet.free(),
        };
        let decision = self
            .strategy
            .adjust_trade_position(trade, &ctx, provider, &*wallet);
        if decision.is_fallback() {
            result.fallback_decisions += 1;
        }

        if let Some(amount) = decision.value() {
            let amount = amount.min(wallet.free());
            if amount >= self.min_stake {
                wallet.lock(amount);
                trade.add_entry(amount, rate);
                reprice_protection(trade, self.settings.stoploss);
                result.averaging_events += 1;
                debug!(
                    trade_id = %trade.id,
                    amount,
                    entry_price = trade.entry_price,
                    "Averaging entry filled"
                );
            } else {
                debug!(trade_id = %trade.id, amount, "Averaging stake below minimum, skipped");
            }
        }

        None
    }

    fn try_enter(
        &mut self,
        pair: &Symbol,
        candle: &Candle,
        provider: &FrameStore,
        wallet: &mut PaperWallet,
        result: &mut SimulationResult,
    ) -> Option<OpenTrade> {
        let row = provider
            .analyzed_frame(pair, self.strategy.timeframe())?
            .last()
            .filter(|row| row.enter_long)?;
        let entry_tag = row.enter_tag.clone();

        let stake = self.strategy.custom_stake_amount(self.min_stake, &*wallet);
        if stake.is_fallback() {
            result.fallback_decisions += 1;
        }
        let stake = stake.value();
        if !(stake > 0.0 && stake <= wallet.free()) {
            debug!(pair = %pair, stake, free = wallet.free(), "Insufficient balance for entry");
            return None;
        }

        let rate = candle.close;
        let request = LeverageRequest {
            pair,
            current_time: candle.datetime,
            current_rate: rate,
            proposed_leverage: 1.0,
            max_leverage: self.settings.max_leverage,
            entry_tag: entry_tag.as_deref(),
        };
        let leverage = self.strategy.leverage(&request);
        if leverage.is_fallback() {
            result.fallback_decisions += 1;
        }
        // Exchanges trade at 1x at the least
        let leverage = leverage.value().clamp(1.0, self.settings.max_leverage.max(1.0));

        let id = TradeId(self.next_trade_id);
        self.next_trade_id += 1;
        wallet.lock(stake);

        let mut trade = OpenTrade {
            id,
            pair: pair.clone(),
            side: Side::Long,
            open_time: candle.datetime,
            entry_price: rate,
            stake_amount: stake,
            leverage,
            stop_loss: 0.0,
            liquidation_price: None,
            entry_tag,
            entries: 1,
        };
        reprice_protection(&mut trade, self.settings.stoploss);

        info!(
            "{} ENTRY {} #{}: price={:.4} stake={:.2} leverage={:.2}",
            candle.datetime.format("%Y-%m-%d %H:%M"),
            pair,
            id,
            rate,
            stake,
            leverage
        );
        Some(trade)
    }

    fn close_trade(
        &mut self,
        trade: OpenTrade,
        rate: f64,
        close_time: DateTime<Utc>,
        reason: &str,
        wallet: &mut PaperWallet,
    ) -> ClosedTrade {
        // Losses are capped at the margin posted
        let profit_abs = trade.calc_profit(rate).max(-trade.stake_amount);
        wallet.release(trade.stake_amount, profit_abs);

        let closed = ClosedTrade {
            id: trade.id,
            pair: trade.pair.clone(),
            entry_price: trade.entry_price,
            exit_price: rate,
            stake_amount: trade.stake_amount,
            leverage: trade.leverage,
            open_time: trade.open_time,
            close_time,
            profit_ratio: if trade.stake_amount > 0.0 {
                profit_abs / trade.stake_amount
            } else {
                0.0
            },
            profit_abs,
            exit_reason: reason.to_string(),
            entries: trade.entries,
        };

        info!(
            "{} EXIT {} #{}: price={:.4} reason={} pnl={:.2}",
            close_time.format("%Y-%m-%d %H:%M"),
            closed.pair,
            closed.id,
            rate,
            reason,
            profit_abs
        );
        self.strategy.notify_trade(&closed);
        closed
    }
}

/// Move the host stop and the liquidation price to the current average entry
fn reprice_protection(trade: &mut OpenTrade, stoploss: f64) {
    let entry = trade.entry_price;
    let leverage = trade.leverage;
    trade.stop_loss = entry * (1.0 + stoploss / leverage);
    trade.liquidation_price = (leverage > 1.0).then(|| entry * (1.0 - 1.0 / leverage));
}
