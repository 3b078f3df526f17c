//! Daily Buy Strategy Implementation

use tracing::{debug, info};

use super::averaging::AveragingRules;
use super::config::DailyBuyConfig;
use super::exits::{protective_exit, ExitKind};
use super::{informative_timeframe, ENTRY_TAG, EXIT_TAG, NAME, TIMEFRAME_HIERARCHY};
use crate::frame::{align_nearest_close, AnalyzedCandle, AnalyzedFrame};
use crate::host::{DataProvider, TradeDataStore, Wallet};
use crate::indicators::{
    atr, bollinger_bands, cumulative_max, ema, macd, pivots, rolling_max, rolling_min, rsi, shift,
};
use crate::risk::{atr_percent_or_neutral, LeverageSelector, StakeSizer, NEUTRAL_ATR_PERCENT};
use crate::state::EngineState;
use crate::strategies::{AdjustmentContext, LeverageRequest, Strategy};
use crate::{Candle, Decision, OpenTrade, Symbol};

const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BB_PERIOD: usize = 20;
const BB_STD: f64 = 2.0;

fn at(series: &[Option<f64>], i: usize) -> Option<f64> {
    series.get(i).copied().flatten()
}

/// Trend Trigger Factor; undefined when both powers cancel out
fn trend_trigger(buy_power: Option<f64>, sell_power: Option<f64>) -> Option<f64> {
    let (buy, sell) = (buy_power?, sell_power?);
    let total = buy + sell;
    if total == 0.0 || !total.is_finite() {
        return None;
    }
    Some(200.0 * (buy - sell) / total)
}

pub struct DailyBuyStrategy {
    config: DailyBuyConfig,
    state: EngineState,
    leverage: LeverageSelector,
    sizer: StakeSizer,
    averaging: AveragingRules,
}

impl DailyBuyStrategy {
    pub fn new(config: DailyBuyConfig, min_stake: f64, store: Box<dyn TradeDataStore>) -> Self {
        let averaging = AveragingRules {
            cadence: config.dca_candles_modulo,
            stop_coefficient: config.new_sl_coef,
            ladder: config.dca_ladder(),
        };
        DailyBuyStrategy {
            state: EngineState::new(store, config.dca_threshold),
            leverage: config.leverage_selector(),
            sizer: config.stake_sizer(min_stake),
            averaging,
            config,
        }
    }

    pub fn config(&self) -> &DailyBuyConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    fn analyze(&self, pair: &Symbol, candles: &[Candle]) -> AnalyzedFrame {
        let cfg = &self.config;
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let typical: Vec<f64> = candles.iter().map(|c| c.typical_price()).collect();

        let rsi = rsi(&close, RSI_PERIOD);
        let (macd_line, macd_signal, _) = macd(&close, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let ema_short = ema(&close, cfg.buy_ema_short);
        let ema_long = ema(&close, cfg.buy_ema_long);
        let max_since_buy = cumulative_max(&high);
        let atr = atr(&high, &low, &close, ATR_PERIOD);
        let (pivot, r1, s1) = pivots(&high, &low, &close);
        let swing_low = rolling_min(&low, cfg.swing_window, cfg.swing_min_periods);
        let swing_high = rolling_max(&high, cfg.swing_window, cfg.swing_min_periods);
        let (bb_upper, bb_middle, bb_lower) = bollinger_bands(&typical, BB_PERIOD, BB_STD);

        let lookback = cfg.lookback_length;
        let hh = rolling_max(&close, lookback, lookback);
        let ll = rolling_min(&close, lookback, lookback);
        let hh_lagged = shift(&hh, lookback);
        let ll_lagged = shift(&ll, lookback);

        let rows = candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                let mut row = AnalyzedCandle::bare(candle.clone());
                let previous_close = i.checked_sub(1).map(|p| close[p]);

                row.rsi = at(&rsi, i);
                row.macd = at(&macd_line, i);
                row.macd_signal = at(&macd_signal, i);
                row.ema_short = at(&ema_short, i);
                row.ema_long = at(&ema_long, i);
                row.previous_close = previous_close;
                row.max_since_buy = max_since_buy[i];
                row.atr = at(&atr, i);
                row.atr_percent = row
                    .atr
                    .filter(|_| candle.close > 0.0)
                    .map(|a| a / candle.close * 100.0);
                row.pivot_point = at(&pivot, i);
                row.resistance_1 = at(&r1, i);
                row.support_1 = at(&s1, i);
                row.swing_low = at(&swing_low, i);
                row.swing_high = at(&swing_high, i);
                row.res_signal_breached = match (row.resistance_1, previous_close) {
                    (Some(r1), Some(prev)) => candle.close > r1 && candle.close > prev,
                    _ => false,
                };
                row.bb_lower = at(&bb_lower, i);
                row.bb_middle = at(&bb_middle, i);
                row.bb_upper = at(&bb_upper, i);
                row.hh = at(&hh, i);
                row.ll = at(&ll, i);
                row.buy_power = row.hh.zip(at(&ll_lagged, i)).map(|(h, l)| h - l);
                row.sell_power = at(&hh_lagged, i).zip(row.ll).map(|(h, l)| h - l);
                row.ttf = trend_trigger(row.buy_power, row.sell_power);
                row
            })
            .collect();

        AnalyzedFrame::new(pair.clone(), cfg.timeframe.clone(), rows)
    }
}

impl Strategy for DailyBuyStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn timeframe(&self) -> &str {
        &self.config.timeframe
    }

    fn informative_pairs(&self, whitelist: &[Symbol]) -> Vec<(Symbol, String)> {
        whitelist
            .iter()
            .flat_map(|pair| {
                TIMEFRAME_HIERARCHY
                    .iter()
                    .map(move |(tf, _)| (pair.clone(), tf.to_string()))
            })
            .collect()
    }

    fn populate_indicators(&mut self, pair: &Symbol, candles: &[Candle]) -> AnalyzedFrame {
        let frame = self.analyze(pair, candles);

        if let Some(last) = frame.last() {
            let atr_percent = atr_percent_or_neutral(last.atr, last.close());
            self.state.record_volatility(pair, atr_percent);
            debug!(pair = %pair, atr_percent, "Volatility updated");
        }

        frame
    }

    fn populate_entry_trend(&self, frame: &mut AnalyzedFrame, data: &dyn DataProvider) {
        let informative = informative_timeframe(&self.config.timeframe)
            .map(|tf| (tf, data.pair_candles(&frame.pair, tf)));

        // Previous informative close aligned onto each primary row
        let reference = match informative {
            Some((_, candles)) if !candles.is_empty() => {
                Some(shift(&align_nearest_close(&frame.datetimes(), candles), 1))
            }
            Some((tf, _)) => {
                info!(
                    "No data available for {} in '{}' timeframe. Skipping this condition.",
                    frame.pair, tf
                );
                None
            }
            None => None,
        };

        for (i, row) in frame.rows_mut().iter_mut().enumerate() {
            let below_reference = match &reference {
                Some(series) => matches!(at(series, i), Some(prev) if row.close() < prev),
                None => true,
            };
            if below_reference && row.candle.volume > 0.0 {
                row.enter_long = true;
                row.enter_tag = Some(ENTRY_TAG.to_string());
            }
        }
    }

    fn populate_exit_trend(&self, frame: &mut AnalyzedFrame) {
        let lower_trigger = self.config.lower_trigger_level;

        for row in frame.rows_mut() {
            let close = row.close();
            let above_swing = matches!(row.swing_high, Some(h) if close > h);
            let bearish_cross = matches!(
                (row.macd, row.macd_signal, row.ema_short, row.ema_long),
                (Some(m), Some(s), Some(fast), Some(slow)) if m < s && fast < slow
            );
            let trend_broken = matches!(row.ttf, Some(ttf) if ttf < lower_trigger);

            if (above_swing || bearish_cross || trend_broken) && row.candle.volume > 0.0 {
                row.exit_long = true;
                row.exit_tag = Some(EXIT_TAG.to_string());
            }
        }
    }

    fn leverage(&self, request: &LeverageRequest<'_>) -> Decision<f64> {
        let atr_percent = self
            .state
            .volatility(request.pair)
            .unwrap_or(NEUTRAL_ATR_PERCENT);
        let decision = self.leverage.select(atr_percent, request.max_leverage);
        debug!(
            pair = %request.pair,
            atr_percent,
            leverage = *decision.as_value(),
            "Leverage selected"
        );
        decision
    }

    fn custom_stake_amount(&self, _proposed_stake: f64, wallet: &dyn Wallet) -> Decision<f64> {
        self.sizer.size(wallet.total_stake_amount())
    }

    fn adjust_trade_position(
        &mut self,
        trade: &OpenTrade,
        ctx: &AdjustmentContext,
        data: &dyn DataProvider,
        wallet: &dyn Wallet,
    ) -> Decision<Option<f64>> {
        let frame = data.analyzed_frame(&trade.pair, &self.config.timeframe);
        self.averaging
            .evaluate(&mut self.state, trade, ctx, frame, wallet)
    }

    fn custom_exit(
        &self,
        trade: &OpenTrade,
        current_rate: f64,
        _current_profit: f64,
    ) -> Option<String> {
        let stop = self.state.protective_stop(trade);
        let reason = protective_exit(stop, trade.liquidation_price, current_rate);
        if let Some(reason) = &reason {
            info!(
                trade_id = %trade.id,
                pair = %trade.pair,
                rate = current_rate,
                stop,
                liquidation = ?trade.liquidation_price,
                "Protective exit: {}",
                reason
            );
        }
        reason
    }

    fn confirm_trade_exit(&mut self, trade: &OpenTrade, exit_reason: &str, rate: f64) -> bool {
        let profit_ratio = trade.calc_profit_ratio(rate);
        let kind = ExitKind::classify(exit_reason, EXIT_TAG);

        if !kind.allows(profit_ratio, self.config.min_exit_profit) {
            debug!(
                trade_id = %trade.id,
                reason = exit_reason,
                profit_ratio,
                "Exit rejected"
            );
            return false;
        }

        if let Some(threshold) = self.state.clear_threshold(&trade.pair) {
            debug!(pair = %trade.pair, threshold, "Pair threshold reset");
        }
        info!(
            trade_id = %trade.id,
            pair = %trade.pair,
            reason = exit_reason,
            kind = ?kind,
            profit_ratio,
            "Exit confirmed"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryTradeStore;
    use crate::simulation::FrameStore;
    use crate::{Side, TradeId};
    use std::collections::HashMap;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn strategy() -> DailyBuyStrategy {
        DailyBuyStrategy::new(
            DailyBuyConfig::default(),
            30.0,
            Box::new(InMemoryTradeStore::new()),
        )
    }

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                datetime: base + Duration::hours(i as i64),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 100.0,
            })
            .collect()
    }

    fn trade(rate: f64) -> OpenTrade {
        OpenTrade {
            id: TradeId(9),
            pair: Symbol::new("BTC/USDT"),
            side: Side::Long,
            open_time: Utc::now(),
            entry_price: rate,
            stake_amount: 100.0,
            leverage: 1.0,
            stop_loss: rate * 0.5,
            liquidation_price: None,
            entry_tag: Some(ENTRY_TAG.to_string()),
            entries: 1,
        }
    }

    #[test]
    fn test_trend_trigger() {
        assert_eq!(trend_trigger(Some(3.0), Some(1.0)), Some(100.0));
        assert_eq!(trend_trigger(Some(1.0), Some(-1.0)), None);
        assert_eq!(trend_trigger(None, Some(1.0)), None);
    }

    #[test]
    fn test_indicators_record_volatility() {
        let mut s = strategy();
        let pair = Symbol::new("BTC/USDT");
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();

        let frame = s.populate_indicators(&pair, &candles(&closes));
        assert_eq!(frame.len(), 120);

        let last = frame.last().unwrap();
        assert!(last.rsi.is_some());
        assert!(last.ema_long.is_some());
        assert!(last.swing_high.is_some());
        assert!(last.ttf.is_some());
        assert_relative_eq!(
            s.state().volatility(&pair).unwrap(),
            last.atr.unwrap() / last.close() * 100.0
        );
    }

    #[test]
    fn test_empty_candles() {
        let mut s = strategy();
        let pair = Symbol::new("BTC/USDT");
        let frame = s.populate_indicators(&pair, &[]);
        assert!(frame.is_empty());
        assert_eq!(s.state().volatility(&pair), None);
    }

    fn bare_frame(pair: &Symbol, closes: &[f64]) -> AnalyzedFrame {
        let rows = candles(closes).into_iter().map(AnalyzedCandle::bare).collect();
        AnalyzedFrame::new(pair.clone(), "1h", rows)
    }

    #[test]
    fn test_entry_without_informative_data() {
        let s = strategy();
        let pair = Symbol::new("BTC/USDT");
        let mut frame = bare_frame(&pair, &[100.0, 101.0, 102.0]);
        frame.rows_mut()[1].candle.volume = 0.0;

        let provider = FrameStore::new(vec![pair.clone()], HashMap::new());
        s.populate_entry_trend(&mut frame, &provider);

        let flags: Vec<bool> = frame.rows().iter().map(|r| r.enter_long).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(frame.rows()[0].enter_tag.as_deref(), Some(ENTRY_TAG));
        assert_eq!(frame.rows()[1].enter_tag, None);
    }

    #[test]
    fn test_entry_below_previous_informative_close() {
        let s = strategy();
        let pair = Symbol::new("BTC/USDT");
        let mut frame = bare_frame(&pair, &[95.0, 95.0, 105.0, 95.0, 95.0, 85.0, 95.0, 85.0]);

        // 4h closes at hours 0 and 4, aligned then lagged by one row:
        // [-, 100, 100, 100, 90, 90, 90, 90]
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let informative: Vec<Candle> = [(0, 100.0), (4, 90.0)]
            .iter()
            .map(|&(h, c)| Candle {
                datetime: base + Duration::hours(h),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 10.0,
            })
            .collect();
        let mut series = HashMap::new();
        series.insert((pair.clone(), "4h".to_string()), informative);
        let provider = FrameStore::new(vec![pair.clone()], series);

        s.populate_entry_trend(&mut frame, &provider);

        let flags: Vec<bool> = frame.rows().iter().map(|r| r.enter_long).collect();
        assert_eq!(
            flags,
            vec![false, true, false, true, false, true, false, true]
        );
    }

    #[test]
    fn test_exit_conditions() {
        let s = strategy();
        let pair = Symbol::new("BTC/USDT");
        let mut frame = bare_frame(&pair, &[95.0; 5]);
        {
            let rows = frame.rows_mut();
            rows[0].ttf = Some(-150.0);
            rows[1].ttf = Some(-150.0);
            rows[1].candle.volume = 0.0;
            rows[2].swing_high = Some(90.0);
            for row in rows[3..].iter_mut() {
                row.macd = Some(-1.0);
                row.macd_signal = Some(0.0);
                row.ema_long = Some(100.0);
            }
            rows[3].ema_short = Some(99.0);
            rows[4].ema_short = Some(101.0);
        }

        s.populate_exit_trend(&mut frame);

        let flags: Vec<bool> = frame.rows().iter().map(|r| r.exit_long).collect();
        assert_eq!(flags, vec![true, false, true, true, false]);
        assert_eq!(frame.rows()[3].exit_tag.as_deref(), Some(EXIT_TAG));
    }

    #[test]
    fn test_informative_pairs_cover_hierarchy() {
        let s = strategy();
        let pairs = s.informative_pairs(&[Symbol::new("BTC/USDT"), Symbol::new("ETH/USDT")]);
        assert_eq!(pairs.len(), 2 * TIMEFRAME_HIERARCHY.len());
        assert!(pairs.contains(&(Symbol::new("ETH/USDT"), "4h".to_string())));
    }

    #[test]
    fn test_leverage_without_volatility_uses_neutral() {
        let s = strategy();
        let pair = Symbol::new("BTC/USDT");
        let request = LeverageRequest {
            pair: &pair,
            current_time: Utc::now(),
            current_rate: 100.0,
            proposed_leverage: 1.0,
            max_leverage: 10.0,
            entry_tag: None,
        };
        // Neutral 1.0% -> base 3 * 0.6
        assert_relative_eq!(s.leverage(&request).value(), 1.8, epsilon = 1e-9);
    }

    #[test]
    fn test_confirm_clears_threshold() {
        let mut s = strategy();
        let t = trade(100.0);
        s.state_mut().set_threshold(&t.pair, 0.05);

        // 100.3 -> 0.3% profit, rejected
        assert!(!s.confirm_trade_exit(&t, EXIT_TAG, 100.3));
        assert!(s.state().has_threshold(&t.pair));

        // 100.6 -> 0.6% profit, confirmed
        assert!(s.confirm_trade_exit(&t, EXIT_TAG, 100.6));
        assert!(!s.state().has_threshold(&t.pair));
    }

    #[test]
    fn test_custom_exit_uses_host_stop_until_averaged() {
        let mut s = strategy();
        let t = trade(100.0);

        assert_eq!(s.custom_exit(&t, 60.0, -0.4), None);
        assert!(s.custom_exit(&t, 49.0, -0.51).is_some());

        s.state_mut().record_averaging(&t, 90.0, 0.75).unwrap();
        let reason = s.custom_exit(&t, 67.0, -0.33).unwrap();
        assert_eq!(reason, "custom_stop_loss_67.5");
    }

    #[test]
    fn test_protective_exit_reason_rejected_at_a_loss() {
        let mut s = strategy();
        let t = trade(100.0);
        s.state_mut().set_threshold(&t.pair, 0.05);

        assert!(!s.confirm_trade_exit(&t, "custom_stop_loss_67.5", 67.0));
        assert!(s.state().has_threshold(&t.pair));
        assert_relative_eq!(s.state().threshold(&t.pair), 0.05);
    }
}
