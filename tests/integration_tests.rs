//! Integration tests for the DCA risk engine
//!
//! These tests drive the strategy through its host-facing callbacks the way a
//! host would, with paper wallets and in-memory or SQLite trade stores.

use std::collections::HashMap;

use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};

use dca_risk_engine::config::SimulationConfig;
use dca_risk_engine::daily_buy::exits::protective_exit;
use dca_risk_engine::daily_buy::{DailyBuyConfig, DailyBuyStrategy, EXIT_TAG};
use dca_risk_engine::frame::{AnalyzedCandle, AnalyzedFrame};
use dca_risk_engine::host::{InMemoryTradeStore, TradeDataStore, DCA_KEY, SL_KEY};
use dca_risk_engine::risk::{generate_dca_orders, DcaLadder, LeverageSelector};
use dca_risk_engine::simulation::{FrameStore, PaperWallet, Simulator};
use dca_risk_engine::state_manager::SqliteTradeStore;
use dca_risk_engine::strategies::{self, AdjustmentContext, LeverageRequest};
use dca_risk_engine::{
    Candle, Config, Decision, EngineError, OpenTrade, Side, Strategy, Symbol, TradeId,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn pair() -> Symbol {
    Symbol::new("ETH/USDT:USDT")
}

/// Generate mock candle data oscillating around `base_price`
fn generate_mock_candles(count: usize, base_price: f64, amplitude: f64) -> Vec<Candle> {
    let start_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    (0..count)
        .map(|i| {
            let phase = i as f64 / 12.0;
            let close = base_price + amplitude * phase.sin() - (i as f64 * 0.05);
            let open = close - amplitude * 0.1 * phase.cos();
            Candle {
                datetime: start_time + Duration::hours(i as i64),
                open,
                high: open.max(close) + amplitude * 0.2,
                low: open.min(close) - amplitude * 0.2,
                close,
                volume: 1000.0 + (i as f64 * 10.0),
            }
        })
        .collect()
}

/// Analyzed frame of flat candles whose last row sits at `last_index`
fn breakout_frame(last_index: usize, breached: bool) -> AnalyzedFrame {
    let start_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let rows = (0..=last_index)
        .map(|i| {
            let mut row = AnalyzedCandle::bare(Candle {
                datetime: start_time + Duration::hours(i as i64),
                open: 95.0,
                high: 96.0,
                low: 94.0,
                close: 95.0,
                volume: 100.0,
            });
            row.res_signal_breached = breached;
            row
        })
        .collect();
    AnalyzedFrame::new(pair(), "1h", rows)
}

fn provider_with(frame: AnalyzedFrame) -> FrameStore {
    let mut provider = FrameStore::new(vec![pair()], HashMap::new());
    provider.insert_frame(frame);
    provider
}

fn open_trade(id: i64, entry_price: f64, leverage: f64) -> OpenTrade {
    OpenTrade {
        id: TradeId(id),
        pair: pair(),
        side: Side::Long,
        open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        entry_price,
        stake_amount: 100.0,
        leverage,
        stop_loss: entry_price * 0.5,
        liquidation_price: None,
        entry_tag: Some("ALL_BUY".to_string()),
        entries: 1,
    }
}

fn adjustment(rate: f64, profit: f64) -> AdjustmentContext {
    AdjustmentContext {
        current_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        current_rate: rate,
        current_profit: profit,
        min_stake: Some(30.0),
        max_stake: 10_000.0,
    }
}

fn strategy_with(store: Box<dyn TradeDataStore>) -> DailyBuyStrategy {
    DailyBuyStrategy::new(DailyBuyConfig::default(), 30.0, store)
}

fn temp_db(name: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "dca_risk_engine_{}_{}.db",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

// =============================================================================
// Leverage
// =============================================================================

#[test]
fn test_leverage_monotonic_and_bounded() {
    let selector = LeverageSelector::default();

    for max_leverage in [1.0, 2.5, 10.0, 125.0] {
        let mut previous = f64::INFINITY;
        for step in 0..60 {
            let atr_percent = step as f64 * 0.05;
            let decision = selector.select(atr_percent, max_leverage);
            assert!(!decision.is_fallback());

            let leverage = decision.value();
            assert!(leverage >= 0.0);
            assert!(leverage <= max_leverage.min(selector.leverage_cap));
            assert!(
                leverage <= previous,
                "leverage rose from {} to {} at ATR {}%",
                previous,
                leverage,
                atr_percent
            );
            previous = leverage;
        }
    }
}

#[test]
fn test_leverage_through_strategy_uses_recorded_volatility() {
    let mut strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let candles = generate_mock_candles(120, 100.0, 5.0);
    strategy.populate_indicators(&pair(), &candles);

    let atr_percent = strategy.state().volatility(&pair()).unwrap();
    let expected = LeverageSelector::default().select(atr_percent, 20.0).value();

    let pair = pair();
    let request = LeverageRequest {
        pair: &pair,
        current_time: Utc::now(),
        current_rate: 100.0,
        proposed_leverage: 1.0,
        max_leverage: 20.0,
        entry_tag: Some("ALL_BUY"),
    };
    let decision = strategy.leverage(&request);
    assert!(!decision.is_fallback());
    assert_relative_eq!(decision.value(), expected, epsilon = 1e-12);
}

#[test]
fn test_leverage_fallback_is_clamped() {
    let selector = LeverageSelector::default();
    let decision = selector.select(f64::NAN, 1.5);
    assert!(decision.is_fallback());
    assert_relative_eq!(decision.value(), 1.5);
}

// =============================================================================
// Stake sizing and order schedule
// =============================================================================

#[test]
fn test_stake_floor_end_to_end() {
    let strategy = strategy_with(Box::new(InMemoryTradeStore::new()));

    // 1000 * 0.5 / 2 / 11 is about 22.7, under the exchange minimum
    let small = strategy.custom_stake_amount(50.0, &PaperWallet::new(1000.0));
    assert!(!small.is_fallback());
    assert_relative_eq!(small.value(), 30.0);

    let large = strategy.custom_stake_amount(50.0, &PaperWallet::new(22_000.0));
    assert_relative_eq!(large.value(), 500.0, epsilon = 1e-9);
}

#[test]
fn test_stake_falls_back_to_minimum_on_bad_balance() {
    let strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let decision = strategy.custom_stake_amount(50.0, &PaperWallet::new(f64::NAN));
    assert!(decision.is_fallback());
    assert_relative_eq!(decision.value(), 30.0);
}

#[test]
fn test_order_schedule_properties() {
    let (total, currencies, steps, increment, min_stake) = (10_000.0, 2, 6, 1.5, 30.0);
    let decision = generate_dca_orders(total, currencies, steps, increment, min_stake);
    assert!(!decision.is_fallback());

    let orders = decision.value();
    assert_eq!(orders.len(), steps + 1);
    assert!(orders.iter().all(|&o| o >= min_stake));
    for pair in orders.windows(2) {
        assert_relative_eq!(pair[1] / pair[0], increment, epsilon = 1e-3);
    }

    // Orders are truncated to cents, so the pool is never exceeded
    let committed: f64 = orders.iter().sum::<f64>() * currencies as f64;
    assert!(committed <= total, "committed {} of {}", committed, total);
    assert!(committed > total * 0.99);
}

#[test]
fn test_order_schedule_fallback_on_zero_currencies() {
    let decision = generate_dca_orders(1000.0, 0, 2, 1.5, 0.0);
    assert!(decision.is_fallback());
    assert_eq!(decision.value(), vec![1.0, 1.5, 2.25]);
}

// =============================================================================
// Averaging ladder
// =============================================================================

#[test]
fn test_ladder_first_and_second_level() {
    let ladder = DcaLadder::default();

    let first = ladder.next_step(1000.0, 0.01).unwrap();
    assert_eq!(first.level, 0);
    assert_relative_eq!(first.amount, 200.0, epsilon = 1e-9);
    assert_relative_eq!(first.new_threshold, 0.03, epsilon = 1e-12);

    let second = ladder.next_step(1000.0, first.new_threshold).unwrap();
    assert_eq!(second.level, 1);
    assert_relative_eq!(second.amount, 160.0, epsilon = 1e-9);
    assert_relative_eq!(second.new_threshold, 0.05, epsilon = 1e-12);
}

#[test]
fn test_ladder_rejects_threshold_below_floor() {
    let ladder = DcaLadder::default();
    let err = ladder.next_step(1000.0, 0.005).unwrap_err();
    assert!(matches!(err, EngineError::ThresholdBelowFloor { .. }));
}

// =============================================================================
// Averaging trigger
// =============================================================================

#[test]
fn test_averaging_triggers_and_widens_threshold() {
    let mut strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let trade = open_trade(1, 100.0, 1.0);
    let provider = provider_with(breakout_frame(3, true));
    let wallet = PaperWallet::new(1000.0);

    let decision =
        strategy.adjust_trade_position(&trade, &adjustment(95.0, -0.05), &provider, &wallet);
    assert!(!decision.is_fallback());
    assert_relative_eq!(decision.value().unwrap(), 200.0, epsilon = 1e-9);

    assert_relative_eq!(strategy.state().threshold(&pair()), 0.03, epsilon = 1e-12);
    assert_eq!(strategy.state().averaging_entries(&trade), vec![95.0]);
    assert_relative_eq!(strategy.state().protective_stop(&trade), 95.0 * 0.75);
}

#[test]
fn test_averaging_refusal_is_idempotent() {
    let mut strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let trade = open_trade(2, 100.0, 1.0);
    let wallet = PaperWallet::new(1000.0);

    // Off cadence, then no breakout: neither may touch state
    for provider in [
        provider_with(breakout_frame(4, true)),
        provider_with(breakout_frame(6, false)),
    ] {
        for _ in 0..3 {
            let decision = strategy.adjust_trade_position(
                &trade,
                &adjustment(95.0, -0.05),
                &provider,
                &wallet,
            );
            assert!(matches!(decision, Decision::Computed(None)));
        }
    }

    assert!(!strategy.state().has_threshold(&pair()));
    assert!(strategy.state().averaging_entries(&trade).is_empty());
    assert_relative_eq!(strategy.state().protective_stop(&trade), trade.stop_loss);
}

#[test]
fn test_second_averaging_needs_lower_price() {
    let mut strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let trade = open_trade(3, 100.0, 1.0);
    let provider = provider_with(breakout_frame(3, true));
    let wallet = PaperWallet::new(1000.0);

    let first =
        strategy.adjust_trade_position(&trade, &adjustment(95.0, -0.05), &provider, &wallet);
    assert!(first.value().is_some());

    // 94.5 is not below 99% of 95
    let repeat =
        strategy.adjust_trade_position(&trade, &adjustment(94.5, -0.10), &provider, &wallet);
    assert!(matches!(repeat, Decision::Computed(None)));

    let deeper =
        strategy.adjust_trade_position(&trade, &adjustment(90.0, -0.10), &provider, &wallet);
    assert_relative_eq!(deeper.value().unwrap(), 160.0, epsilon = 1e-9);
    assert_eq!(strategy.state().averaging_entries(&trade), vec![95.0, 90.0]);
}

// =============================================================================
// Exits
// =============================================================================

#[test]
fn test_protective_exit_boundaries() {
    assert!(protective_exit(100.0, None, 99.0).is_some());
    assert!(protective_exit(100.0, None, 101.0).is_none());
    assert!(protective_exit(80.0, Some(89.0), 101.0).is_none());
    assert!(protective_exit(80.0, Some(95.0), 101.0).is_some());
}

#[test]
fn test_custom_exit_uses_recorded_stop() {
    let mut store = InMemoryTradeStore::new();
    store.set(TradeId(4), SL_KEY, serde_json::json!(90.0)).unwrap();
    let mut strategy = strategy_with(Box::new(store));
    let trade = open_trade(4, 100.0, 1.0);

    assert!(strategy.custom_exit(&trade, 91.0, -0.09).is_none());
    let reason = strategy.custom_exit(&trade, 89.0, -0.11).unwrap();
    assert!(reason.starts_with("custom_stop_loss_"));

    // The gate only passes forced exits at a loss
    strategy.state_mut().set_threshold(&pair(), 0.03);
    assert!(!strategy.confirm_trade_exit(&trade, &reason, 89.0));
    assert!(strategy.state().has_threshold(&pair()));
}

#[test]
fn test_confirm_exit_profit_gate_and_threshold_reset() {
    let mut strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let trade = open_trade(5, 100.0, 1.0);
    strategy.state_mut().set_threshold(&pair(), 0.05);

    assert!(!strategy.confirm_trade_exit(&trade, EXIT_TAG, 100.3));
    assert!(strategy.state().has_threshold(&pair()));

    assert!(strategy.confirm_trade_exit(&trade, EXIT_TAG, 100.6));
    assert!(!strategy.state().has_threshold(&pair()));
}

#[test]
fn test_confirm_exit_forced_at_a_loss() {
    let mut strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let trade = open_trade(6, 100.0, 1.0);

    assert!(strategy.confirm_trade_exit(&trade, "force_exit", 80.0));
    assert!(!strategy.confirm_trade_exit(&trade, "roi", 99.0));
    assert!(!strategy.confirm_trade_exit(&trade, "stop_loss", 60.0));
}

// =============================================================================
// Registry, persistence and simulation
// =============================================================================

#[test]
fn test_registry_creates_daily_buy() {
    assert!(strategies::available_strategies().contains(&"daily_buy"));

    let mut config = Config::default();
    config.set_strategy_param("variant", serde_json::json!("4h"));
    let strategy =
        strategies::create_strategy(&config, Box::new(InMemoryTradeStore::new())).unwrap();
    assert_eq!(strategy.name(), "daily_buy");
    assert_eq!(strategy.timeframe(), "4h");

    config.strategy_name = "does_not_exist".to_string();
    assert!(strategies::create_strategy(&config, Box::new(InMemoryTradeStore::new())).is_err());
}

#[test]
fn test_sqlite_records_survive_restart() {
    let path = temp_db("restart");
    let trade = open_trade(7, 100.0, 1.0);

    {
        let store = SqliteTradeStore::new(&path, None).unwrap();
        let mut strategy = strategy_with(Box::new(store));
        let provider = provider_with(breakout_frame(3, true));
        let decision = strategy.adjust_trade_position(
            &trade,
            &adjustment(95.0, -0.05),
            &provider,
            &PaperWallet::new(1000.0),
        );
        assert!(decision.value().is_some());
    }

    let store = SqliteTradeStore::new(&path, None).unwrap();
    assert_eq!(
        store.get(TradeId(7), DCA_KEY).unwrap(),
        Some(serde_json::json!([95.0]))
    );
    let strategy = strategy_with(Box::new(store));
    assert_relative_eq!(strategy.state().protective_stop(&trade), 95.0 * 0.75);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_simulation_smoke() {
    let strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let settings = SimulationConfig {
        starting_balance: 5_000.0,
        ..SimulationConfig::default()
    };

    let mut data = HashMap::new();
    data.insert(pair(), generate_mock_candles(400, 100.0, 8.0));

    let mut simulator = Simulator::new(Box::new(strategy), settings, 30.0);
    let result = simulator.run(data, HashMap::new());

    assert_relative_eq!(result.starting_balance, 5_000.0);
    assert!(result.final_balance.is_finite());
    assert!(!result.equity_curve.is_empty());
    assert!(result.equity_curve.len() <= 400);
    assert!(result.trades.iter().all(|t| !t.exit_reason.is_empty()));
    assert!(result.trades.iter().all(|t| t.close_time >= t.open_time));

    let summary = result.summary();
    assert_eq!(summary.total_trades, result.trades.len());
    assert!(summary.win_rate >= 0.0 && summary.win_rate <= 100.0);
}

#[test]
fn test_simulation_empty_data() {
    let strategy = strategy_with(Box::new(InMemoryTradeStore::new()));
    let mut simulator = Simulator::new(Box::new(strategy), SimulationConfig::default(), 30.0);
    let result = simulator.run(HashMap::new(), HashMap::new());

    assert!(result.trades.is_empty());
    assert_eq!(result.summary().total_trades, 0);
}
