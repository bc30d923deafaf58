//! Integration tests for the crossover trading system
//!
//! These tests verify that the components work together: signals through
//! the broker to fills, persisted positions, the trailing-stop lifecycle,
//! and the trade audit log.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crossover_bot::backtest::Backtester;
use crossover_bot::broker::Broker;
use crossover_bot::data::PriceSeries;
use crossover_bot::exchange::{ExchangeClient, PaperExchange};
use crossover_bot::indicators::compute_atr_series;
use crossover_bot::monitor::LogMetrics;
use crossover_bot::notify::LogNotifier;
use crossover_bot::positions::{JsonPositionStore, MemoryStore, PositionManager};
use crossover_bot::risk::PositionSizer;
use crossover_bot::signal::{SignalCache, SignalGenerator};
use crossover_bot::stops::StopConfig;
use crossover_bot::trade_log::TradeLog;
use crossover_bot::{Candle, Config, Side, Symbol};

// =============================================================================
// Test Utilities
// =============================================================================

/// Generate candles from a close path, with a small high/low band
fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    let start = Utc::now() - Duration::days(closes.len() as i64);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            datetime: start + Duration::days(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1_000.0 + i as f64,
        })
        .collect()
}

/// A decline followed by a strong recovery; forces an upward crossover
fn v_shaped_closes() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..25).map(|i| 200.0 - 2.0 * i as f64).collect();
    closes.extend((0..25).map(|i| 152.0 + 4.0 * i as f64));
    closes
}

fn paper_broker(
    trade_log_path: &std::path::Path,
    store: Box<dyn crossover_bot::positions::PositionStore>,
) -> (Broker<PaperExchange, LogNotifier>, Arc<LogMetrics>) {
    let metrics = Arc::new(LogMetrics::new());
    let exchange = PaperExchange::with_balance("USDT", 50_000.0);
    let broker = Broker::new(
        exchange,
        LogNotifier,
        PositionManager::new(store, StopConfig::default()),
        TradeLog::new(trade_log_path),
        metrics.clone(),
        PositionSizer::default(),
        StopConfig::default(),
    );
    (broker, metrics)
}

// =============================================================================
// Signal -> Broker Pipeline
// =============================================================================

#[tokio::test]
async fn test_crossover_signal_flows_to_fill() {
    let dir = tempfile::tempdir().unwrap();
    let (mut broker, metrics) = paper_broker(&dir.path().join("trades.csv"), Box::new(MemoryStore));

    let candles = candles_from_closes(&v_shaped_closes());
    let btc = Symbol::new("BTCUSDT");

    let mut generator = SignalGenerator::new(SignalCache::default());
    let mut fills = 0;

    for i in 10..candles.len() {
        let window = &candles[..=i];
        let series = PriceSeries::from_candles(window);
        let price = series.last_close().unwrap();
        broker.exchange().note_price(&btc, price);

        let atr = compute_atr_series(&series, 14).unwrap();
        let atr_opt = (atr.is_finite() && atr > 0.0).then_some(atr);

        if broker.position_manager().has(&btc) {
            broker.update_position_stops(&btc, price, atr_opt).await;
            if broker.check_stop_loss(&btc, price).await.unwrap() {
                continue;
            }
        }

        let signal = generator.get_trading_signals(&series, 3, 10).unwrap();
        if let Some(_record) = broker
            .handle_signal(&btc, &signal, 10_000.0, atr)
            .await
            .unwrap()
        {
            fills += 1;
        }
    }

    // The V shape produces at least the entry fill
    assert!(fills >= 1);
    assert_eq!(metrics.trade_count() as usize, fills);

    // Every fill hit the audit log
    let logged = TradeLog::new(dir.path().join("trades.csv"))
        .query(None, None, None)
        .unwrap();
    assert_eq!(logged.len(), fills);

    // The surviving position is long with a protective stop below price
    if let Some(position) = broker.position_manager().get(&btc) {
        assert_eq!(position.side, Side::Long);
        assert!(position.stop_price < candles.last().unwrap().close);
        assert!(position.stop_price >= position.initial_stop);
    }
}

#[tokio::test]
async fn test_stop_lifecycle_breakeven_then_trail_then_exit() {
    let dir = tempfile::tempdir().unwrap();
    let (mut broker, _) = paper_broker(&dir.path().join("trades.csv"), Box::new(MemoryStore));
    let btc = Symbol::new("BTCUSDT");
    broker.exchange().note_price(&btc, 100.0);

    // Enter manually through the broker: entry 100, ATR 5 -> stop 95
    let signal = crossover_bot::Signal {
        buy_signal: true,
        current_price: 100.0,
        ..Default::default()
    };
    broker.handle_signal(&btc, &signal, 10_000.0, 5.0).await.unwrap();
    assert_eq!(broker.position_manager().get(&btc).unwrap().stop_price, 95.0);

    // R = 1.2: breakeven
    broker.update_position_stops(&btc, 106.0, Some(5.0)).await;
    assert_eq!(broker.position_manager().get(&btc).unwrap().stop_price, 100.0);

    // R = 3: trail to 115 - 5
    broker.update_position_stops(&btc, 115.0, Some(5.0)).await;
    assert_eq!(broker.position_manager().get(&btc).unwrap().stop_price, 110.0);

    // Pullback through the stop: full exit with the trigger price recorded
    assert!(broker.check_stop_loss(&btc, 109.0).await.unwrap());
    assert!(!broker.position_manager().has(&btc));

    let trades = TradeLog::new(dir.path().join("trades.csv"))
        .query(Some(&btc), None, None)
        .unwrap();
    let exit = trades.last().unwrap();
    assert!(exit.reason.contains("109"));
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_positions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let positions_path = dir.path().join("positions.json");

    {
        let (mut broker, _) = paper_broker(
            &dir.path().join("trades.csv"),
            Box::new(JsonPositionStore::new(&positions_path)),
        );
        let btc = Symbol::new("BTCUSDT");
        broker.exchange().note_price(&btc, 100.0);
        let signal = crossover_bot::Signal {
            buy_signal: true,
            current_price: 100.0,
            ..Default::default()
        };
        broker.handle_signal(&btc, &signal, 10_000.0, 5.0).await.unwrap();
        broker.update_position_stops(&btc, 106.0, Some(5.0)).await;
    }

    // A fresh manager over the same file sees the same state
    let recovered = PositionManager::new(
        Box::new(JsonPositionStore::new(&positions_path)),
        StopConfig::default(),
    );
    let btc = Symbol::new("BTCUSDT");
    let position = recovered.get(&btc).expect("position recovered");
    assert_eq!(position.entry_price, 100.0);
    assert_eq!(position.stop_price, 100.0); // breakeven survived the restart
    assert_eq!(position.initial_stop, 95.0);
}

#[test]
fn test_position_map_round_trip_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("positions.json");

    let mut manager = PositionManager::new(
        Box::new(JsonPositionStore::new(&path)),
        StopConfig::default(),
    );
    manager.add(Symbol::new("BTCUSDT"), 0.5, 60_000.0, 57_000.0, Side::Long);
    manager.add(Symbol::new("ETHUSDT"), 4.0, 3_000.0, 3_150.0, Side::Short);
    manager.update_stop(&Symbol::new("BTCUSDT"), 58_000.0);

    let reloaded = PositionManager::new(
        Box::new(JsonPositionStore::new(&path)),
        StopConfig::default(),
    );
    assert_eq!(reloaded.positions(), manager.positions());
}

// =============================================================================
// Backtest over CSV data
// =============================================================================

#[test]
fn test_backtest_from_csv_file() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("BTCUSDT.csv");

    let mut contents = String::from("datetime,open,high,low,close,volume\n");
    let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    for (i, close) in v_shaped_closes().into_iter().enumerate() {
        let date = start + Duration::days(i as i64);
        contents.push_str(&format!(
            "{} 00:00:00,{:.2},{:.2},{:.2},{:.2},1000.0\n",
            date,
            close,
            close * 1.01,
            close * 0.99,
            close
        ));
    }
    std::fs::write(&csv_path, contents).unwrap();

    let candles = crossover_bot::data::load_csv(&csv_path).unwrap();
    assert_eq!(candles.len(), 50);

    let mut config = Config::default();
    config.trading.fast_window = 3;
    config.trading.slow_window = 8;
    config.trading.atr_window = 5;

    let mut backtester = Backtester::new(config).unwrap();
    let result = backtester.run(&Symbol::new("BTCUSDT"), &candles).unwrap();

    // The recovery leg is caught by the crossover and rides to the end
    assert!(result.report.total_trades >= 1);
    assert!(result.report.total_return > 0.0);
    assert!(result.report.max_drawdown >= 0.0);
}

// =============================================================================
// Degraded Inputs
// =============================================================================

#[tokio::test]
async fn test_empty_market_data_is_inert() {
    let dir = tempfile::tempdir().unwrap();
    let (mut broker, metrics) = paper_broker(&dir.path().join("trades.csv"), Box::new(MemoryStore));
    let btc = Symbol::new("BTCUSDT");

    let mut generator = SignalGenerator::new(SignalCache::default());
    let series = PriceSeries::from_closes(&[]);
    let signal = generator.get_trading_signals(&series, 3, 10).unwrap();
    assert!(signal.is_flat());

    let acted = broker
        .handle_signal(&btc, &signal, 10_000.0, 0.0)
        .await
        .unwrap();
    assert!(acted.is_none());
    assert_eq!(metrics.trade_count(), 0);
}
