//! Live trading command
//!
//! Single-threaded polling loop: every cycle it fetches fresh klines per
//! symbol, updates trailing stops, fires stop-loss exits, evaluates the
//! crossover signal, and hands entries/exits to the broker. Market data
//! always comes from the real exchange; fills go to the paper exchange
//! unless `--live` was passed. Positions are recovered from the JSON store
//! at startup, and a cancellable heartbeat task reports liveness.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crossover_bot::broker::Broker;
use crossover_bot::data::PriceSeries;
use crossover_bot::exchange::{BinanceClient, ExchangeClient, PaperExchange};
use crossover_bot::indicators::compute_atr_series;
use crossover_bot::monitor::{spawn_heartbeat, LogMetrics, MetricsSink};
use crossover_bot::notify::{Notifier, NotifyLevel, TelegramNotifier};
use crossover_bot::positions::{JsonPositionStore, PositionManager};
use crossover_bot::risk::PositionSizer;
use crossover_bot::signal::{SignalCache, SignalGenerator};
use crossover_bot::trade_log::TradeLog;
use crossover_bot::Config;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

pub fn run(config_path: String, live: bool, interval: Option<u64>) -> Result<()> {
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path))?;

    if let Some(seconds) = interval {
        config.trading.poll_seconds = seconds;
    }

    if live {
        warn!("LIVE trading mode: orders will reach the real exchange");
    } else {
        info!("paper trading mode: simulated fills against live market data");
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime.block_on(run_trader(config, !live))
}

async fn run_trader(config: Config, paper_mode: bool) -> Result<()> {
    let metrics = Arc::new(LogMetrics::new());
    let heartbeat = spawn_heartbeat(HEARTBEAT_PERIOD, metrics.clone());

    let notifier = TelegramNotifier::new(
        config.notifier.telegram_bot_token.clone(),
        config.notifier.telegram_chat_id.clone(),
    );
    notifier
        .notify(
            &format!(
                "trading loop starting ({} mode, {} symbols)",
                if paper_mode { "paper" } else { "live" },
                config.trading.symbols.len()
            ),
            NotifyLevel::Info,
        )
        .await;

    let api_key = config.exchange.api_key.clone().unwrap_or_default();
    let api_secret = config.exchange.api_secret.clone().unwrap_or_default();
    let data_client = BinanceClient::new(api_key.clone(), api_secret.clone());

    let positions = PositionManager::new(
        Box::new(JsonPositionStore::new(&config.state.positions_file)),
        config.stops.clone(),
    );
    let trade_log = TradeLog::new(&config.state.trade_log);
    let sizer = PositionSizer::new(config.trading.risk_per_trade)?;

    let result = if paper_mode {
        let exchange = PaperExchange::with_balance(
            &config.trading.quote_asset,
            config.trading.initial_capital,
        );
        let broker = Broker::new(
            exchange,
            notifier,
            positions,
            trade_log,
            metrics.clone(),
            sizer,
            config.stops.clone(),
        );
        trade_loop(broker, data_client, &config, metrics.clone()).await
    } else {
        let exchange = BinanceClient::new(api_key, api_secret);
        let broker = Broker::new(
            exchange,
            notifier,
            positions,
            trade_log,
            metrics.clone(),
            sizer,
            config.stops.clone(),
        );
        trade_loop(broker, data_client, &config, metrics.clone()).await
    };

    heartbeat.stop().await;
    info!(
        "loop finished: {} trades, {} errors, {} price updates",
        metrics.trade_count(),
        metrics.error_count(),
        metrics.price_update_count()
    );
    result
}

async fn trade_loop<E: ExchangeClient, N: Notifier>(
    mut broker: Broker<E, N>,
    data_client: BinanceClient,
    config: &Config,
    metrics: Arc<LogMetrics>,
) -> Result<()> {
    let trading = &config.trading;
    let symbols = trading.symbols();
    let kline_limit = ((trading.slow_window + trading.atr_window) as u32 + 10).max(100);

    let mut generator = SignalGenerator::new(SignalCache::default());
    let mut ticker = tokio::time::interval(Duration::from_secs(trading.poll_seconds));

    info!(
        "polling every {}s over {} symbols ({} klines per fetch)",
        trading.poll_seconds,
        symbols.len(),
        kline_limit
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }

        for symbol in &symbols {
            let candles = match data_client
                .get_klines(symbol, &trading.interval, kline_limit)
                .await
            {
                Ok(candles) if candles.len() >= 2 => candles,
                Ok(_) => {
                    warn!("not enough klines for {}", symbol);
                    continue;
                }
                Err(e) => {
                    metrics.record_error();
                    warn!("kline fetch failed for {}: {:#}", symbol, e);
                    continue;
                }
            };

            let series = PriceSeries::from_candles(&candles);
            let price = series.last_close().expect("non-empty klines");
            metrics.record_price(symbol, price);
            broker.exchange().note_price(symbol, price);

            let atr = compute_atr_series(&series, trading.atr_window)?;
            let atr_opt = (atr.is_finite() && atr > 0.0).then_some(atr);

            if broker.position_manager().has(symbol) {
                broker.update_position_stops(symbol, price, atr_opt).await;

                match broker.check_stop_loss(symbol, price).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        // Already notified by the broker; keep the loop alive
                        error!("stop-loss exit failed for {}: {:#}", symbol, e);
                        continue;
                    }
                }
            }

            let signal = generator.get_trading_signals(
                &series,
                trading.fast_window,
                trading.slow_window,
            )?;
            if signal.is_flat() {
                continue;
            }

            let equity = match broker.exchange().get_balance().await {
                Ok(balances) => balances
                    .get(&trading.quote_asset)
                    .copied()
                    .unwrap_or(trading.initial_capital),
                Err(e) => {
                    warn!("balance fetch failed, using configured capital: {:#}", e);
                    trading.initial_capital
                }
            };

            match broker.handle_signal(symbol, &signal, equity, atr).await {
                Ok(Some(record)) => {
                    info!(
                        "executed {} {} qty={} @ {:.4}",
                        record.side, record.symbol, record.quantity, record.price
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    error!("signal handling failed for {}: {:#}", symbol, e);
                }
            }
        }
    }

    Ok(())
}
