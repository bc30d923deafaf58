//! Backtesting engine
//!
//! A single-threaded sequential scan over one symbol's candles: each bar
//! updates trailing stops, checks for a stop exit, evaluates the crossover
//! signal, and sizes any entry against current equity and ATR. Fills are
//! simulated with configurable fee and slippage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use anyhow::Result;

use crate::config::Config;
use crate::data::PriceSeries;
use crate::indicators::compute_atr_series;
use crate::positions::{MemoryStore, PositionManager};
use crate::risk::PositionSizer;
use crate::signal::{SignalCache, SignalGenerator};
use crate::stops::initial_stop_for;
use crate::types::{Candle, Side, Symbol};

/// A completed round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub net_pnl: f64,
    pub reason: String,
}

/// Aggregate performance of one backtest run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub initial_capital: f64,
    pub final_equity: f64,
    /// Percent
    pub total_return: f64,
    /// Percent of peak equity
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    /// Percent
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
}

impl std::fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.symbol)?;
        writeln!(
            f,
            "  return {:+.2}%  max drawdown {:.2}%  sharpe {:.2}",
            self.total_return, self.max_drawdown, self.sharpe_ratio
        )?;
        write!(
            f,
            "  trades {} (win rate {:.1}%, profit factor {:.2})",
            self.total_trades, self.win_rate, self.profit_factor
        )
    }
}

#[derive(Debug, Default)]
pub struct BacktestResult {
    pub report: BacktestReport,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

/// Sequential single-symbol backtester
pub struct Backtester {
    config: Config,
    generator: SignalGenerator,
    sizer: PositionSizer,
}

impl Backtester {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let sizer = PositionSizer::new(config.trading.risk_per_trade)?;
        Ok(Backtester {
            config,
            generator: SignalGenerator::new(SignalCache::default()),
            sizer,
        })
    }

    /// Scan the candles bar by bar and return trades plus a report.
    pub fn run(&mut self, symbol: &Symbol, candles: &[Candle]) -> Result<BacktestResult> {
        let trading = &self.config.trading;
        let fee = self.config.exchange.taker_fee;
        let slippage = self.config.exchange.assumed_slippage;

        let mut positions =
            PositionManager::new(Box::new(MemoryStore), self.config.stops.clone());
        let mut cash = trading.initial_capital;
        let mut trades: Vec<ClosedTrade> = Vec::new();
        let mut equity_curve: Vec<(DateTime<Utc>, f64)> = Vec::new();

        let warmup = trading.slow_window.min(candles.len());

        for i in warmup..candles.len() {
            let window = &candles[..=i];
            let candle = &candles[i];
            let price = candle.close;

            let series = PriceSeries::from_candles(window);
            let atr = compute_atr_series(&series, trading.atr_window)?;
            let atr_opt = (atr.is_finite() && atr > 0.0).then_some(atr);

            if positions.has(symbol) {
                positions.update_trailing_stop(symbol, price, atr_opt);

                if positions.check_stop_loss(symbol, price) {
                    let position = positions.remove(symbol).expect("checked above");
                    let exit_price = price * (1.0 - slippage);
                    cash += position.quantity * exit_price * (1.0 - fee);
                    trades.push(close_out(
                        &position,
                        exit_price,
                        candle.datetime,
                        fee,
                        "stop loss",
                    ));
                    equity_curve.push((candle.datetime, cash));
                    continue;
                }
            }

            let signal =
                self.generator
                    .get_trading_signals(&series, trading.fast_window, trading.slow_window)?;

            if signal.buy_signal && !positions.has(symbol) {
                let equity = cash;
                let quantity = self.sizer.size(equity, atr) as f64;
                let entry_price = price * (1.0 + slippage);
                let cost = quantity * entry_price * (1.0 + fee);

                if cost <= cash {
                    cash -= cost;
                    let stop_price = initial_stop_for(
                        Side::Long,
                        entry_price,
                        atr,
                        self.config.stops.stop_atr_multiple,
                    );
                    positions.add(symbol.clone(), quantity, entry_price, stop_price, Side::Long);
                } else {
                    debug!(
                        "entry skipped for {}: cost {:.2} exceeds cash {:.2}",
                        symbol, cost, cash
                    );
                }
            } else if signal.sell_signal && positions.has(symbol) {
                let position = positions.remove(symbol).expect("checked above");
                let exit_price = price * (1.0 - slippage);
                cash += position.quantity * exit_price * (1.0 - fee);
                trades.push(close_out(
                    &position,
                    exit_price,
                    candle.datetime,
                    fee,
                    "crossover exit",
                ));
            }

            let held_value = positions
                .get(symbol)
                .map(|p| p.quantity * price)
                .unwrap_or(0.0);
            equity_curve.push((candle.datetime, cash + held_value));
        }

        // Flatten anything still open at the last close
        if let Some(position) = positions.remove(symbol) {
            let last = candles.last().expect("non-empty by loop");
            cash += position.quantity * last.close * (1.0 - fee);
            trades.push(close_out(
                &position,
                last.close,
                last.datetime,
                fee,
                "end of backtest",
            ));
            equity_curve.push((last.datetime, cash));
        }

        let report = build_report(
            symbol,
            trading.initial_capital,
            &trades,
            &equity_curve,
        );

        Ok(BacktestResult {
            report,
            trades,
            equity_curve,
        })
    }
}

fn close_out(
    position: &crate::types::Position,
    exit_price: f64,
    exit_time: DateTime<Utc>,
    fee: f64,
    reason: &str,
) -> ClosedTrade {
    let gross = position.unrealized_pnl(exit_price);
    let commission = position.quantity * (position.entry_price + exit_price) * fee;
    ClosedTrade {
        symbol: position.symbol.clone(),
        quantity: position.quantity,
        entry_price: position.entry_price,
        exit_price,
        entry_time: position.entry_time,
        exit_time,
        net_pnl: gross - commission,
        reason: reason.to_string(),
    }
}

fn build_report(
    symbol: &Symbol,
    initial_capital: f64,
    trades: &[ClosedTrade],
    equity_curve: &[(DateTime<Utc>, f64)],
) -> BacktestReport {
    use statrs::statistics::Statistics;

    let final_equity = equity_curve
        .last()
        .map(|(_, equity)| *equity)
        .unwrap_or(initial_capital);
    let total_return = (final_equity - initial_capital) / initial_capital * 100.0;

    let winners: Vec<&ClosedTrade> = trades.iter().filter(|t| t.net_pnl > 0.0).collect();
    let losers: Vec<&ClosedTrade> = trades.iter().filter(|t| t.net_pnl <= 0.0).collect();

    let win_rate = if trades.is_empty() {
        0.0
    } else {
        winners.len() as f64 / trades.len() as f64 * 100.0
    };

    let gross_profit: f64 = winners.iter().map(|t| t.net_pnl).sum();
    let gross_loss: f64 = losers.iter().map(|t| t.net_pnl.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let mut peak = initial_capital;
    let mut max_drawdown = 0.0_f64;
    for (_, equity) in equity_curve {
        if *equity > peak {
            peak = *equity;
        }
        max_drawdown = max_drawdown.max((peak - equity) / peak);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].1 != 0.0)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect();

    let sharpe_ratio = if returns.len() < 2 {
        0.0
    } else {
        let mean = (&returns).mean();
        let std_dev = (&returns).std_dev();
        if std_dev > 0.0 {
            // Annualized assuming daily bars
            mean / std_dev * 252.0_f64.sqrt()
        } else {
            0.0
        }
    };

    BacktestReport {
        symbol: symbol.to_string(),
        initial_capital,
        final_equity,
        total_return,
        max_drawdown: max_drawdown * 100.0,
        sharpe_ratio,
        win_rate,
        profit_factor,
        total_trades: trades.len(),
        winning_trades: winners.len(),
        losing_trades: losers.len(),
    }
}
