//! Order execution coordination
//!
//! The broker is the root of the decision engine: it turns signals into
//! sized, stop-protected orders, runs the exchange call strictly before any
//! state mutation, keeps the position manager and trade log in step, and
//! reports through the notifier and metrics capabilities.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::exchange::{ExchangeClient, OrderType};
use crate::monitor::MetricsSink;
use crate::notify::{format_trade, Notifier, NotifyLevel};
use crate::positions::PositionManager;
use crate::risk::PositionSizer;
use crate::stops::{initial_stop_for, StopConfig};
use crate::trade_log::TradeLog;
use crate::types::{OrderSide, Side, Signal, Symbol, TradeRecord};

/// A single order for the coordinator to execute.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: f64,
    /// Execution price; resolved from the exchange ticker when absent
    pub price: Option<f64>,
    /// Initial stop for a position-opening buy
    pub stop_price: Option<f64>,
    pub reason: Option<String>,
}

pub struct Broker<E: ExchangeClient, N: Notifier> {
    exchange: E,
    notifier: N,
    positions: PositionManager,
    trade_log: TradeLog,
    metrics: Arc<dyn MetricsSink>,
    sizer: PositionSizer,
    stop_config: StopConfig,
}

impl<E: ExchangeClient, N: Notifier> Broker<E, N> {
    pub fn new(
        exchange: E,
        notifier: N,
        positions: PositionManager,
        trade_log: TradeLog,
        metrics: Arc<dyn MetricsSink>,
        sizer: PositionSizer,
        stop_config: StopConfig,
    ) -> Self {
        Broker {
            exchange,
            notifier,
            positions,
            trade_log,
            metrics,
            sizer,
            stop_config,
        }
    }

    pub fn position_manager(&self) -> &PositionManager {
        &self.positions
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Execute one order: resolve a price, fill at the exchange, then (and
    /// only then) update positions, append to the trade log, and notify.
    ///
    /// An execution failure is reported to the notifier and re-raised
    /// before any state was touched, so no partial side effects remain.
    pub async fn execute_order(&mut self, request: OrderRequest) -> Result<TradeRecord> {
        let resolved_price = match request.price {
            Some(price) => price,
            None => match self.exchange.get_ticker(&request.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    self.metrics.record_error();
                    self.notifier
                        .notify_error(&e, &format!("price resolution for {}", request.symbol))
                        .await;
                    return Err(e.context("failed to resolve execution price"));
                }
            },
        };

        let fill = match self
            .exchange
            .place_order(
                &request.symbol,
                request.side,
                OrderType::Market,
                request.quantity,
                request.price,
            )
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                self.metrics.record_error();
                self.notifier
                    .notify_error(&e, &format!("order execution for {}", request.symbol))
                    .await;
                return Err(e.context("order execution failed"));
            }
        };

        let exec_price = fill.executed_price.unwrap_or(resolved_price);

        match request.side {
            OrderSide::Buy => {
                if self.positions.has(&request.symbol) {
                    warn!(
                        "buy fill for {} with an existing position; position map unchanged",
                        request.symbol
                    );
                } else {
                    let stop_price = request.stop_price.unwrap_or_else(|| {
                        warn!("buy for {} carried no stop, entering unprotected", request.symbol);
                        0.0
                    });
                    self.positions.add(
                        request.symbol.clone(),
                        request.quantity,
                        exec_price,
                        stop_price,
                        Side::Long,
                    );
                }
            }
            OrderSide::Sell => {
                if self.positions.remove(&request.symbol).is_none() {
                    warn!("sell fill for {} without a tracked position", request.symbol);
                }
            }
        }

        let record = TradeRecord {
            timestamp: Utc::now(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            price: exec_price,
            reason: request.reason.unwrap_or_else(|| "signal".to_string()),
            order_id: fill.order_id,
            status: fill.status,
        };

        if let Err(e) = self.trade_log.append(&record) {
            warn!("failed to append trade log entry: {:#}", e);
        }

        self.notifier
            .notify_trade(&record, &format_trade(&record))
            .await;
        self.metrics.record_trade();

        Ok(record)
    }

    /// Act on a crossover evaluation: a buy signal opens a sized,
    /// stop-protected long when the symbol is flat; a sell signal closes an
    /// open position in full.
    pub async fn handle_signal(
        &mut self,
        symbol: &Symbol,
        signal: &Signal,
        equity: f64,
        atr: f64,
    ) -> Result<Option<TradeRecord>> {
        if signal.buy_signal && !self.positions.has(symbol) {
            let quantity = self.sizer.size(equity, atr) as f64;
            let stop_price = initial_stop_for(
                Side::Long,
                signal.current_price,
                atr,
                self.stop_config.stop_atr_multiple,
            );
            let record = self
                .execute_order(OrderRequest {
                    symbol: symbol.clone(),
                    side: OrderSide::Buy,
                    quantity,
                    price: Some(signal.current_price),
                    stop_price: Some(stop_price),
                    reason: Some("ma crossover entry".to_string()),
                })
                .await
                .context("entry failed")?;
            return Ok(Some(record));
        }

        if signal.sell_signal {
            if let Some(position) = self.positions.get(symbol) {
                let quantity = position.quantity;
                let record = self
                    .execute_order(OrderRequest {
                        symbol: symbol.clone(),
                        side: OrderSide::Sell,
                        quantity,
                        price: Some(signal.current_price),
                        stop_price: None,
                        reason: Some("ma crossover exit".to_string()),
                    })
                    .await
                    .context("exit failed")?;
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    /// Close the full position when the manager reports a stop breach.
    /// Returns whether an exit fired.
    pub async fn check_stop_loss(&mut self, symbol: &Symbol, current_price: f64) -> Result<bool> {
        if !self.positions.check_stop_loss(symbol, current_price) {
            return Ok(false);
        }

        let quantity = self
            .positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(0.0);

        info!("stop breached for {} at {:.4}, exiting", symbol, current_price);
        self.execute_order(OrderRequest {
            symbol: symbol.clone(),
            side: OrderSide::Sell,
            quantity,
            price: Some(current_price),
            stop_price: None,
            reason: Some(format!("stop loss triggered at {:.4}", current_price)),
        })
        .await
        .context("stop-loss exit failed")?;

        Ok(true)
    }

    /// Forward a tick to the trailing-stop machinery; notifies when the
    /// stop actually moved.
    pub async fn update_position_stops(
        &mut self,
        symbol: &Symbol,
        current_price: f64,
        atr: Option<f64>,
    ) -> bool {
        let moved = self
            .positions
            .update_trailing_stop(symbol, current_price, atr);

        if moved {
            if let Some(position) = self.positions.get(symbol) {
                self.notifier
                    .notify(
                        &format!(
                            "trailing stop for {} moved to {:.4}",
                            symbol, position.stop_price
                        ),
                        NotifyLevel::Info,
                    )
                    .await;
            }
        }

        moved
    }
}
