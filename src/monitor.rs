//! Observability hooks
//!
//! The engine reports trade counts, errors, price updates, and liveness
//! into a `MetricsSink`; the sink is a capability boundary and its failures
//! never reach trading logic. The heartbeat is a cancellable ticker task
//! rather than a flag-polled daemon thread.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::Symbol;

/// Sink for engine health and activity counters.
pub trait MetricsSink: Send + Sync {
    fn record_trade(&self);
    fn record_error(&self);
    fn record_price(&self, symbol: &Symbol, price: f64);
    fn heartbeat(&self);
}

/// Default sink: atomic counters plus debug logs.
#[derive(Debug, Default)]
pub struct LogMetrics {
    trades: AtomicU64,
    errors: AtomicU64,
    price_updates: AtomicU64,
    heartbeats: AtomicU64,
}

impl LogMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trade_count(&self) -> u64 {
        self.trades.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn price_update_count(&self) -> u64 {
        self.price_updates.load(Ordering::Relaxed)
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }
}

impl MetricsSink for LogMetrics {
    fn record_trade(&self) {
        self.trades.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_price(&self, symbol: &Symbol, price: f64) {
        self.price_updates.fetch_add(1, Ordering::Relaxed);
        debug!("price update: {} = {:.4}", symbol, price);
    }

    fn heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }
}

/// Running heartbeat task. Dropping the handle without calling
/// [`HeartbeatHandle::stop`] aborts the task on runtime shutdown.
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    last_beat: Arc<AtomicI64>,
}

impl HeartbeatHandle {
    /// Timestamp of the most recent beat, if any.
    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        match self.last_beat.load(Ordering::Relaxed) {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }

    /// Cancel the ticker and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
        info!("heartbeat stopped");
    }
}

/// Spawn the periodic heartbeat: every `period` it stamps the shared
/// last-seen timestamp (single writer, single reader) and pings the sink.
pub fn spawn_heartbeat(period: Duration, metrics: Arc<dyn MetricsSink>) -> HeartbeatHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let last_beat = Arc::new(AtomicI64::new(0));
    let beat = Arc::clone(&last_beat);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    beat.store(Utc::now().timestamp(), Ordering::Relaxed);
                    metrics.heartbeat();
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    });

    HeartbeatHandle {
        shutdown,
        task,
        last_beat,
    }
}
