//! Trade and error notifications
//!
//! The engine reports through the `Notifier` capability; delivery failures
//! are always absorbed. A lost message must never fail a trade.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::types::TradeRecord;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyLevel::Info => write!(f, "INFO"),
            NotifyLevel::Warning => write!(f, "WARNING"),
            NotifyLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Outbound notification capability. Implementations must swallow their own
/// failures.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn notify(&self, message: &str, level: NotifyLevel);

    async fn notify_trade(&self, trade: &TradeRecord, formatted: &str) {
        let _ = trade;
        self.notify(formatted, NotifyLevel::Info).await;
    }

    async fn notify_error(&self, err: &anyhow::Error, context: &str) {
        self.notify(&format!("{}: {:#}", context, err), NotifyLevel::Error)
            .await;
    }
}

/// Log-only notifier for backtests and tests
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Info => info!("[notify] {}", message),
            NotifyLevel::Warning => warn!("[notify] {}", message),
            NotifyLevel::Error => error!("[notify] {}", message),
        }
    }
}

/// Telegram Bot API notifier. When no token/chat id is configured it
/// degrades to log-only so the trading loop runs identically either way.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    token: Option<String>,
    chat_id: Option<String>,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(token: Option<String>, chat_id: Option<String>) -> Self {
        if token.is_none() || chat_id.is_none() {
            info!("telegram notifier unconfigured, falling back to logs");
        }
        TelegramNotifier {
            token,
            chat_id,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    async fn send(&self, text: &str) {
        let (Some(token), Some(chat_id)) = (&self.token, &self.chat_id) else {
            return;
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!("telegram send failed: HTTP {}", response.status());
            }
            Ok(_) => {}
            Err(e) => warn!("telegram send failed: {}", e),
        }
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Info => info!("[notify] {}", message),
            NotifyLevel::Warning => warn!("[notify] {}", message),
            NotifyLevel::Error => error!("[notify] {}", message),
        }
        self.send(&format!("[{}] {}", level, message)).await;
    }

    async fn notify_trade(&self, trade: &TradeRecord, formatted: &str) {
        info!("[notify] {}", formatted);
        self.send(&format!(
            "{}\n{} {} qty={} @ {:.4}",
            formatted, trade.side, trade.symbol, trade.quantity, trade.price
        ))
        .await;
    }
}

/// One-line human summary of a fill, used for trade notifications.
pub fn format_trade(trade: &TradeRecord) -> String {
    format!(
        "{} {} {} @ {:.4} ({})",
        trade.side, trade.quantity, trade.symbol, trade.price, trade.reason
    )
}
