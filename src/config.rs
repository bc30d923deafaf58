//! Configuration management
//!
//! JSON configuration with environment-variable overrides for credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::stops::StopConfig;
use crate::types::{ParamError, Symbol};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub stops: StopConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            exchange: ExchangeConfig::default(),
            trading: TradingConfig::default(),
            stops: StopConfig::default(),
            notifier: NotifierConfig::default(),
            state: StateConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, then pull credentials from the
    /// environment when present.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            config.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BINANCE_API_SECRET") {
            config.exchange.api_secret = Some(api_secret);
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            config.notifier.telegram_bot_token = Some(token);
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            config.notifier.telegram_chat_id = Some(chat_id);
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on numeric parameters that can never be right.
    pub fn validate(&self) -> Result<(), ParamError> {
        let t = &self.trading;
        if t.fast_window == 0 {
            return Err(ParamError::ZeroWindow { name: "fast" });
        }
        if t.slow_window == 0 {
            return Err(ParamError::ZeroWindow { name: "slow" });
        }
        if t.fast_window >= t.slow_window {
            return Err(ParamError::FastNotBelowSlow {
                fast: t.fast_window,
                slow: t.slow_window,
            });
        }
        if t.atr_window == 0 {
            return Err(ParamError::ZeroWindow { name: "atr" });
        }
        if !(0.0..=1.0).contains(&t.risk_per_trade) || t.risk_per_trade == 0.0 {
            return Err(ParamError::RiskFractionOutOfRange(t.risk_per_trade));
        }
        Ok(())
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub taker_fee: f64,
    pub assumed_slippage: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            taker_fee: 0.001, // 0.1%
            assumed_slippage: 0.001,
        }
    }
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    /// Starting capital in the quote asset
    pub initial_capital: f64,
    pub risk_per_trade: f64,
    pub fast_window: usize,
    pub slow_window: usize,
    pub atr_window: usize,
    /// Asset whose free balance counts as equity in live trading
    pub quote_asset: String,
    /// Kline interval, e.g. "1h", "4h", "1d"
    pub interval: String,
    /// Seconds between live polling cycles
    pub poll_seconds: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            initial_capital: 10_000.0,
            risk_per_trade: 0.02,
            fast_window: 12,
            slow_window: 26,
            atr_window: 14,
            quote_asset: "USDT".to_string(),
            interval: "1h".to_string(),
            poll_seconds: 300,
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// Notification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_bot_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_chat_id: Option<String>,
}

/// State file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub positions_file: String,
    pub trade_log: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            positions_file: "state/positions.json".to_string(),
            trade_log: "state/trades.csv".to_string(),
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub data_dir: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
        }
    }
}
