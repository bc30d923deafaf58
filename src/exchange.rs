//! Exchange API clients
//!
//! The engine talks to an exchange only through the `ExchangeClient`
//! capability: balances, klines, order placement. `BinanceClient` is the
//! real HTTP implementation with HMAC-SHA256 signed requests;
//! `PaperExchange` fills orders instantly against the last known price for
//! paper trading and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info};

use crate::types::{Candle, OrderSide, OrderStatus, Symbol};

type HmacSha256 = Hmac<Sha256>;

const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

/// Exchange order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Result of an order placement
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    /// Fill price when the exchange reports one
    pub executed_price: Option<f64>,
}

/// A resting order as reported by the exchange
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
}

/// Capability boundary to the exchange. The engine core never constructs
/// HTTP requests itself.
#[allow(async_fn_in_trait)]
pub trait ExchangeClient {
    /// Free balances by asset
    async fn get_balance(&self) -> Result<HashMap<String, f64>>;

    /// Recent OHLCV candles, oldest first
    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Last traded price
    async fn get_ticker(&self, symbol: &Symbol) -> Result<f64>;

    /// Hint the latest observed price. Simulated exchanges fill against it;
    /// real exchanges ignore it.
    fn note_price(&self, _symbol: &Symbol, _price: f64) {}

    async fn place_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()>;

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>>;
}

// =============================================================================
// Binance client
// =============================================================================

#[derive(Debug, Clone)]
pub struct BinanceClient {
    api_key: String,
    api_secret: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BinanceBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
struct BinanceAccount {
    balances: Vec<BinanceBalance>,
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BinanceOrderResponse {
    #[serde(rename = "orderId")]
    order_id: u64,
    status: String,
    #[serde(default)]
    fills: Vec<BinanceFill>,
}

#[derive(Debug, Deserialize)]
struct BinanceFill {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BinanceOpenOrder {
    #[serde(rename = "orderId")]
    order_id: u64,
    symbol: String,
    side: String,
    #[serde(rename = "origQty")]
    orig_qty: String,
    price: String,
}

impl BinanceClient {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self::with_base_url(api_key, api_secret, BINANCE_API_BASE.to_string())
    }

    pub fn with_base_url(api_key: String, api_secret: String, base_url: String) -> Self {
        BinanceClient {
            api_key,
            api_secret,
            base_url,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push((
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        ));
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    fn map_status(status: &str) -> OrderStatus {
        match status {
            "FILLED" => OrderStatus::Filled,
            "REJECTED" | "EXPIRED" | "CANCELED" => OrderStatus::Rejected,
            _ => OrderStatus::Open,
        }
    }
}

impl ExchangeClient for BinanceClient {
    async fn get_balance(&self) -> Result<HashMap<String, f64>> {
        let query = self.signed_query(vec![]);
        let url = format!("{}/account?{}", self.base_url, query);

        let account: BinanceAccount = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to fetch account")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse account")?;

        Ok(account
            .balances
            .into_iter()
            .filter_map(|b| b.free.parse::<f64>().ok().map(|free| (b.asset, free)))
            .filter(|(_, free)| *free > 0.0)
            .collect())
    }

    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        // Binance klines are heterogeneous JSON arrays:
        // [open_time, open, high, low, close, volume, close_time, ...]
        let raw: Vec<Vec<serde_json::Value>> = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch klines")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse klines")?;

        let parse_price = |v: &serde_json::Value| -> Option<f64> {
            v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
        };

        let mut candles = Vec::with_capacity(raw.len());
        for row in &raw {
            let open_time = row.first().and_then(|v| v.as_i64()).context("bad kline time")?;
            let datetime: DateTime<Utc> = DateTime::from_timestamp_millis(open_time)
                .context("kline timestamp out of range")?;
            let open = row.get(1).and_then(parse_price).context("bad kline open")?;
            let high = row.get(2).and_then(parse_price).context("bad kline high")?;
            let low = row.get(3).and_then(parse_price).context("bad kline low")?;
            let close = row.get(4).and_then(parse_price).context("bad kline close")?;
            let volume = row.get(5).and_then(parse_price).context("bad kline volume")?;
            candles.push(Candle {
                datetime,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        debug!("fetched {} klines for {}", candles.len(), symbol);
        Ok(candles)
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<f64> {
        let url = format!("{}/ticker/price?symbol={}", self.base_url, symbol);
        let ticker: BinanceTicker = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch ticker")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse ticker")?;

        ticker
            .price
            .parse()
            .with_context(|| format!("Bad ticker price for {}", symbol))
    }

    async fn place_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side.to_string()),
            ("type".to_string(), order_type.to_string()),
            ("quantity".to_string(), quantity.to_string()),
        ];
        if let Some(price) = price {
            params.push(("price".to_string(), price.to_string()));
            params.push(("timeInForce".to_string(), "GTC".to_string()));
        }

        let query = self.signed_query(params);
        let url = format!("{}/order?{}", self.base_url, query);

        let response: BinanceOrderResponse = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to place order")?
            .error_for_status()
            .context("Order rejected by exchange")?
            .json()
            .await
            .context("Failed to parse order response")?;

        let executed_price = response
            .fills
            .first()
            .and_then(|f| f.price.parse::<f64>().ok());

        info!(
            "order placed: {} {} {} qty={} -> id={} status={}",
            side, order_type, symbol, quantity, response.order_id, response.status
        );

        Ok(OrderResult {
            order_id: response.order_id.to_string(),
            status: Self::map_status(&response.status),
            executed_price,
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()> {
        let query = self.signed_query(vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ]);
        let url = format!("{}/order?{}", self.base_url, query);

        self.client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to cancel order")?
            .error_for_status()?;

        Ok(())
    }

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>> {
        let query = self.signed_query(vec![("symbol".to_string(), symbol.to_string())]);
        let url = format!("{}/openOrders?{}", self.base_url, query);

        let raw: Vec<BinanceOpenOrder> = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to fetch open orders")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse open orders")?;

        Ok(raw
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id.to_string(),
                symbol: Symbol::new(&o.symbol),
                side: if o.side == "BUY" {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                },
                quantity: o.orig_qty.parse().unwrap_or(0.0),
                price: o.price.parse().ok(),
            })
            .collect())
    }
}

// =============================================================================
// Paper exchange
// =============================================================================

#[derive(Debug, Default)]
struct PaperState {
    prices: HashMap<Symbol, f64>,
    balances: HashMap<String, f64>,
    next_order_id: u64,
}

/// Simulated exchange: fills market orders instantly at the last known
/// price and settles them against the quote balance. The driver feeds
/// prices in via [`PaperExchange::set_price`].
#[derive(Debug, Default)]
pub struct PaperExchange {
    state: Mutex<PaperState>,
    quote_asset: Option<String>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a quote balance; buys debit it and sells credit it.
    pub fn with_balance(asset: &str, amount: f64) -> Self {
        let exchange = PaperExchange {
            state: Mutex::default(),
            quote_asset: Some(asset.to_string()),
        };
        exchange
            .state
            .lock()
            .unwrap()
            .balances
            .insert(asset.to_string(), amount);
        exchange
    }

    pub fn set_price(&self, symbol: &Symbol, price: f64) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(symbol.clone(), price);
    }
}

impl ExchangeClient for PaperExchange {
    async fn get_balance(&self) -> Result<HashMap<String, f64>> {
        Ok(self.state.lock().unwrap().balances.clone())
    }

    async fn get_klines(
        &self,
        _symbol: &Symbol,
        _interval: &str,
        _limit: u32,
    ) -> Result<Vec<Candle>> {
        bail!("paper exchange carries no market data; use a data client")
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<f64> {
        self.state
            .lock()
            .unwrap()
            .prices
            .get(symbol)
            .copied()
            .with_context(|| format!("No paper price for {}", symbol))
    }

    fn note_price(&self, symbol: &Symbol, price: f64) {
        self.set_price(symbol, price);
    }

    async fn place_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        _order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        let mut state = self.state.lock().unwrap();

        let fill_price = match price.or_else(|| state.prices.get(symbol).copied()) {
            Some(p) => p,
            None => bail!("No paper price for {}", symbol),
        };

        if let Some(quote) = &self.quote_asset {
            let cost = quantity * fill_price;
            let balance = state.balances.entry(quote.clone()).or_insert(0.0);
            match side {
                OrderSide::Buy => {
                    if *balance < cost {
                        bail!(
                            "insufficient paper balance: {:.2} {} < {:.2}",
                            balance,
                            quote,
                            cost
                        );
                    }
                    *balance -= cost;
                }
                OrderSide::Sell => *balance += cost,
            }
        }

        state.next_order_id += 1;
        let order_id = format!("paper-{}", state.next_order_id);

        debug!(
            "paper fill: {} {} qty={} @ {:.4} ({})",
            side, symbol, quantity, fill_price, order_id
        );

        Ok(OrderResult {
            order_id,
            status: OrderStatus::Filled,
            executed_price: Some(fill_price),
        })
    }

    async fn cancel_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_open_orders(&self, _symbol: &Symbol) -> Result<Vec<OpenOrder>> {
        // Paper fills are immediate, nothing rests
        Ok(Vec::new())
    }
}
