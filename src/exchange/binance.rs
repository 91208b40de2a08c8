use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::guard::classify_status;
use super::Broker;
use crate::market_data::MarketDataSource;
use crate::models::{AccountTrade, Candle, OrderResult, Timeframe, TradeSide, TradingPair};
use crate::{BotError, Result};

pub const BINANCE_API_BASE: &str = "https://api.binance.com";

type HmacSha256 = Hmac<Sha256>;

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Binance spot REST client
///
/// Cloneable; all clones share the rate limiter and the lot-size cache.
/// Never retries internally, a failed call surfaces to the caller.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
    recv_window_ms: u64,
    lot_steps: Arc<RwLock<HashMap<String, f64>>>,
    rate_limiter: Arc<BinanceRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyTrade {
    price: String,
    qty: String,
    time: i64,
    is_buyer: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    executed_qty: String,
    cummulative_quote_qty: String,
    transact_time: i64,
    #[serde(default)]
    fills: Vec<OrderFill>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderFill {
    commission: String,
    commission_asset: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

fn parse_num(call: &str, field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| BotError::external(call, format!("unparseable {}: {}", field, raw), false))
}

/// Hex HMAC-SHA256 of the query string
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::external("sign", e.to_string(), false))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Floor `quantity` to the lot step and render it without float noise
pub fn format_quantity(quantity: f64, step: f64) -> String {
    if step <= 0.0 {
        return format_decimal(quantity, 8);
    }
    let steps = (quantity / step + 1e-9).floor();
    let decimals = (-step.log10()).round().max(0.0) as usize;
    format!("{:.*}", decimals, steps * step)
}

fn format_decimal(value: f64, decimals: usize) -> String {
    let raw = format!("{:.*}", decimals, value);
    if raw.contains('.') {
        raw.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        raw
    }
}

impl BinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<ApiCredentials>,
        requests_per_minute: u32,
        http_timeout: Duration,
        recv_window_ms: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| BotError::http("build_client", e))?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms,
            lot_steps: Arc::new(RwLock::new(HashMap::new())),
            rate_limiter,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        call: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let response = request.send().await.map_err(|e| BotError::http(call, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(call, status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BotError::external(call, format!("bad response body: {}", e), false))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        call: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.send(call, self.client.get(&url).query(query)).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        call: &str,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| BotError::external(call, "API credentials not configured", false))?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = sign_query(&credentials.api_secret, &query)?;

        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let request = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key);
        self.send(call, request).await
    }

    /// LOT_SIZE step for the symbol, cached after the first lookup
    async fn lot_step(&self, pair: &TradingPair) -> Result<f64> {
        let symbol = pair.exchange_symbol();
        if let Some(step) = self.lot_steps.read().await.get(&symbol) {
            return Ok(*step);
        }

        let info: ExchangeInfo = self
            .public_get("exchange_info", "/api/v3/exchangeInfo", &[("symbol", symbol.clone())])
            .await?;

        let step = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .and_then(|s| {
                s.filters
                    .iter()
                    .find(|f| f["filterType"].as_str() == Some("LOT_SIZE"))
            })
            .and_then(|f| f["stepSize"].as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| {
                BotError::external("exchange_info", format!("no LOT_SIZE for {}", symbol), false)
            })?;

        self.lot_steps.write().await.insert(symbol, step);
        Ok(step)
    }

    fn order_result(
        &self,
        call: &str,
        side: TradeSide,
        commission_asset: &str,
        response: OrderResponse,
    ) -> Result<OrderResult> {
        let executed = parse_num(call, "executedQty", &response.executed_qty)?;
        let quote = parse_num(call, "cummulativeQuoteQty", &response.cummulative_quote_qty)?;
        if executed <= 0.0 {
            return Err(BotError::OrderExecution(format!(
                "order {} returned no fill",
                response.order_id
            )));
        }

        // Commission charged in the base asset reduces what we actually hold
        let commission: f64 = response
            .fills
            .iter()
            .filter(|f| f.commission_asset == commission_asset)
            .filter_map(|f| f.commission.parse::<f64>().ok())
            .sum();
        let filled_base = match side {
            TradeSide::Buy => executed - commission,
            TradeSide::Sell => executed,
        };

        Ok(OrderResult {
            order_id: response.order_id.to_string(),
            side,
            filled_base,
            average_price: quote / executed,
            timestamp: Utc
                .timestamp_millis_opt(response.transact_time)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl Broker for BinanceClient {
    async fn get_balance(&self) -> Result<HashMap<String, f64>> {
        let account: AccountInfo = self
            .signed("get_balance", Method::GET, "/api/v3/account", &[])
            .await?;

        let mut balances = HashMap::new();
        for balance in account.balances {
            let free = parse_num("get_balance", "free", &balance.free)?;
            balances.insert(balance.asset, free);
        }
        Ok(balances)
    }

    async fn get_last_trades(&self, pair: &TradingPair, limit: usize) -> Result<Vec<AccountTrade>> {
        let raw: Vec<MyTrade> = self
            .signed(
                "get_last_trades",
                Method::GET,
                "/api/v3/myTrades",
                &[
                    ("symbol", pair.exchange_symbol()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let mut trades = Vec::with_capacity(raw.len());
        for trade in raw {
            trades.push(AccountTrade {
                side: if trade.is_buyer {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: parse_num("get_last_trades", "price", &trade.price)?,
                quantity: parse_num("get_last_trades", "qty", &trade.qty)?,
                timestamp: Utc
                    .timestamp_millis_opt(trade.time)
                    .single()
                    .unwrap_or_else(Utc::now),
            });
        }
        trades.sort_by_key(|t| t.timestamp);
        Ok(trades)
    }

    async fn place_market_buy(&self, pair: &TradingPair, quote_amount: f64) -> Result<OrderResult> {
        tracing::info!(pair = %pair, quote_amount, "📤 Submitting market BUY");
        let response: OrderResponse = self
            .signed(
                "place_market_buy",
                Method::POST,
                "/api/v3/order",
                &[
                    ("symbol", pair.exchange_symbol()),
                    ("side", "BUY".to_string()),
                    ("type", "MARKET".to_string()),
                    ("quoteOrderQty", format_decimal(quote_amount, 8)),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;

        self.order_result("place_market_buy", TradeSide::Buy, &pair.base, response)
    }

    async fn place_market_sell(&self, pair: &TradingPair, base_amount: f64) -> Result<OrderResult> {
        let step = self.lot_step(pair).await?;
        let quantity = format_quantity(base_amount, step);
        if quantity.parse::<f64>().unwrap_or(0.0) <= 0.0 {
            return Err(BotError::OrderExecution(format!(
                "sell amount {} below lot step {}",
                base_amount, step
            )));
        }

        tracing::info!(pair = %pair, quantity = %quantity, "📤 Submitting market SELL");
        let response: OrderResponse = self
            .signed(
                "place_market_sell",
                Method::POST,
                "/api/v3/order",
                &[
                    ("symbol", pair.exchange_symbol()),
                    ("side", "SELL".to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", quantity),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;

        self.order_result("place_market_sell", TradeSide::Sell, &pair.quote, response)
    }

    async fn get_current_price(&self, pair: &TradingPair) -> Result<f64> {
        let ticker: TickerPrice = self
            .public_get(
                "get_current_price",
                "/api/v3/ticker/price",
                &[("symbol", pair.exchange_symbol())],
            )
            .await?;
        parse_num("get_current_price", "price", &ticker.price)
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn fetch_history(
        &self,
        pair: &TradingPair,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        // [[open_time, open, high, low, close, volume, close_time, ...], ...]
        let klines: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "fetch_history",
                "/api/v3/klines",
                &[
                    ("symbol", pair.exchange_symbol()),
                    ("interval", timeframe.as_str().to_string()),
                    ("limit", limit.min(1000).to_string()),
                ],
            )
            .await?;

        let now_ms = Utc::now().timestamp_millis();
        let candles: Vec<Candle> = klines
            .into_iter()
            .filter_map(|kline| {
                if kline.len() < 7 {
                    return None;
                }

                let open_time = Utc.timestamp_millis_opt(kline[0].as_i64()?).single()?;
                let close_time = kline[6].as_i64()?;

                Some(Candle {
                    open_time,
                    open: kline[1].as_str()?.parse().ok()?,
                    high: kline[2].as_str()?.parse().ok()?,
                    low: kline[3].as_str()?.parse().ok()?,
                    close: kline[4].as_str()?.parse().ok()?,
                    volume: kline[5].as_str()?.parse().ok()?,
                    is_closed: close_time < now_ms,
                })
            })
            .collect();

        tracing::debug!(
            pair = %pair,
            timeframe = %timeframe,
            count = candles.len(),
            "Historical candles fetched"
        );

        Ok(candles)
    }
}
