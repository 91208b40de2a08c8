//! Binance kline WebSocket feed
//!
//! Subscribes to the combined kline stream for one pair and every configured
//! timeframe and keeps the shared `CandleBuffer` current. Reconnects forever
//! with linear backoff until shutdown.

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{CandleBuffer, MarketDataSource};
use crate::exchange::bounded;
use crate::models::{Candle, Timeframe, TradingPair};
use crate::{BotError, Result};

pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443";

const BACKFILL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KlineStream {
    ws_base_url: String,
    pair: TradingPair,
    timeframes: Vec<Timeframe>,
    buffer: CandleBuffer,
    backfill: Option<Arc<dyn MarketDataSource>>,
    connected: Arc<AtomicBool>,
    base_delay: Duration,
    max_delay: Duration,
}

impl KlineStream {
    pub fn new(
        ws_base_url: impl Into<String>,
        pair: TradingPair,
        timeframes: Vec<Timeframe>,
        buffer: CandleBuffer,
    ) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            pair,
            timeframes,
            buffer,
            backfill: None,
            connected: Arc::new(AtomicBool::new(false)),
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Refill gaps left by a disconnect from REST history after reconnecting
    pub fn with_backfill(mut self, source: Arc<dyn MarketDataSource>) -> Self {
        self.backfill = Some(source);
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Shared connection-health flag for status consumers
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub fn stream_url(&self) -> String {
        let symbol = self.pair.stream_symbol();
        let streams: Vec<String> = self
            .timeframes
            .iter()
            .map(|tf| format!("{}@kline_{}", symbol, tf))
            .collect();
        format!(
            "{}/stream?streams={}",
            self.ws_base_url.trim_end_matches('/'),
            streams.join("/")
        )
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let url = self.stream_url();
        let mut attempts = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tracing::info!(
                pair = %self.pair,
                attempt = attempts,
                "Connecting to Binance kline stream..."
            );

            let connection = tokio::select! {
                result = connect_async(url.as_str()) => result,
                _ = shutdown.changed() => break,
            };

            match connection {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();
                    self.connected.store(true, Ordering::SeqCst);
                    tracing::info!(pair = %self.pair, "✅ Connected to kline stream");

                    if attempts > 0 {
                        self.backfill_gaps().await;
                    }
                    attempts = 0;

                    let stop = loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                let _ = write.send(Message::Close(None)).await;
                                break true;
                            }
                            message = read.next() => match message {
                                Some(Ok(Message::Text(text))) => self.handle_text(&text),
                                Some(Ok(Message::Ping(data))) => {
                                    let _ = write.send(Message::Pong(data)).await;
                                }
                                Some(Ok(Message::Close(_))) => {
                                    tracing::warn!("Kline stream closed by server");
                                    break false;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::error!(error = %e, "Kline stream error");
                                    break false;
                                }
                                None => {
                                    tracing::warn!("Kline stream ended");
                                    break false;
                                }
                            }
                        }
                    };

                    self.connected.store(false, Ordering::SeqCst);
                    if stop {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Kline stream connection failed");
                }
            }

            attempts = attempts.saturating_add(1);
            let delay = backoff_delay(self.base_delay, self.max_delay, attempts);
            tracing::info!(
                delay_secs = delay.as_secs(),
                attempt = attempts,
                "🔄 Reconnecting in {} seconds...",
                delay.as_secs()
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("🛑 Kline stream stopped");
    }

    fn handle_text(&self, text: &str) {
        match parse_kline_message(text) {
            Ok(Some((timeframe, candle))) => {
                if candle.is_closed {
                    tracing::debug!(
                        timeframe = %timeframe,
                        close = candle.close,
                        "Candle closed"
                    );
                }
                if let Err(e) = self.buffer.upsert(timeframe, candle) {
                    tracing::warn!("Failed to buffer candle: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to parse kline message"),
        }
    }

    async fn backfill_gaps(&self) {
        let Some(source) = &self.backfill else {
            return;
        };

        let limit = self.buffer.max_candles().min(1000);
        for tf in &self.timeframes {
            match bounded(
                "fetch_history",
                BACKFILL_TIMEOUT,
                source.fetch_history(&self.pair, *tf, limit),
            )
            .await
            {
                Ok(history) => {
                    if let Err(e) = self.buffer.merge_history(*tf, history) {
                        tracing::warn!(timeframe = %tf, "Backfill merge failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!(timeframe = %tf, "Backfill failed: {}", e),
            }
        }
    }
}

/// Linear backoff capped at `max_delay`
pub fn backoff_delay(base_delay: Duration, max_delay: Duration, attempt: u32) -> Duration {
    std::cmp::min(base_delay.saturating_mul(attempt.max(1)), max_delay)
}

/// Parse a combined-stream kline event
///
/// Returns `None` for events that are not klines or use an unknown interval.
pub fn parse_kline_message(text: &str) -> Result<Option<(Timeframe, Candle)>> {
    // Combined stream messages look like {"stream":"xlmusdt@kline_15m","data":{...}}
    let wrapper: serde_json::Value = serde_json::from_str(text)?;
    let data = if wrapper.get("data").is_some() {
        &wrapper["data"]
    } else {
        &wrapper
    };

    if data["e"].as_str() != Some("kline") {
        return Ok(None);
    }

    let k = &data["k"];
    let Some(interval) = k["i"].as_str() else {
        return Err(BotError::DataUnavailable("kline without interval".into()));
    };
    let Ok(timeframe) = interval.parse::<Timeframe>() else {
        return Ok(None);
    };

    let field = |name: &str| -> Result<f64> {
        k[name]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| BotError::DataUnavailable(format!("kline field {} missing", name)))
    };

    let open_ms = k["t"]
        .as_i64()
        .ok_or_else(|| BotError::DataUnavailable("kline open time missing".into()))?;
    let open_time = Utc
        .timestamp_millis_opt(open_ms)
        .single()
        .ok_or_else(|| BotError::DataUnavailable(format!("bad open time {}", open_ms)))?;

    let candle = Candle {
        open_time,
        open: field("o")?,
        high: field("h")?,
        low: field("l")?,
        close: field("c")?,
        volume: field("v")?,
        is_closed: k["x"].as_bool().unwrap_or(false),
    };

    Ok(Some((timeframe, candle)))
}
