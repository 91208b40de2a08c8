use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Min1 => Duration::minutes(1),
            Timeframe::Min5 => Duration::minutes(5),
            Timeframe::Min15 => Duration::minutes(15),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Hour4 => Duration::hours(4),
            Timeframe::Day1 => Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Timeframe::Min1),
            "5m" => Ok(Timeframe::Min5),
            "15m" => Ok(Timeframe::Min15),
            "1h" => Ok(Timeframe::Hour1),
            "4h" => Ok(Timeframe::Hour4),
            "1d" => Ok(Timeframe::Day1),
            other => Err(format!("unsupported timeframe: {}", other)),
        }
    }
}

/// OHLCV candlestick
///
/// Closed candles are immutable; the trailing candle of a live feed is
/// replaced in place until `is_closed` flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Spot market pair, e.g. XLM/USDT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    /// Exchange symbol (XLMUSDT)
    pub fn exchange_symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// Lowercase symbol used in stream names (xlmusdt)
    pub fn stream_symbol(&self) -> String {
        self.exchange_symbol().to_lowercase()
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| format!("symbol must look like BASE/QUOTE, got {}", s))?;
        let base = base.trim().to_uppercase();
        let quote = quote.trim().to_uppercase();
        if base.is_empty() || quote.is_empty() {
            return Err(format!("symbol must look like BASE/QUOTE, got {}", s));
        }
        Ok(Self { base, quote })
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Signal, // Signal evaluator exit (overbought, bearish cross, retrace, reversal)
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::Signal => "SIGNAL",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open long position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub size: f64, // Base asset amount
    pub entry_time: DateTime<Utc>,
    pub sl_price: f64,
    pub tp_price: f64,
    pub trailing_sl_price: f64,
    pub trailing_activated: bool,
    pub highest_price_since_activation: Option<f64>,
    /// Rebuilt by reconciliation without a matching buy in trade history
    #[serde(default)]
    pub entry_approximated: bool,
}

impl Position {
    /// Structural sanity check; a failure means the record cannot be managed
    pub fn validate(&self) -> Result<(), String> {
        if !self.entry_price.is_finite() || self.entry_price <= 0.0 {
            return Err(format!("invalid entry_price {}", self.entry_price));
        }
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(format!("invalid size {}", self.size));
        }
        if !self.sl_price.is_finite() || !self.tp_price.is_finite() {
            return Err("non-finite risk levels".to_string());
        }
        if self.trailing_activated && self.highest_price_since_activation.is_none() {
            return Err("trailing active without a recorded high".to_string());
        }
        Ok(())
    }

    /// Unrealized P&L in percent at `price`
    pub fn pnl_percent(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }
}

/// Entry signal awaiting its candle's close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub signal_time: DateTime<Utc>,
    /// Open time of the fast-timeframe candle that produced the signal
    pub candle_open_time: DateTime<Utc>,
}

/// Process-wide bot state, one per running instance
#[derive(Debug, Clone, PartialEq)]
pub struct BotState {
    pub symbol: String,
    pub position: Option<Position>,
    pub pending: Option<PendingEntry>,
    pub last_realized_loss_time: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
}

impl BotState {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            position: None,
            pending: None,
            last_realized_loss_time: None,
            last_modified: Utc::now(),
        }
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn pending_confirmation(&self) -> bool {
        self.pending.is_some()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_modified = now;
    }
}

/// Completed round trip, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl_percent: f64,
    pub reason: ExitReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Fill from the account's trade history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTrade {
    pub side: TradeSide,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of a market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub side: TradeSide,
    pub filled_base: f64,
    pub average_price: f64,
    pub timestamp: DateTime<Utc>,
}
