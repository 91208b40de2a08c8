//! Configuration for trendbot
//!
//! Built-in defaults, then optional config files, then `TRENDBOT__SECTION__KEY`
//! environment overrides. Secrets only come from the environment.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::exchange::binance::{ApiCredentials, BINANCE_API_BASE};
use crate::market_data::stream::BINANCE_WS_URL;
use crate::models::TradingPair;
use crate::notify::TELEGRAM_API_BASE;
use crate::risk::{CircuitBreakers, RiskConfig};
use crate::strategy::SignalConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotSettings,
    pub strategy: SignalConfig,
    pub risk: RiskConfig,
    pub circuit_breakers: CircuitBreakers,
    pub exchange: ExchangeSettings,
    pub persistence: PersistenceSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Market to trade, BASE/QUOTE
    pub symbol: String,
    /// Seconds between ticks
    pub poll_interval_secs: u64,
    /// Paper trading (no real orders)
    pub dry_run: bool,
    /// Quote amount spent per entry
    pub trade_amount_quote: f64,
    /// Pending entries older than this revert to FLAT
    pub pending_timeout_secs: u64,
    /// Base balance below this is residue, not a position
    pub dust_threshold: f64,
    /// Open position is force-cleared when balance < size * ratio
    pub reconcile_ratio: f64,
    /// Trades scanned for the last buy when rebuilding a position
    pub trade_lookback: usize,
    /// Consecutive failed ticks before an operator alert
    pub failure_alert_threshold: u32,
    /// Upper bound on every broker / feed call
    pub call_timeout_secs: u64,
    /// Candles kept per timeframe
    pub buffer_size: usize,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            symbol: "XLM/USDT".to_string(),
            poll_interval_secs: 10,
            dry_run: true,
            trade_amount_quote: 10.0,
            pending_timeout_secs: 1200,
            dust_threshold: 1.0,
            reconcile_ratio: 0.9,
            trade_lookback: 25,
            failure_alert_threshold: 5,
            call_timeout_secs: 10,
            buffer_size: 500,
        }
    }
}

impl BotSettings {
    pub fn pair(&self) -> Result<TradingPair> {
        self.symbol
            .parse::<TradingPair>()
            .map_err(|e| anyhow::anyhow!(e))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub rest_url: String,
    pub ws_url: String,
    pub requests_per_minute: u32,
    pub http_timeout_secs: u64,
    pub recv_window_ms: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    /// Starting quote balance of the paper broker
    pub paper_initial_quote: f64,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub api_secret: Option<String>,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            rest_url: BINANCE_API_BASE.to_string(),
            ws_url: BINANCE_WS_URL.to_string(),
            requests_per_minute: 600,
            http_timeout_secs: 10,
            recv_window_ms: 5000,
            reconnect_base_secs: 5,
            reconnect_max_secs: 60,
            paper_initial_quote: 1000.0,
            api_key: None,
            api_secret: None,
        }
    }
}

impl ExchangeSettings {
    pub fn credentials(&self) -> Option<ApiCredentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(ApiCredentials {
                    api_key: key.clone(),
                    api_secret: secret.clone(),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub data_dir: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub telegram_api_url: String,
    pub timeout_secs: u64,
    #[serde(skip)]
    pub telegram_bot_token: Option<String>,
    #[serde(skip)]
    pub telegram_chat_id: Option<String>,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            telegram_api_url: TELEGRAM_API_BASE.to_string(),
            timeout_secs: 10,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

impl NotifySettings {
    pub fn telegram_enabled(&self) -> bool {
        matches!(
            (&self.telegram_bot_token, &self.telegram_chat_id),
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty()
        )
    }
}

impl AppConfig {
    /// Load configuration
    ///
    /// `path` replaces the default `config/default` + `config/local` files.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false)),
        };

        let settings = builder
            .add_source(
                Environment::with_prefix("TRENDBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("strategy.confirm_timeframes"),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.apply_secrets_from_env();
        Ok(config)
    }

    fn apply_secrets_from_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        self.exchange.api_key = var("BINANCE_API_KEY");
        self.exchange.api_secret = var("BINANCE_API_SECRET");
        self.notify.telegram_bot_token = var("TELEGRAM_BOT_TOKEN");
        self.notify.telegram_chat_id = var("TELEGRAM_CHAT_ID");
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.bot.pair().context("Invalid bot.symbol")?;

        if self.bot.poll_interval_secs == 0 {
            bail!("bot.poll_interval_secs must be positive");
        }
        if self.bot.trade_amount_quote <= 0.0 {
            bail!("bot.trade_amount_quote must be positive");
        }
        if !(self.bot.reconcile_ratio > 0.0 && self.bot.reconcile_ratio <= 1.0) {
            bail!("bot.reconcile_ratio must be in (0, 1]");
        }
        if self.bot.dust_threshold < 0.0 {
            bail!("bot.dust_threshold must not be negative");
        }
        if self.bot.call_timeout_secs == 0 {
            bail!("bot.call_timeout_secs must be positive");
        }

        let risk = &self.risk;
        if risk.sl_multiplier <= 0.0
            || risk.tp_multiplier <= 0.0
            || risk.trailing_activation_multiplier <= 0.0
            || risk.trailing_multiplier <= 0.0
        {
            bail!("risk multipliers must be positive");
        }
        if risk.fee_rate < 0.0 || risk.slippage_pct < 0.0 {
            bail!("risk.fee_rate and risk.slippage_pct must not be negative");
        }

        let strategy = &self.strategy;
        if strategy.confirm_timeframes.is_empty() {
            bail!("strategy.confirm_timeframes must list at least one timeframe");
        }
        if strategy.indicators.fast_ma_period >= strategy.indicators.slow_ma_period {
            bail!("strategy.indicators.fast_ma_period must be below slow_ma_period");
        }
        if strategy.rsi_lower >= strategy.rsi_upper {
            bail!("strategy.rsi_lower must be below rsi_upper");
        }

        let needed = strategy
            .indicators
            .min_candles()
            .max(strategy.trend_window_len())
            .max(strategy.retrace_lookback);
        if self.bot.buffer_size <= needed {
            bail!(
                "bot.buffer_size ({}) must exceed the longest warm-up window ({})",
                self.bot.buffer_size,
                needed
            );
        }

        if !self.bot.dry_run && self.exchange.credentials().is_none() {
            bail!("live trading requires BINANCE_API_KEY and BINANCE_API_SECRET");
        }

        Ok(())
    }
}
