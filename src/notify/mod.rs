// Operator notifications
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::exchange::guard::classify_status;
use crate::{BotError, Result};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    fn icon(&self) -> &'static str {
        match self {
            AlertLevel::Info => "ℹ️",
            AlertLevel::Warning => "⚠️",
            AlertLevel::Critical => "🚨",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub detail: String,
}

impl Alert {
    pub fn new(level: AlertLevel, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn info(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(AlertLevel::Info, title, detail)
    }

    pub fn warning(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(AlertLevel::Warning, title, detail)
    }

    pub fn critical(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(AlertLevel::Critical, title, detail)
    }

    /// Telegram Markdown body
    pub fn to_markdown(&self) -> String {
        format!("{} *{}*\n{}", self.level.icon(), self.title, self.detail)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        match alert.level {
            AlertLevel::Info => tracing::info!("{} {}: {}", alert.level.icon(), alert.title, alert.detail),
            AlertLevel::Warning => {
                tracing::warn!("{} {}: {}", alert.level.icon(), alert.title, alert.detail)
            }
            AlertLevel::Critical => {
                tracing::error!("{} {}: {}", alert.level.icon(), alert.title, alert.detail)
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

/// Telegram Bot API `sendMessage` notifier
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BotError::http("build_client", e))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: alert.to_markdown(),
            parse_mode: "Markdown",
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BotError::http("telegram", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("telegram", status, &body));
        }

        tracing::debug!(title = %alert.title, "📨 Telegram message sent");
        Ok(())
    }
}
