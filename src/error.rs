use thiserror::Error;

/// Failure taxonomy for the decision engine and its collaborators
#[derive(Debug, Error)]
pub enum BotError {
    /// Not enough candle history, or the feed is down
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Broker or feed call failed or timed out
    #[error("{call} failed: {message}")]
    ExternalCall {
        call: String,
        message: String,
        transient: bool,
    },

    /// Persisted position is missing required fields or holds invalid values
    #[error("state corruption: {0}")]
    StateCorruption(String),

    /// Local state disagrees with the exchange
    #[error("reconciliation mismatch: expected {expected}, observed {observed}")]
    ReconciliationMismatch { expected: String, observed: String },

    /// Order was rejected or returned no fill
    #[error("order execution failed: {0}")]
    OrderExecution(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl BotError {
    pub fn external(call: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        BotError::ExternalCall {
            call: call.into(),
            message: message.into(),
            transient,
        }
    }

    /// Whether the failure should simply be retried on the next tick
    pub fn is_transient(&self) -> bool {
        match self {
            BotError::DataUnavailable(_) => true,
            BotError::ExternalCall { transient, .. } => *transient,
            BotError::OrderExecution(_) => true,
            _ => false,
        }
    }

    /// Transport-level HTTP failure for `call`
    pub fn http(call: impl Into<String>, e: reqwest::Error) -> Self {
        let transient = e.is_timeout()
            || e.is_connect()
            || e.is_request()
            || e.status().map(|s| s.is_server_error() || s.as_u16() == 429).unwrap_or(false);
        BotError::external(call, e.to_string(), transient)
    }

    /// Routine failures that feed the consecutive-failure counter
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            BotError::DataUnavailable(_) | BotError::ExternalCall { .. }
        )
    }
}
