use std::future::Future;
use std::time::Duration;

use crate::{BotError, Result};

/// Run one external call with a hard timeout
///
/// A timeout becomes a transient `ExternalCall` error; the call is never
/// retried here, the next tick does that.
pub async fn bounded<T, F>(call: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(call, transient = e.is_transient(), "External call failed: {}", e);
            Err(e)
        }
        Err(_) => {
            tracing::warn!(call, timeout_ms = limit.as_millis() as u64, "External call timed out");
            Err(BotError::external(
                call,
                format!("timed out after {}ms", limit.as_millis()),
                true,
            ))
        }
    }
}

/// Classify a non-success HTTP status
///
/// 429, 418 and 5xx are transient; anything else (bad signature, invalid
/// symbol, insufficient balance) is fatal for this request.
pub fn classify_status(call: &str, status: reqwest::StatusCode, body: &str) -> BotError {
    let transient =
        status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 418;
    BotError::external(call, format!("HTTP {}: {}", status, body), transient)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_value_through() {
        let value = bounded("noop", Duration::from_millis(100), async { Ok(42) }).await;
        assert_eq!(value.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_bounded_times_out_as_transient() {
        let result: Result<()> = bounded("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("slow failed"));
    }

    #[tokio::test]
    async fn test_bounded_keeps_inner_error() {
        let result: Result<()> = bounded("order", Duration::from_millis(100), async {
            Err(BotError::OrderExecution("rejected".into()))
        })
        .await;

        assert!(matches!(result, Err(BotError::OrderExecution(_))));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status("x", reqwest::StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("x", reqwest::StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status("x", reqwest::StatusCode::BAD_REQUEST, "-2010").is_transient());
    }
}
