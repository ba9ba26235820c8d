use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for the monitoring engine
///
/// Per-symbol and per-position errors are caught at the orchestrator
/// boundary; only `Configuration` is fatal, and only at startup.
#[derive(Error, Debug)]
pub enum Error {
    /// Request budget exhausted; the caller should wait and retry
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    /// No fresh data and nothing cached to fall back on
    #[error("market data unavailable for {symbol}: {reason}")]
    ProviderUnavailable { symbol: String, reason: String },

    #[error("broker disconnected: {0}")]
    BrokerDisconnected(String),

    #[error("order rejected for {symbol}: {reason}")]
    OrderRejected { symbol: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient data for {symbol}: have {have} bars, need {need}")]
    InsufficientData {
        symbol: String,
        have: usize,
        need: usize,
    },

    /// Provider answered but reported an error payload
    #[error("provider error: {0}")]
    Provider(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("AI validation failed: {0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that a later cycle may clear on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RateLimitExceeded { .. }
                | Error::ProviderUnavailable { .. }
                | Error::BrokerDisconnected(_)
                | Error::Http(_)
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::BrokerDisconnected("socket closed".into()).is_transient());
        assert!(Error::RateLimitExceeded {
            retry_after: Duration::from_secs(3)
        }
        .is_transient());
        assert!(!Error::Configuration("missing api key".into()).is_transient());
        assert!(!Error::OrderRejected {
            symbol: "EUR/USD".into(),
            reason: "invalid stops".into()
        }
        .is_transient());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = Error::ProviderUnavailable {
            symbol: "XAU/USD".into(),
            reason: "daily quota exhausted".into(),
        };
        assert_eq!(
            err.to_string(),
            "market data unavailable for XAU/USD: daily quota exhausted"
        );
    }
}
