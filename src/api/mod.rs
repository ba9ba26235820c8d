// External collaborators
//
// The engine only depends on the traits below; concrete adapters live in
// the submodules (Twelve Data over HTTP, a synthetic offline feed, Telegram,
// an OpenAI-backed validator).

pub mod openai;
pub mod synthetic;
pub mod telegram;
pub mod twelvedata;

pub use openai::OpenAiValidator;
pub use synthetic::{MarketScenario, SyntheticProvider};
pub use telegram::TelegramNotifier;
pub use twelvedata::TwelveDataClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::indicators::{IndicatorKind, IndicatorSeries};
use crate::models::{
    AccountInfo, Candle, InstrumentSpec, MarketSnapshot, OrderReceipt, OrderRequest, Position,
    Quote, Signal, Timeframe,
};
use crate::Result;

/// Rate-limited market data source
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote>;

    /// OHLCV bars ordered oldest -> newest
    async fn time_series(&self, symbol: &str, interval: Timeframe, size: usize) -> Result<Vec<Candle>>;

    async fn indicator(
        &self,
        symbol: &str,
        kind: IndicatorKind,
        interval: Timeframe,
        size: usize,
    ) -> Result<IndicatorSeries>;
}

/// Ticket-addressed broker execution API
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    async fn positions(&self) -> Result<Vec<Position>>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt>;

    /// Replace both protective levels; `0.0` clears a level
    async fn modify_order(&self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()>;

    async fn account_info(&self) -> Result<AccountInfo>;

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec>;
}

/// Outcome of an advisory AI review of a candidate signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Validation {
    pub validated: bool,
    pub confidence: f64, // 0 - 100
    #[serde(default)]
    pub comment: String,
}

#[async_trait]
pub trait AiValidator: Send + Sync {
    async fn validate(&self, snapshot: &MarketSnapshot, signal: &Signal) -> Result<Validation>;
}

/// Best-effort operator channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<()>;
}

/// Notifier that only writes to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_message(&self, text: &str) -> Result<()> {
        tracing::info!(target: "tradeguard::notify", "📣 {}", text);
        Ok(())
    }
}

/// Fire-and-forget send: failures are logged, never returned
pub async fn notify(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send_message(text).await {
        tracing::warn!("Notification failed ({}): {}", e, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send_message(&self, _text: &str) -> Result<()> {
            Err(Error::Notification("chat not found".to_string()))
        }
    }

    #[tokio::test]
    async fn test_notify_swallows_failures() {
        // Must not panic or propagate
        notify(&FailingNotifier, "position 42 left unprotected").await;
        notify(&LogNotifier, "hello").await;
    }
}
