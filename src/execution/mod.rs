// Order execution and broker session module
pub mod orders;
pub mod paper;
pub mod session;

pub use orders::{OrderSubmitter, Submission};
pub use paper::{PaperBroker, PaperFill};
pub use session::{BrokerSession, SessionState};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: u32,
    pub order_max_attempts: u32,
    pub order_retry_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1000,   // 1s first retry
            reconnect_max_ms: 60_000,  // capped at 1 min
            reconnect_max_attempts: 5, // then alert and slow down
            order_max_attempts: 3,
            order_retry_delay_ms: 500,
        }
    }
}

/// Receives each cycle's latest price per symbol
///
/// The paper broker uses this to mark positions to market from the same
/// data the engine analyses.
pub trait PriceObserver: Send + Sync {
    fn observe_price(&self, symbol: &str, price: f64);
}

impl PriceObserver for PaperBroker {
    fn observe_price(&self, symbol: &str, price: f64) {
        self.set_price(symbol, price);
    }
}
