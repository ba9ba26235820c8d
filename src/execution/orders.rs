use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::api::{notify, Broker, Notifier};
use crate::clock::Clock;
use crate::models::{OrderReceipt, OrderRequest};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Filled(OrderReceipt),
    /// Every attempt was rejected; an alert has been sent
    Exhausted { attempts: u32, last_reason: String },
}

/// Serialised order placement with bounded retries
///
/// All submissions for the account go through one lock so two cycles (or
/// two symbols) can never race a duplicate order in. Retries reuse the
/// request's `client_id`.
pub struct OrderSubmitter {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    retry_delay: Duration,
    lock: Mutex<()>,
}

impl OrderSubmitter {
    pub fn new(
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            broker,
            clock,
            notifier,
            max_attempts: max_attempts.max(1),
            retry_delay,
            lock: Mutex::new(()),
        }
    }

    /// Place the order, retrying rejections. Other errors (disconnects,
    /// transport) are returned for the caller to handle.
    pub async fn submit(&self, order: &OrderRequest) -> Result<Submission> {
        let _guard = self.lock.lock().await;
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            match self.broker.place_order(order).await {
                Ok(receipt) => {
                    tracing::info!(
                        symbol = %order.symbol,
                        ticket = receipt.ticket,
                        "✅ {} {:.2} filled at {:.5}",
                        order.side,
                        order.volume,
                        receipt.price
                    );
                    return Ok(Submission::Filled(receipt));
                }
                Err(Error::OrderRejected { reason, .. }) => {
                    tracing::warn!(
                        symbol = %order.symbol,
                        "Order rejected (attempt {}/{}): {}",
                        attempt,
                        self.max_attempts,
                        reason
                    );
                    last_reason = reason;
                    if attempt < self.max_attempts {
                        self.clock.sleep(self.retry_delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        notify(
            self.notifier.as_ref(),
            &format!(
                "🚨 Order for {} {} {:.2} rejected {} times: {}",
                order.side, order.symbol, order.volume, self.max_attempts, last_reason
            ),
        )
        .await;

        Ok(Submission::Exhausted {
            attempts: self.max_attempts,
            last_reason,
        })
    }
}
