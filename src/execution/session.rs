use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

use super::SessionConfig;
use crate::api::{notify, Broker, Notifier};
use crate::clock::Clock;

/// Reconnect state of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    /// Next connect attempt is due at `retry_at`
    Backoff { attempts: u32, retry_at: DateTime<Utc> },
    /// Attempt budget spent; still retrying, at the maximum spacing
    Exhausted { since: DateTime<Utc>, retry_at: DateTime<Utc> },
}

/// Explicit reconnect-with-backoff state machine around a `Broker`
///
/// Delays double from `reconnect_base_ms` up to `reconnect_max_ms` with a
/// little jitter. After `reconnect_max_attempts` failures the session goes
/// `Exhausted`, alerts once, and keeps trying at `reconnect_max_ms`.
pub struct BrokerSession {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: SessionConfig,
    state: SessionState,
    rng: StdRng,
}

impl BrokerSession {
    pub fn new(
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: SessionConfig,
    ) -> Self {
        let now = clock.now();
        Self {
            broker,
            clock,
            notifier,
            config,
            state: SessionState::Backoff {
                attempts: 0,
                retry_at: now,
            },
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic jitter for tests
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Record a failed call that reported the session as gone
    pub fn mark_disconnected(&mut self) {
        if self.is_connected() {
            tracing::warn!("🔌 Broker session lost");
            self.state = SessionState::Backoff {
                attempts: 0,
                retry_at: self.clock.now(),
            };
        }
    }

    fn backoff_delay(&mut self, attempts: u32) -> Duration {
        let base = self.config.reconnect_base_ms.max(1);
        let exp = base.saturating_mul(1u64 << attempts.saturating_sub(1).min(20));
        let capped = exp.min(self.config.reconnect_max_ms.max(base));
        let jitter = self.rng.gen_range(0..=capped / 10);
        Duration::from_millis(capped + jitter)
    }

    fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
    }

    async fn on_failure(&mut self, reason: String) {
        let now = self.clock.now();
        let previous = match self.state {
            SessionState::Exhausted { since, .. } => {
                let delay = Duration::from_millis(self.config.reconnect_max_ms);
                self.state = SessionState::Exhausted {
                    since,
                    retry_at: Self::after(now, delay),
                };
                tracing::debug!("Reconnect still failing: {}", reason);
                return;
            }
            SessionState::Backoff { attempts, .. } => attempts,
            SessionState::Connected => 0,
        };
        let attempts = previous + 1;

        if attempts >= self.config.reconnect_max_attempts {
            let delay = Duration::from_millis(self.config.reconnect_max_ms);
            self.state = SessionState::Exhausted {
                since: now,
                retry_at: Self::after(now, delay),
            };
            tracing::error!("❌ Broker reconnect failed {} times: {}", attempts, reason);
            notify(
                self.notifier.as_ref(),
                &format!(
                    "🚨 Broker unreachable after {} attempts ({}). Order submission suspended, retrying every {}s.",
                    attempts,
                    reason,
                    self.config.reconnect_max_ms / 1000
                ),
            )
            .await;
        } else {
            let delay = self.backoff_delay(attempts);
            tracing::warn!(
                "Broker connect attempt {} failed ({}), retrying in {:?}",
                attempts,
                reason,
                delay
            );
            self.state = SessionState::Backoff {
                attempts,
                retry_at: Self::after(now, delay),
            };
        }
    }

    /// Make sure the session is up, reconnecting with backoff if needed
    ///
    /// Waits out backoff delays through the clock. Returns `false` once
    /// the session is `Exhausted` and its next retry is not yet due.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.is_connected() {
            if self.broker.is_connected().await {
                return true;
            }
            self.mark_disconnected();
        }

        loop {
            let now = self.clock.now();
            match self.state {
                SessionState::Connected => return true,
                SessionState::Exhausted { retry_at, .. } if now < retry_at => return false,
                SessionState::Backoff { retry_at, .. } if now < retry_at => {
                    let wait = (retry_at - now).to_std().unwrap_or(Duration::ZERO);
                    self.clock.sleep(wait).await;
                }
                _ => {}
            }

            let was_exhausted = matches!(self.state, SessionState::Exhausted { .. });
            match self.broker.connect().await {
                Ok(()) => {
                    tracing::info!("✅ Broker session connected");
                    if was_exhausted {
                        notify(self.notifier.as_ref(), "✅ Broker connection restored").await;
                    }
                    self.state = SessionState::Connected;
                    return true;
                }
                Err(e) => self.on_failure(e.to_string()).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::execution::PaperBroker;
    use crate::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_message(&self, text: &str) -> Result<()> {
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn setup(fail_connects: u32) -> (ManualClock, Arc<PaperBroker>, Arc<RecordingNotifier>, BrokerSession) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap());
        let broker = Arc::new(PaperBroker::new(10_000.0));
        broker.fail_next_connects(fail_connects);
        let notifier = Arc::new(RecordingNotifier::default());
        let config = SessionConfig {
            reconnect_base_ms: 1000,
            reconnect_max_ms: 8000,
            reconnect_max_attempts: 4,
            ..Default::default()
        };
        let session = BrokerSession::new(broker.clone(), Arc::new(clock.clone()), notifier.clone(), config).with_seed(1);
        (clock, broker, notifier, session)
    }

    #[tokio::test]
    async fn test_connects_first_time() {
        let (clock, _broker, _notifier, mut session) = setup(0);
        assert!(session.ensure_connected().await);
        assert!(session.is_connected());
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_backoff_doubles_until_connected() {
        let (clock, _broker, notifier, mut session) = setup(2);

        assert!(session.ensure_connected().await);

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        // 1s and 2s plus up to 10% jitter
        assert!(sleeps[0] >= Duration::from_millis(1000) && sleeps[0] <= Duration::from_millis(1100));
        assert!(sleeps[1] >= Duration::from_millis(2000) && sleeps[1] <= Duration::from_millis(2200));
        assert!(notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_alerts_once_and_keeps_retrying() {
        let (clock, broker, notifier, mut session) = setup(100);

        assert!(!session.ensure_connected().await);
        assert!(matches!(session.state(), SessionState::Exhausted { .. }));
        assert_eq!(notifier.messages.lock().unwrap().len(), 1);

        // Next cycle before retry_at: no attempt, no new alert
        assert!(!session.ensure_connected().await);
        clock.advance(Duration::from_secs(8));
        assert!(!session.ensure_connected().await);
        assert_eq!(notifier.messages.lock().unwrap().len(), 1);

        broker.fail_next_connects(0);
        clock.advance(Duration::from_secs(8));
        assert!(session.ensure_connected().await);

        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("restored"));
    }

    #[tokio::test]
    async fn test_lost_session_is_detected() {
        let (_clock, broker, _notifier, mut session) = setup(0);
        assert!(session.ensure_connected().await);

        broker.disconnect();
        broker.fail_next_connects(1);
        assert!(session.ensure_connected().await);
        assert!(broker.connect_attempts() >= 3);
    }
}
