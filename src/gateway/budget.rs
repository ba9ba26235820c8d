use chrono::{DateTime, NaiveDate, Utc};
use governor::clock::Clock as GovernorClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::clock::Clock;

/// Outcome of asking the budget for one provider request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// Bucket is empty; a token frees up after this long
    Wait(Duration),
    /// Daily ceiling reached; nothing until the next UTC day
    DailyExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetUsage {
    /// Requests granted within the trailing window
    pub window_used: u32,
    pub window_capacity: u32,
    pub daily_used: u32,
    pub daily_limit: u32,
}

/// Governor time source reading the injected clock
#[derive(Clone)]
struct InjectedClock(Arc<dyn Clock>);

impl GovernorClock for InjectedClock {
    type Instant = SystemTime;

    fn now(&self) -> SystemTime {
        SystemTime::from(self.0.now())
    }
}

type Bucket = RateLimiter<NotKeyed, InMemoryState, InjectedClock, NoOpMiddleware<SystemTime>>;

/// Token bucket with a daily ceiling
///
/// The bucket holds `capacity` tokens and regains one every
/// `window / capacity`. On top of it, no trailing `window` ever sees more
/// than `capacity` grants, so a drained-then-refilled bucket cannot double
/// the provider quota across a window edge. The daily counter resets when
/// the UTC date changes.
pub struct RequestBudget {
    bucket: Bucket,
    clock: Arc<dyn Clock>,
    capacity: u32,
    window: Duration,
    daily_limit: u32,
    granted: VecDeque<DateTime<Utc>>,
    day: Option<NaiveDate>,
    daily_used: u32,
}

impl RequestBudget {
    pub fn new(capacity: u32, window: Duration, daily_limit: u32, clock: Arc<dyn Clock>) -> Self {
        let burst = NonZeroU32::new(capacity.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            bucket: RateLimiter::direct_with_clock(quota, &InjectedClock(clock.clone())),
            clock,
            capacity: burst.get(),
            window,
            daily_limit,
            granted: VecDeque::with_capacity(burst.get() as usize),
            day: None,
            daily_used: 0,
        }
    }

    fn window_len(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                tracing::info!("📅 Provider day rolled over, daily request counter reset");
            }
            self.day = Some(today);
            self.daily_used = 0;
        }

        let start = now - self.window_len();
        while self.granted.front().is_some_and(|t| *t <= start) {
            self.granted.pop_front();
        }
    }

    /// Take one token if available
    pub fn try_acquire(&mut self) -> Acquire {
        let now = self.clock.now();
        self.roll(now);

        if self.daily_used >= self.daily_limit {
            return Acquire::DailyExhausted;
        }

        if self.granted.len() >= self.capacity as usize {
            let frees_at = self.granted.front().copied().unwrap_or(now) + self.window_len();
            let wait = (frees_at - now).to_std().unwrap_or(Duration::ZERO);
            return Acquire::Wait(wait);
        }

        if let Err(not_until) = self.bucket.check() {
            return Acquire::Wait(not_until.wait_time_from(SystemTime::from(now)));
        }

        self.granted.push_back(now);
        self.daily_used += 1;
        Acquire::Granted
    }

    pub fn usage(&self) -> BudgetUsage {
        BudgetUsage {
            window_used: self.granted.len() as u32,
            window_capacity: self.capacity,
            daily_used: self.daily_used,
            daily_limit: self.daily_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn setup(capacity: u32, window: Duration, daily_limit: u32) -> (ManualClock, RequestBudget) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap());
        let budget = RequestBudget::new(capacity, window, daily_limit, Arc::new(clock.clone()));
        (clock, budget)
    }

    fn grant_many(budget: &mut RequestBudget, attempts: usize) -> usize {
        (0..attempts)
            .filter(|_| budget.try_acquire() == Acquire::Granted)
            .count()
    }

    #[test]
    fn test_capacity_then_wait() {
        let (clock, mut budget) = setup(8, Duration::from_secs(1), 800);

        assert_eq!(grant_many(&mut budget, 20), 8);
        assert_eq!(budget.try_acquire(), Acquire::Wait(Duration::from_secs(1)));

        clock.advance(Duration::from_millis(400));
        assert_eq!(budget.try_acquire(), Acquire::Wait(Duration::from_millis(600)));
    }

    #[test]
    fn test_refills_after_window() {
        let (clock, mut budget) = setup(2, Duration::from_secs(60), 800);

        assert_eq!(budget.try_acquire(), Acquire::Granted);
        assert_eq!(budget.try_acquire(), Acquire::Granted);
        assert!(matches!(budget.try_acquire(), Acquire::Wait(_)));

        clock.advance(Duration::from_secs(60));
        assert_eq!(budget.try_acquire(), Acquire::Granted);
        assert_eq!(budget.usage().window_used, 1);
        assert_eq!(budget.usage().daily_used, 3);
    }

    #[test]
    fn test_no_double_burst_across_window_edge() {
        let (clock, mut budget) = setup(8, Duration::from_secs(1), 800);

        assert_eq!(grant_many(&mut budget, 1), 1);
        clock.advance(Duration::from_millis(990));
        let before_edge = grant_many(&mut budget, 7);
        clock.advance(Duration::from_millis(10));
        let after_edge = grant_many(&mut budget, 8);

        // Everything after the first grant landed within 10ms
        assert_eq!(before_edge, 7);
        assert!(
            before_edge + after_edge <= 8,
            "{} grants within 10ms",
            before_edge + after_edge
        );
    }

    #[test]
    fn test_quota_holds_in_every_window() {
        let (clock, mut budget) = setup(8, Duration::from_secs(1), 800);
        let t0 = clock.now();
        let mut grants = Vec::new();

        // One attempt every 50ms for five seconds
        for _ in 0..100 {
            if budget.try_acquire() == Acquire::Granted {
                grants.push(clock.now());
            }
            clock.advance(Duration::from_millis(50));
        }

        for start in &grants {
            let end = *start + chrono::Duration::seconds(1);
            let in_window = grants.iter().filter(|t| **t >= *start && **t < end).count();
            assert!(in_window <= 8, "{} grants in the second after {}", in_window, start);
        }
        assert_eq!(grants.len(), 40);
        assert_eq!(grants[8], t0 + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_daily_ceiling_resets_on_utc_rollover() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 23, 59, 0).unwrap());
        let mut budget = RequestBudget::new(10, Duration::from_secs(1), 3, Arc::new(clock.clone()));

        for _ in 0..3 {
            assert_eq!(budget.try_acquire(), Acquire::Granted);
            clock.advance(Duration::from_secs(2));
        }
        assert_eq!(budget.try_acquire(), Acquire::DailyExhausted);

        clock.advance(Duration::from_secs(60));
        assert_eq!(budget.try_acquire(), Acquire::Granted);
        assert_eq!(budget.usage().daily_used, 1);
    }
}
