use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account-level limits that suspend new entries
///
/// A tripped breaker only blocks order submission; open positions keep
/// being guarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakers {
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_consecutive_losses: u32,
    pub max_daily_trades: u32,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.05,  // -5% daily
            max_drawdown_pct: 0.20,    // -20% from peak
            max_consecutive_losses: 5, // 5 losses in a row
            max_daily_trades: 10,      // Max 10 entries per day
        }
    }
}

/// Running account figures the breakers look at
#[derive(Debug, Clone)]
pub struct TradingState {
    pub equity: f64,
    pub peak_equity: f64,
    pub day_start_equity: f64,
    pub daily_pnl: f64,
    pub consecutive_losses: u32,
    pub daily_trades: u32,
    day: NaiveDate,
}

impl TradingState {
    pub fn new(equity: f64, now: DateTime<Utc>) -> Self {
        Self {
            equity,
            peak_equity: equity,
            day_start_equity: equity,
            daily_pnl: 0.0,
            consecutive_losses: 0,
            daily_trades: 0,
            day: now.date_naive(),
        }
    }

    /// Reset daily counters when the UTC date changes
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.daily_pnl = 0.0;
            self.daily_trades = 0;
            self.day_start_equity = self.equity;
        }
    }

    pub fn update_equity(&mut self, equity: f64) {
        self.equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn record_entry(&mut self) {
        self.daily_trades += 1;
    }

    pub fn record_close(&mut self, pnl: f64) {
        self.daily_pnl += pnl;
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerTrip {
    DailyLoss,
    MaxDrawdown,
    ConsecutiveLosses,
    DailyTradeLimit,
}

impl fmt::Display for CircuitBreakerTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitBreakerTrip::DailyLoss => "daily loss limit",
            CircuitBreakerTrip::MaxDrawdown => "max drawdown",
            CircuitBreakerTrip::ConsecutiveLosses => "consecutive losses",
            CircuitBreakerTrip::DailyTradeLimit => "daily trade limit",
        };
        f.write_str(label)
    }
}

impl CircuitBreakers {
    pub fn check(&self, state: &TradingState) -> Result<(), CircuitBreakerTrip> {
        // Daily loss against the equity the day started with
        if state.day_start_equity > 0.0 {
            let daily_loss_pct = state.daily_pnl / state.day_start_equity;
            if daily_loss_pct < -self.max_daily_loss_pct {
                return Err(CircuitBreakerTrip::DailyLoss);
            }
        }

        if state.peak_equity > 0.0 {
            let drawdown = (state.peak_equity - state.equity) / state.peak_equity;
            if drawdown > self.max_drawdown_pct {
                return Err(CircuitBreakerTrip::MaxDrawdown);
            }
        }

        if state.consecutive_losses >= self.max_consecutive_losses {
            return Err(CircuitBreakerTrip::ConsecutiveLosses);
        }

        if state.daily_trades >= self.max_daily_trades {
            return Err(CircuitBreakerTrip::DailyTradeLimit);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_circuit_breaker_daily_loss() {
        let breakers = CircuitBreakers::default();
        let mut state = TradingState::new(10000.0, now());

        // -6% on the day
        state.record_close(-600.0);
        state.update_equity(9400.0);

        assert_eq!(breakers.check(&state), Err(CircuitBreakerTrip::DailyLoss));
    }

    #[test]
    fn test_circuit_breaker_drawdown() {
        let breakers = CircuitBreakers::default();
        let mut state = TradingState::new(10000.0, now());

        // Peak 12000, now 9000 = 25% drawdown
        state.update_equity(12000.0);
        state.update_equity(9000.0);

        assert_eq!(breakers.check(&state), Err(CircuitBreakerTrip::MaxDrawdown));
    }

    #[test]
    fn test_circuit_breaker_consecutive_losses_reset_by_win() {
        let breakers = CircuitBreakers::default();
        let mut state = TradingState::new(100_000.0, now());

        for _ in 0..5 {
            state.record_close(-10.0);
        }
        assert_eq!(breakers.check(&state), Err(CircuitBreakerTrip::ConsecutiveLosses));

        state.record_close(25.0);
        assert!(breakers.check(&state).is_ok());
    }

    #[test]
    fn test_daily_counters_roll_over() {
        let breakers = CircuitBreakers::default();
        let mut state = TradingState::new(10000.0, now());

        for _ in 0..10 {
            state.record_entry();
        }
        assert_eq!(breakers.check(&state), Err(CircuitBreakerTrip::DailyTradeLimit));

        state.roll_day(now() + chrono::Duration::days(1));
        assert_eq!(state.daily_trades, 0);
        assert!(breakers.check(&state).is_ok());
    }

    #[test]
    fn test_circuit_breaker_ok() {
        let breakers = CircuitBreakers::default();
        let state = TradingState::new(10000.0, now());
        assert!(breakers.check(&state).is_ok());
    }
}
