// Risk management module
pub mod circuit_breakers;
pub mod kelly;
pub mod sizing;

pub use circuit_breakers::{CircuitBreakerTrip, CircuitBreakers, TradingState};
pub use kelly::TradeStats;
pub use sizing::{Rejection, RiskConfig, RiskDecision, RiskSizer, SizingContext};
