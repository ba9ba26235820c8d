use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::indicators::IndicatorSet;

/// Bar interval as understood by the market data provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1min")]
    M1,
    #[serde(rename = "5min")]
    M5,
    #[serde(rename = "15min")]
    M15,
    #[serde(rename = "30min")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1day")]
    D1,
}

impl Timeframe {
    /// Interval string used on the wire (`interval=` query parameter)
    pub fn as_interval(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1min",
            Timeframe::M5 => "5min",
            Timeframe::M15 => "15min",
            Timeframe::M30 => "30min",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1day",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_interval())
    }
}

/// OHLCV candlestick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest traded price for a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// One polling cycle's view of a symbol
///
/// The indicator set is always computed from exactly the candles carried
/// here, never mixed with an older window.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>, // oldest -> newest
    pub indicators: IndicatorSet,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl MarketSnapshot {
    pub fn last_price(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }
}

/// Directional opinion of a strategy or of the aggregated signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    Neutral,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Buy => Some(Side::Buy),
            Direction::Sell => Some(Side::Sell),
            Direction::Neutral => None,
        }
    }
}

/// A single strategy's vote. Abstaining strategies produce no vote at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub strategy: String,
    pub direction: Direction,
    pub strength: f64, // 0.0 - 1.0
}

/// Aggregated trading signal for one symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub strength: f64,   // 0 - 100
    pub confidence: f64, // 0 - 100
    pub votes: Vec<Vote>,
    pub abstained: Vec<String>,
    pub price: f64,
    pub atr: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::Neutral
    }
}

/// Position side as reported by the broker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for long, -1 for short. Multiplying a price distance by this
    /// turns "further in profit" into "larger".
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

/// Open position as reported by the broker.
///
/// Stop-loss and take-profit follow the broker convention: `0.0` means
/// the level is not set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub current_price: f64,
    pub profit: f64, // unrealized, account currency
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn has_stop_loss(&self) -> bool {
        self.stop_loss > 0.0
    }

    pub fn has_take_profit(&self) -> bool {
        self.take_profit > 0.0
    }

    /// Unrealized profit expressed as a price distance (negative when losing)
    pub fn profit_distance(&self) -> f64 {
        (self.current_price - self.entry_price) * self.side.sign()
    }
}

/// Protection lifecycle of a guarded position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionState {
    Unprotected,
    SlOnly,
    TpOnly,
    Protected,
    BreakevenApplied,
    TrailingActive,
    Closed,
}

impl ProtectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtectionState::Closed)
    }

    /// Missing at least one protective level
    pub fn needs_repair(&self) -> bool {
        matches!(
            self,
            ProtectionState::Unprotected | ProtectionState::SlOnly | ProtectionState::TpOnly
        )
    }

    /// Stop sits at breakeven or better and may only tighten from here
    pub fn stop_locked(&self) -> bool {
        matches!(self, ProtectionState::BreakevenApplied | ProtectionState::TrailingActive)
    }

    /// Whether the guardian is allowed to move from `self` to `next`
    pub fn can_transition_to(&self, next: ProtectionState) -> bool {
        use ProtectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Unprotected | SlOnly | TpOnly, Protected) => true,
            (Unprotected, SlOnly | TpOnly) => true,
            (Protected, BreakevenApplied) => true,
            (BreakevenApplied | TrailingActive, TrailingActive) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProtectionState::Unprotected => "UNPROTECTED",
            ProtectionState::SlOnly => "SL_ONLY",
            ProtectionState::TpOnly => "TP_ONLY",
            ProtectionState::Protected => "PROTECTED",
            ProtectionState::BreakevenApplied => "BREAKEVEN_APPLIED",
            ProtectionState::TrailingActive => "TRAILING_ACTIVE",
            ProtectionState::Closed => "CLOSED",
        };
        f.write_str(label)
    }
}

/// Contract specification for a tradable instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentSpec {
    pub symbol: String,
    pub tick_size: f64,
    pub tick_value: f64, // account currency per tick per 1.0 volume
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
}

impl InstrumentSpec {
    /// Account-currency value of a 1.0 price move for 1.0 volume
    pub fn pip_value(&self) -> f64 {
        if self.tick_size > 0.0 {
            self.tick_value / self.tick_size
        } else {
            0.0
        }
    }

    /// Whole volume steps that fit in `volume`
    pub fn volume_steps(&self, volume: f64) -> u64 {
        if self.volume_step <= 0.0 || !volume.is_finite() || volume <= 0.0 {
            return 0;
        }
        // Start from the nearest count so 0.3 / 0.1 isn't floored to 2
        let mut steps = (volume / self.volume_step).round() as u64;
        while steps > 0 && self.steps_volume(steps) > volume {
            steps -= 1;
        }
        steps
    }

    /// Volume of `steps` whole steps, free of representation noise
    pub fn steps_volume(&self, steps: u64) -> f64 {
        const SCALE: f64 = 1e8;
        (steps as f64 * self.volume_step * SCALE).round() / SCALE
    }

    /// Round a volume down to the nearest allowed step, never above `volume`
    pub fn floor_volume(&self, volume: f64) -> f64 {
        self.steps_volume(self.volume_steps(volume))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub currency: String,
}

/// Market order with attached protection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub client_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReceipt {
    pub ticket: u64,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position() -> Position {
        Position {
            ticket: 1,
            symbol: "EUR/USD".to_string(),
            side: Side::Buy,
            volume: 0.1,
            entry_price: 1.1000,
            stop_loss: 0.0,
            take_profit: 0.0,
            current_price: 1.1050,
            profit: 50.0,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_profit_distance_respects_side() {
        let mut position = long_position();
        assert!((position.profit_distance() - 0.005).abs() < 1e-12);

        position.side = Side::Sell;
        assert!((position.profit_distance() + 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_missing_levels() {
        let mut position = long_position();
        assert!(!position.has_stop_loss());
        assert!(!position.has_take_profit());

        position.stop_loss = 1.09;
        assert!(position.has_stop_loss());
    }

    #[test]
    fn test_floor_volume_rounds_down_to_step() {
        let spec = InstrumentSpec {
            symbol: "EUR/USD".to_string(),
            tick_size: 0.00001,
            tick_value: 1.0,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
        };

        assert!((spec.floor_volume(0.129) - 0.12).abs() < 1e-9);
        assert!((spec.floor_volume(0.3) - 0.3).abs() < 1e-9);
        assert_eq!(spec.floor_volume(-1.0), 0.0);
        assert!((spec.pip_value() - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_floor_volume_never_exceeds_input() {
        for step in [0.01, 0.1, 1.0] {
            let spec = InstrumentSpec {
                symbol: "XAU/USD".to_string(),
                tick_size: 0.01,
                tick_value: 1.0,
                volume_min: step,
                volume_max: 1000.0,
                volume_step: step,
            };
            for i in 1..5000 {
                let volume = i as f64 * 0.001 + 0.0003;
                let floored = spec.floor_volume(volume);
                assert!(floored <= volume, "{} floored up to {} (step {})", volume, floored, step);
                assert!(volume - floored < step + 1e-9);
            }
        }
    }

    #[test]
    fn test_protection_transitions() {
        use ProtectionState::*;

        assert!(Unprotected.can_transition_to(Protected));
        assert!(Protected.can_transition_to(BreakevenApplied));
        assert!(BreakevenApplied.can_transition_to(TrailingActive));
        assert!(TrailingActive.can_transition_to(TrailingActive));
        assert!(TrailingActive.can_transition_to(Closed));

        // No skipping breakeven, no going backwards
        assert!(!Protected.can_transition_to(TrailingActive));
        assert!(!TrailingActive.can_transition_to(Protected));
        assert!(!Closed.can_transition_to(Protected));
    }

    #[test]
    fn test_timeframe_wire_format() {
        assert_eq!(Timeframe::M15.as_interval(), "15min");
        let parsed: Timeframe = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(parsed, Timeframe::H4);
        assert_eq!(Timeframe::H4.minutes(), 240);
    }
}
