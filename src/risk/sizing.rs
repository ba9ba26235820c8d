use serde::{Deserialize, Serialize};
use std::fmt;

use super::TradeStats;
use crate::models::{InstrumentSpec, Position, Side, Signal};

/// Hard cap on the share of full Kelly ever used
const MAX_KELLY_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Share of equity risked per trade
    pub risk_fraction: f64,
    /// Stop distance in ATRs
    pub stop_multiplier: f64,
    /// Target distance in ATRs
    pub target_multiplier: f64,
    pub use_kelly: bool,
    /// Share of full Kelly to use, capped at 0.25
    pub kelly_fraction: f64,
    pub kelly_lookback: usize,
    pub kelly_min_trades: usize,
    pub allow_pyramiding: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: 0.01,    // 1% of equity
            stop_multiplier: 1.5,   // 1.5 ATR stop
            target_multiplier: 2.5, // 2.5 ATR target
            use_kelly: true,
            kelly_fraction: 0.25,
            kelly_lookback: 50,
            kelly_min_trades: 20,
            allow_pyramiding: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rejection {
    NeutralSignal,
    PositionAlreadyOpen,
    InvalidStopDistance,
    NoEdge,
    BelowMinimumVolume,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::NeutralSignal => "signal is neutral",
            Rejection::PositionAlreadyOpen => "position already open on symbol",
            Rejection::InvalidStopDistance => "stop distance is zero or undefined",
            Rejection::NoEdge => "trade history shows no edge (kelly <= 0)",
            Rejection::BelowMinimumVolume => "size below instrument minimum volume",
        };
        f.write_str(reason)
    }
}

/// Sized order proposal for one signal; lives for one cycle only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskDecision {
    pub symbol: String,
    pub side: Option<Side>,
    pub volume: f64,
    pub stop_distance: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Account-currency loss if the stop is hit at the allowed size
    pub max_risk_amount: f64,
    pub kelly_multiplier: f64,
    pub approved: bool,
    pub rejection: Option<Rejection>,
}

impl RiskDecision {
    fn rejected(symbol: &str, side: Option<Side>, reason: Rejection) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            volume: 0.0,
            stop_distance: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            max_risk_amount: 0.0,
            kelly_multiplier: 0.0,
            approved: false,
            rejection: Some(reason),
        }
    }

    /// Loss in account currency if the stop is hit
    pub fn implied_loss(&self, spec: &InstrumentSpec) -> f64 {
        self.volume * self.stop_distance * spec.pip_value()
    }
}

/// What the sizer needs to know about the book besides the signal
#[derive(Debug, Clone, Copy, Default)]
pub struct SizingContext<'a> {
    pub open_positions: &'a [Position],
    pub stats: Option<TradeStats>,
}

#[derive(Debug, Clone)]
pub struct RiskSizer {
    config: RiskConfig,
}

impl RiskSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Multiplier on `risk_fraction` from capped Kelly; never above 1
    fn kelly_multiplier(&self, stats: Option<TradeStats>) -> Result<f64, Rejection> {
        let stats = match stats {
            Some(stats) if self.config.use_kelly && stats.trades >= self.config.kelly_min_trades => stats,
            _ => return Ok(1.0),
        };

        let kelly = stats.kelly();
        if kelly <= 0.0 {
            return Err(Rejection::NoEdge);
        }

        let fraction = self.config.kelly_fraction.clamp(0.0, MAX_KELLY_FRACTION);
        let kelly_risk = kelly * fraction;
        Ok((kelly_risk / self.config.risk_fraction).min(1.0))
    }

    /// Turn a signal into a bounded order, or say why not
    pub fn size(
        &self,
        signal: &Signal,
        equity: f64,
        spec: &InstrumentSpec,
        ctx: &SizingContext<'_>,
    ) -> RiskDecision {
        let symbol = signal.symbol.as_str();

        let side = match signal.direction.side() {
            Some(side) => side,
            None => return RiskDecision::rejected(symbol, None, Rejection::NeutralSignal),
        };

        if !self.config.allow_pyramiding && ctx.open_positions.iter().any(|p| p.symbol == symbol) {
            return RiskDecision::rejected(symbol, Some(side), Rejection::PositionAlreadyOpen);
        }

        let stop_distance = signal.atr.unwrap_or(0.0) * self.config.stop_multiplier;
        let pip_value = spec.pip_value();
        if !stop_distance.is_finite() || stop_distance <= 0.0 || pip_value <= 0.0 {
            return RiskDecision::rejected(symbol, Some(side), Rejection::InvalidStopDistance);
        }

        let kelly_multiplier = match self.kelly_multiplier(ctx.stats) {
            Ok(m) => m,
            Err(reason) => return RiskDecision::rejected(symbol, Some(side), reason),
        };

        let max_risk_amount = equity.max(0.0) * self.config.risk_fraction * kelly_multiplier;
        let raw = max_risk_amount / (stop_distance * pip_value);

        // Always round down: rounding up would breach the risk ceiling
        let mut steps = spec.volume_steps(raw.min(spec.volume_max));
        while steps > 0 && spec.steps_volume(steps) * stop_distance * pip_value > max_risk_amount {
            steps -= 1;
        }
        let volume = spec.steps_volume(steps);

        if volume <= 0.0 || volume + 1e-12 < spec.volume_min {
            tracing::debug!(
                symbol = %symbol,
                "Raw size {:.4} below minimum {:.4}",
                raw,
                spec.volume_min
            );
            return RiskDecision::rejected(symbol, Some(side), Rejection::BelowMinimumVolume);
        }

        let atr = stop_distance / self.config.stop_multiplier;
        let sign = side.sign();

        RiskDecision {
            symbol: symbol.to_string(),
            side: Some(side),
            volume,
            stop_distance,
            stop_loss: signal.price - sign * stop_distance,
            take_profit: signal.price + sign * atr * self.config.target_multiplier,
            max_risk_amount,
            kelly_multiplier,
            approved: true,
            rejection: None,
        }
    }
}
