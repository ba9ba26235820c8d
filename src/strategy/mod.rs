// Signal scoring
//
// Six independent voters read one `IndicatorSet` and either vote or
// abstain. `SignalEngine` aggregates the votes into one signal.

pub mod breakout;
pub mod mean_reversion;
pub mod momentum;
pub mod multi_indicator;
pub mod scoring;
pub mod trend;
pub mod validation;
pub mod volume_spike;

pub use scoring::{Aggregate, SignalEngine};
pub use validation::{apply_validation, ValidationPolicy};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::IndicatorSet;
use crate::models::{Direction, Vote};

/// The closed set of strategy voters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Trend,
    Momentum,
    MeanReversion,
    Breakout,
    VolumeSpike,
    MultiIndicator,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::Trend,
        Strategy::Momentum,
        Strategy::MeanReversion,
        Strategy::Breakout,
        Strategy::VolumeSpike,
        Strategy::MultiIndicator,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Trend => "trend",
            Strategy::Momentum => "momentum",
            Strategy::MeanReversion => "mean_reversion",
            Strategy::Breakout => "breakout",
            Strategy::VolumeSpike => "volume_spike",
            Strategy::MultiIndicator => "multi_indicator",
        }
    }

    /// `None` means the strategy abstains
    pub fn evaluate(&self, indicators: &IndicatorSet, params: &StrategyParams) -> Option<Vote> {
        let (direction, strength) = match self {
            Strategy::Trend => trend::evaluate(indicators),
            Strategy::Momentum => momentum::evaluate(indicators),
            Strategy::MeanReversion => mean_reversion::evaluate(indicators, params),
            Strategy::Breakout => breakout::evaluate(indicators),
            Strategy::VolumeSpike => volume_spike::evaluate(indicators, params),
            Strategy::MultiIndicator => multi_indicator::evaluate(indicators, params),
        }?;

        // A zero-strength opinion is no opinion
        let direction = if strength > 0.0 { direction } else { Direction::Neutral };
        Some(Vote {
            strategy: self.name().to_string(),
            direction,
            strength: if direction == Direction::Neutral {
                0.0
            } else {
                strength.clamp(0.0, 1.0)
            },
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-strategy aggregation weights; `0.0` disables a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyWeights {
    pub trend: f64,
    pub momentum: f64,
    pub mean_reversion: f64,
    pub breakout: f64,
    pub volume_spike: f64,
    pub multi_indicator: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            trend: 1.0,
            momentum: 1.0,
            mean_reversion: 1.0,
            breakout: 1.0,
            volume_spike: 1.0,
            multi_indicator: 1.0,
        }
    }
}

impl StrategyWeights {
    pub fn weight(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Trend => self.trend,
            Strategy::Momentum => self.momentum,
            Strategy::MeanReversion => self.mean_reversion,
            Strategy::Breakout => self.breakout,
            Strategy::VolumeSpike => self.volume_spike,
            Strategy::MultiIndicator => self.multi_indicator,
        }
    }

    fn weight_by_name(&self, name: &str) -> f64 {
        Strategy::ALL
            .iter()
            .find(|s| s.name() == name)
            .map(|s| self.weight(*s))
            .unwrap_or(0.0)
    }
}

/// Thresholds shared by the voters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Relative volume that counts as a spike (2.0 = twice the average)
    pub volume_spike_ratio: f64,
    /// Minimum number of indicator checks the multi-indicator vote needs
    pub multi_min_checks: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_spike_ratio: 2.0,
            multi_min_checks: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Minimum aggregated strength (0-100) for a non-neutral signal
    pub threshold: f64,
    /// Minimum confidence (0-100) before an order is considered
    pub min_confidence: f64,
    pub stop_atr: f64,
    pub target_atr: f64,
    pub weights: StrategyWeights,
    pub params: StrategyParams,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            threshold: 70.0,
            min_confidence: 50.0,
            stop_atr: 1.5,   // proposed stop = price -/+ 1.5 ATR
            target_atr: 2.5, // proposed target = price +/- 2.5 ATR
            weights: StrategyWeights::default(),
            params: StrategyParams::default(),
        }
    }
}

/// Clamp a ratio into a vote strength
pub(crate) fn unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
