// Position protection module
//
// Every open broker position is tracked through the `ProtectionState`
// lifecycle: missing levels are repaired, then the stop is ratcheted to
// breakeven and trailed as profit grows.
pub mod monitor;
pub mod trailing;

pub use monitor::{GuardianAction, GuardianReport, PositionGuardian, TrackedPosition};
pub use trailing::TrailingModel;

use serde::{Deserialize, Serialize};

use crate::indicators::{IndicatorParams, IndicatorSet};
pub use crate::models::ProtectionState;

/// Guardian thresholds; distances are in ATRs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub stop_atr: f64,
    pub target_atr: f64,
    pub breakeven_trigger_atr: f64,
    /// Stop placed this far past entry to cover spread and commission
    pub breakeven_offset_atr: f64,
    pub trailing_activation_atr: f64,
    pub trailing: TrailingModel,
    /// Smallest stop improvement worth a broker call
    pub min_step_atr: f64,
    /// Consecutive failed repairs before the operator is alerted
    pub alert_after_failures: u32,
    /// Successful connectivity probes required before a pass
    pub connectivity_checks: u32,
    /// ATR stand-in (share of entry price) when no snapshot is available
    pub fallback_atr_pct: f64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            stop_atr: 2.0,                // entry -/+ 2 ATR
            target_atr: 3.0,              // entry +/- 3 ATR
            breakeven_trigger_atr: 1.0,   // 1 ATR in profit
            breakeven_offset_atr: 0.1,
            trailing_activation_atr: 1.5, // 1.5 ATR in profit
            trailing: TrailingModel::default(),
            min_step_atr: 0.1,
            alert_after_failures: 3,
            connectivity_checks: 3,
            fallback_atr_pct: 0.005, // 0.5% of entry
        }
    }
}

/// Per-symbol market data the guardian works from this cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketContext {
    pub price: Option<f64>,
    pub atr: Option<f64>,
    pub volatility: Option<f64>,
    pub band_middle: Option<f64>,
    /// One standard deviation of the Bollinger window
    pub band_sigma: Option<f64>,
}

impl MarketContext {
    pub fn from_indicators(set: &IndicatorSet, params: &IndicatorParams) -> Self {
        let (band_middle, band_sigma) = match set.bollinger {
            Some(bands) if params.bollinger_std_devs > 0.0 => (
                Some(bands.middle),
                Some((bands.upper - bands.middle) / params.bollinger_std_devs),
            ),
            _ => (None, None),
        };

        Self {
            price: set.close,
            atr: set.atr,
            volatility: set.volatility,
            band_middle,
            band_sigma,
        }
    }
}
