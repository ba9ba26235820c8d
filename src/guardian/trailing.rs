use serde::{Deserialize, Serialize};

use super::MarketContext;
use crate::models::Side;

/// How far behind price a trailing stop sits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum TrailingModel {
    /// Fixed multiple of the current ATR
    AtrMultiple { multiplier: f64 },
    /// Multiple of the close-to-close standard deviation
    VolatilityUnits { units: f64 },
    /// Bollinger band on the far side of price
    Band { std_devs: f64 },
    /// ATR distance that tightens as profit grows, never below `floor`
    LevelAdaptive {
        start: f64,
        floor: f64,
        tighten_per_atr: f64,
    },
}

impl Default for TrailingModel {
    fn default() -> Self {
        TrailingModel::AtrMultiple { multiplier: 1.5 }
    }
}

impl TrailingModel {
    /// Candidate stop for a position at `price` with `profit` (price
    /// distance) in its favour. `atr` is already resolved, so it is always
    /// positive. Returns `None` when the model lacks the data it needs.
    pub fn stop_level(&self, side: Side, price: f64, profit: f64, atr: f64, ctx: &MarketContext) -> Option<f64> {
        let sign = side.sign();

        let level = match *self {
            TrailingModel::AtrMultiple { multiplier } => price - sign * multiplier * atr,
            TrailingModel::VolatilityUnits { units } => {
                let unit = ctx.volatility.filter(|v| *v > 0.0).unwrap_or(atr);
                price - sign * units * unit
            }
            TrailingModel::Band { std_devs } => {
                let middle = ctx.band_middle?;
                let sigma = ctx.band_sigma.filter(|s| *s > 0.0)?;
                middle - sign * std_devs * sigma
            }
            TrailingModel::LevelAdaptive {
                start,
                floor,
                tighten_per_atr,
            } => {
                let profit_atr = (profit / atr).max(0.0);
                let distance = (start - tighten_per_atr * profit_atr).max(floor);
                price - sign * distance * atr
            }
        };

        level.is_finite().then_some(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MarketContext {
        MarketContext {
            price: Some(110.0),
            atr: Some(2.0),
            volatility: Some(1.2),
            band_middle: Some(107.0),
            band_sigma: Some(1.5),
        }
    }

    #[test]
    fn test_atr_multiple_follows_price() {
        let model = TrailingModel::AtrMultiple { multiplier: 1.5 };
        assert_eq!(model.stop_level(Side::Buy, 110.0, 10.0, 2.0, &ctx()), Some(107.0));
        assert_eq!(model.stop_level(Side::Sell, 90.0, 10.0, 2.0, &ctx()), Some(93.0));
    }

    #[test]
    fn test_volatility_units_fall_back_to_atr() {
        let model = TrailingModel::VolatilityUnits { units: 3.0 };
        let level = model.stop_level(Side::Buy, 110.0, 10.0, 2.0, &ctx()).unwrap();
        assert!((level - 106.4).abs() < 1e-9);

        let mut no_vol = ctx();
        no_vol.volatility = None;
        assert_eq!(model.stop_level(Side::Buy, 110.0, 10.0, 2.0, &no_vol), Some(104.0));
    }

    #[test]
    fn test_band_needs_band_data() {
        let model = TrailingModel::Band { std_devs: 2.0 };
        assert_eq!(model.stop_level(Side::Buy, 110.0, 10.0, 2.0, &ctx()), Some(104.0));
        assert_eq!(model.stop_level(Side::Sell, 100.0, 10.0, 2.0, &ctx()), Some(110.0));

        let mut empty = ctx();
        empty.band_middle = None;
        assert_eq!(model.stop_level(Side::Buy, 110.0, 10.0, 2.0, &empty), None);
    }

    #[test]
    fn test_level_adaptive_tightens_to_floor() {
        let model = TrailingModel::LevelAdaptive {
            start: 3.0,
            floor: 1.0,
            tighten_per_atr: 0.5,
        };
        // 1 ATR of profit: 2.5 ATR distance
        assert_eq!(model.stop_level(Side::Buy, 102.0, 2.0, 2.0, &ctx()), Some(97.0));
        // 10 ATR of profit: clamped to the 1 ATR floor
        assert_eq!(model.stop_level(Side::Buy, 120.0, 20.0, 2.0, &ctx()), Some(118.0));
    }

    #[test]
    fn test_deserialize_tagged() {
        let model: TrailingModel = serde_json::from_str(r#"{"model":"band","std_devs":2.0}"#).unwrap();
        assert_eq!(model, TrailingModel::Band { std_devs: 2.0 });
    }
}
