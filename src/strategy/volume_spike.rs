use super::{unit, StrategyParams};
use crate::indicators::IndicatorSet;
use crate::models::Direction;

/// Unusual volume in the direction of the bar's body
///
/// Abstains outright on instruments whose feed carries no genuine traded
/// volume (zero, missing or constant), instead of voting on noise.
pub fn evaluate(ind: &IndicatorSet, params: &StrategyParams) -> Option<(Direction, f64)> {
    if !ind.genuine_volume {
        return None;
    }
    let rvol = ind.relative_volume?;
    let open = ind.open?;
    let close = ind.close?;

    let ratio = params.volume_spike_ratio.max(1.0);
    if rvol < ratio || close == open {
        return Some((Direction::Neutral, 0.0));
    }

    let direction = if close > open { Direction::Buy } else { Direction::Sell };
    Some((direction, unit(0.5 + (rvol - ratio) / (2.0 * ratio))))
}
