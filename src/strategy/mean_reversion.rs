use super::{unit, StrategyParams};
use crate::indicators::IndicatorSet;
use crate::models::Direction;

/// Fade band extremes
///
/// Buys a close at or below the lower Bollinger band with RSI oversold,
/// sells the mirror case. Strength starts at 0.5 and grows with how deep
/// price is beyond the band or RSI beyond its threshold.
pub fn evaluate(ind: &IndicatorSet, params: &StrategyParams) -> Option<(Direction, f64)> {
    let bands = ind.bollinger?;
    let rsi = ind.rsi?;
    let close = ind.close?;

    let half_width = (bands.width() / 2.0).max(f64::EPSILON);

    if close <= bands.lower && rsi < params.rsi_oversold {
        let band_depth = unit((bands.lower - close) / half_width);
        let rsi_depth = unit((params.rsi_oversold - rsi) / params.rsi_oversold.max(1.0));
        return Some((Direction::Buy, unit(0.5 + 0.5 * band_depth.max(rsi_depth))));
    }

    if close >= bands.upper && rsi > params.rsi_overbought {
        let band_depth = unit((close - bands.upper) / half_width);
        let room = (100.0 - params.rsi_overbought).max(1.0);
        let rsi_depth = unit((rsi - params.rsi_overbought) / room);
        return Some((Direction::Sell, unit(0.5 + 0.5 * band_depth.max(rsi_depth))));
    }

    Some((Direction::Neutral, 0.0))
}
