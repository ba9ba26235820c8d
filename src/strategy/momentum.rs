use super::unit;
use crate::indicators::IndicatorSet;
use crate::models::Direction;

/// MACD histogram direction, scored by RSI distance from 50
///
/// A histogram that is shrinking toward zero only counts half.
pub fn evaluate(ind: &IndicatorSet) -> Option<(Direction, f64)> {
    let macd = ind.macd?;
    let rsi = ind.rsi?;

    let hist = macd.histogram;
    if hist == 0.0 {
        return Some((Direction::Neutral, 0.0));
    }
    let direction = if hist > 0.0 { Direction::Buy } else { Direction::Sell };

    let rsi_score = unit((rsi - 50.0) * direction.sign() / 20.0);
    let accelerating = match ind.prev_macd_histogram {
        Some(prev) => hist.abs() > prev.abs() && prev * hist >= 0.0,
        None => false,
    };
    let factor = if accelerating { 1.0 } else { 0.5 };

    tracing::trace!(hist, rsi, accelerating, "momentum check");
    Some((direction, rsi_score * factor))
}
