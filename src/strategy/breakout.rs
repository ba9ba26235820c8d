use super::unit;
use crate::indicators::IndicatorSet;
use crate::models::Direction;

/// Close beyond the prior range's high/low
pub fn evaluate(ind: &IndicatorSet) -> Option<(Direction, f64)> {
    let close = ind.close?;
    let high = ind.highest_high?;
    let low = ind.lowest_low?;
    let atr = ind.atr.filter(|a| *a > 0.0)?;

    if close > high {
        Some((Direction::Buy, unit(0.5 + 0.5 * (close - high) / atr)))
    } else if close < low {
        Some((Direction::Sell, unit(0.5 + 0.5 * (low - close) / atr)))
    } else {
        Some((Direction::Neutral, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(close: f64) -> IndicatorSet {
        IndicatorSet {
            close: Some(close),
            highest_high: Some(105.0),
            lowest_low: Some(95.0),
            atr: Some(2.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_breakout_up_and_down() {
        let (dir, strength) = evaluate(&set(106.0)).unwrap();
        assert_eq!(dir, Direction::Buy);
        assert!((strength - 0.75).abs() < 1e-9);

        let (dir, strength) = evaluate(&set(90.0)).unwrap();
        assert_eq!(dir, Direction::Sell);
        assert_eq!(strength, 1.0);
    }

    #[test]
    fn test_inside_range_is_neutral_zero() {
        assert_eq!(evaluate(&set(100.0)), Some((Direction::Neutral, 0.0)));
    }
}
