use super::unit;
use crate::indicators::IndicatorSet;
use crate::models::Direction;

/// Trend following on the EMA crossover
///
/// Direction comes from the fast EMA against the slow EMA. Strength is the
/// gap between them in ATR units, halved when price sits on the wrong side
/// of the slow SMA.
pub fn evaluate(ind: &IndicatorSet) -> Option<(Direction, f64)> {
    let fast = ind.ema_fast?;
    let slow = ind.ema_slow?;
    let close = ind.close?;

    let gap = fast - slow;
    if gap == 0.0 {
        return Some((Direction::Neutral, 0.0));
    }
    let direction = if gap > 0.0 { Direction::Buy } else { Direction::Sell };

    let scale = match ind.atr {
        Some(atr) if atr > 0.0 => atr,
        _ => close * 0.01,
    };
    let mut strength = unit(gap.abs() / scale);

    if let Some(sma) = ind.sma_slow {
        let confirms = (close - sma) * direction.sign() > 0.0;
        if !confirms {
            strength *= 0.5;
        }
    }

    Some((direction, strength))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(fast: f64, slow: f64, close: f64, sma: f64) -> IndicatorSet {
        IndicatorSet {
            close: Some(close),
            ema_fast: Some(fast),
            ema_slow: Some(slow),
            sma_slow: Some(sma),
            atr: Some(2.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_uptrend_confirmed() {
        let (dir, strength) = evaluate(&set(104.0, 102.0, 105.0, 100.0)).unwrap();
        assert_eq!(dir, Direction::Buy);
        assert!((strength - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_downtrend_against_sma_is_weaker() {
        let (dir, strength) = evaluate(&set(99.0, 100.0, 101.0, 100.0)).unwrap();
        assert_eq!(dir, Direction::Sell);
        assert!((strength - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_abstains_without_emas() {
        assert!(evaluate(&IndicatorSet::default()).is_none());
    }
}
