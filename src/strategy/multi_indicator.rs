use super::StrategyParams;
use crate::indicators::IndicatorSet;
use crate::models::Direction;

/// Majority vote over simple indicator checks
///
/// Each available check casts +1 (bullish) or -1 (bearish); RSI only
/// votes at the extremes. The net share of the checks is the strength.
pub fn evaluate(ind: &IndicatorSet, params: &StrategyParams) -> Option<(Direction, f64)> {
    let close = ind.close?;
    let mut checks: Vec<f64> = Vec::with_capacity(5);

    if let Some(rsi) = ind.rsi {
        if rsi < params.rsi_oversold {
            checks.push(1.0);
        } else if rsi > params.rsi_overbought {
            checks.push(-1.0);
        }
    }
    if let Some(macd) = ind.macd {
        checks.push(if macd.macd > macd.signal { 1.0 } else { -1.0 });
    }
    if let Some(sma) = ind.sma_fast {
        checks.push(if close > sma { 1.0 } else { -1.0 });
    }
    if let (Some(fast), Some(slow)) = (ind.ema_fast, ind.ema_slow) {
        checks.push(if fast > slow { 1.0 } else { -1.0 });
    }
    if let Some(bands) = ind.bollinger {
        checks.push(if close > bands.middle { 1.0 } else { -1.0 });
    }

    if checks.len() < params.multi_min_checks.max(1) {
        return None;
    }

    let net = checks.iter().sum::<f64>() / checks.len() as f64;
    let direction = if net > 0.0 {
        Direction::Buy
    } else if net < 0.0 {
        Direction::Sell
    } else {
        Direction::Neutral
    };

    Some((direction, net.abs()))
}
