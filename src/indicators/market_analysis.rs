/// Volume and price-range analysis
///
/// Relative volume, genuine-volume detection, breakout ranges and the
/// volatility unit used by trailing stops.
use super::bollinger::std_dev;
use crate::models::Candle;

/// Calculate average volume over the `period` candles before the current one
pub fn calculate_average_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let end = candles.len() - 1;
    let lookback = &candles[end - period..end];
    Some(lookback.iter().map(|c| c.volume).sum::<f64>() / period as f64)
}

/// Whether the window carries real traded volume
///
/// Instruments quoted without exchange volume (spot FX, CFDs, backfilled
/// series) come back with zeros or a constant placeholder. Any zero bar or
/// a perfectly flat volume column means the data can't support volume
/// analysis.
pub fn has_genuine_volume(candles: &[Candle]) -> bool {
    if candles.len() < 2 {
        return false;
    }

    if candles.iter().any(|c| c.volume <= 0.0 || !c.volume.is_finite()) {
        return false;
    }

    let first = candles[0].volume;
    candles.iter().any(|c| (c.volume - first).abs() > f64::EPSILON)
}

/// Current bar volume relative to the average of the previous `lookback` bars
///
/// None when volume isn't genuine, so volume-driven logic can abstain
/// instead of reading noise.
pub fn relative_volume(candles: &[Candle], lookback: usize) -> Option<f64> {
    if !has_genuine_volume(candles) {
        return None;
    }

    let avg = calculate_average_volume(candles, lookback)?;
    if avg <= 0.0 {
        return None;
    }

    candles.last().map(|c| c.volume / avg)
}

/// Check if volume has spiked above threshold
///
/// Returns true if current volume > threshold * recent average volume
pub fn is_volume_spike(candles: &[Candle], lookback: usize, threshold: f64) -> bool {
    relative_volume(candles, lookback)
        .map(|ratio| ratio > threshold)
        .unwrap_or(false)
}

/// Highest high over the `lookback` bars before the current one
pub fn highest_high(candles: &[Candle], lookback: usize) -> Option<f64> {
    prior_window(candles, lookback).map(|w| w.iter().map(|c| c.high).fold(f64::MIN, f64::max))
}

/// Lowest low over the `lookback` bars before the current one
pub fn lowest_low(candles: &[Candle], lookback: usize) -> Option<f64> {
    prior_window(candles, lookback).map(|w| w.iter().map(|c| c.low).fold(f64::MAX, f64::min))
}

/// Standard deviation of close-to-close changes over `period` bars
///
/// This is the "volatility unit" used by the volatility trailing model.
pub fn volatility_unit(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let start = candles.len() - period - 1;
    let changes: Vec<f64> = candles[start..]
        .windows(2)
        .map(|w| w[1].close - w[0].close)
        .collect();
    let mean = changes.iter().sum::<f64>() / changes.len() as f64;
    Some(std_dev(&changes, mean))
}

fn prior_window(candles: &[Candle], lookback: usize) -> Option<&[Candle]> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }
    let end = candles.len() - 1;
    Some(&candles[end - lookback..end])
}
