use super::moving_average::ema_series;

/// One MACD reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(fast, slow, signal)
///
/// The MACD line is EMA(fast) - EMA(slow); the signal line is an EMA of
/// the MACD line. Needs `slow + signal - 1` prices for the first value.
pub fn macd_series(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MacdValue> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return Vec::new();
    }

    let fast_ema = ema_series(prices, fast);
    let slow_ema = ema_series(prices, slow);
    if slow_ema.is_empty() {
        return Vec::new();
    }

    // Both series end on the last price; align the fast one to the slow one
    let offset = fast_ema.len() - slow_ema.len();
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, slow)| fast_ema[i + offset] - slow)
        .collect();

    let signal_line = ema_series(&macd_line, signal);
    let offset = macd_line.len().saturating_sub(signal_line.len());

    signal_line
        .iter()
        .enumerate()
        .map(|(i, &sig)| {
            let macd = macd_line[i + offset];
            MacdValue {
                macd,
                signal: sig,
                histogram: macd - sig,
            }
        })
        .collect()
}

pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    macd_series(prices, fast, slow, signal).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_positive_in_uptrend() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let value = calculate_macd(&prices, 12, 26, 9).unwrap();

        assert!(value.macd > 0.0);
        assert!((value.histogram - (value.macd - value.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_macd_negative_in_downtrend() {
        let prices: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let value = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert!(value.macd < 0.0);
    }

    #[test]
    fn test_macd_length_and_insufficient_data() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + (i % 5) as f64).collect();
        assert_eq!(macd_series(&prices, 12, 26, 9).len(), 40 - 26 - 9 + 2);

        assert!(calculate_macd(&prices[..30], 12, 26, 9).is_none());
        assert!(macd_series(&prices, 26, 12, 9).is_empty());
    }
}
