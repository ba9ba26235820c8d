// Technical indicators module
//
// Pure functions over one OHLCV window. Everything the strategies, the
// risk sizer and the guardian need is derived here from a single fetched
// window instead of one provider call per indicator.

pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod market_analysis;
pub mod moving_average;
pub mod rsi;

pub use atr::{calculate_atr, calculate_atr_series};
pub use bollinger::{bollinger_series, calculate_bollinger, Bands};
pub use macd::{calculate_macd, macd_series, MacdValue};
pub use market_analysis::{
    calculate_average_volume, has_genuine_volume, highest_high, is_volume_spike, lowest_low,
    relative_volume, volatility_unit,
};
pub use moving_average::{calculate_ema, calculate_sma, ema_series, sma_series};
pub use rsi::{calculate_rsi, rsi_series};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Candle;

/// Periods used when building an `IndicatorSet`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std_devs: f64,
    pub atr_period: usize,
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub volume_lookback: usize,
    pub breakout_lookback: usize,
    pub volatility_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std_devs: 2.0,
            atr_period: 14,
            sma_fast: 20,
            sma_slow: 50,
            ema_fast: 12,
            ema_slow: 26,
            volume_lookback: 20,
            breakout_lookback: 20,
            volatility_period: 20,
        }
    }
}

impl IndicatorParams {
    /// Bars needed before every indicator in the set is defined
    pub fn warmup_bars(&self) -> usize {
        [
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal,
            self.bollinger_period,
            self.atr_period + 1,
            self.sma_slow,
            self.ema_slow,
            self.volume_lookback + 1,
            self.breakout_lookback + 1,
            self.volatility_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Latest indicator readings for one snapshot
///
/// Any value can be missing when the window is too short for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSet {
    pub close: Option<f64>,
    pub open: Option<f64>,
    pub prev_close: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub prev_macd_histogram: Option<f64>,
    pub bollinger: Option<Bands>,
    pub atr: Option<f64>,
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub relative_volume: Option<f64>,
    pub genuine_volume: bool,
    pub highest_high: Option<f64>,
    pub lowest_low: Option<f64>,
    pub volatility: Option<f64>,
}

impl IndicatorSet {
    /// Compute every indicator from one OHLCV window
    pub fn compute(candles: &[Candle], params: &IndicatorParams) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let macd = macd_series(&closes, params.macd_fast, params.macd_slow, params.macd_signal);
        let prev_macd_histogram = if macd.len() >= 2 {
            Some(macd[macd.len() - 2].histogram)
        } else {
            None
        };

        Self {
            close: closes.last().copied(),
            open: candles.last().map(|c| c.open),
            prev_close: closes.len().checked_sub(2).map(|i| closes[i]),
            rsi: calculate_rsi(&closes, params.rsi_period),
            macd: macd.last().copied(),
            prev_macd_histogram,
            bollinger: calculate_bollinger(&closes, params.bollinger_period, params.bollinger_std_devs),
            atr: calculate_atr(candles, params.atr_period),
            sma_fast: calculate_sma(&closes, params.sma_fast),
            sma_slow: calculate_sma(&closes, params.sma_slow),
            ema_fast: calculate_ema(&closes, params.ema_fast),
            ema_slow: calculate_ema(&closes, params.ema_slow),
            relative_volume: relative_volume(candles, params.volume_lookback),
            genuine_volume: has_genuine_volume(candles),
            highest_high: highest_high(candles, params.breakout_lookback),
            lowest_low: lowest_low(candles, params.breakout_lookback),
            volatility: volatility_unit(candles, params.volatility_period),
        }
    }
}

/// An indicator request as addressed through the data gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi { period: usize },
    Sma { period: usize },
    Ema { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Bollinger { period: usize, std_devs: f64 },
    Atr { period: usize },
    RelativeVolume { lookback: usize },
}

impl IndicatorKind {
    /// Endpoint name on the provider side
    pub fn endpoint(&self) -> &'static str {
        match self {
            IndicatorKind::Rsi { .. } => "rsi",
            IndicatorKind::Sma { .. } => "sma",
            IndicatorKind::Ema { .. } => "ema",
            IndicatorKind::Macd { .. } => "macd",
            IndicatorKind::Bollinger { .. } => "bbands",
            IndicatorKind::Atr { .. } => "atr",
            IndicatorKind::RelativeVolume { .. } => "rvol",
        }
    }

    /// Names of the values carried by each point, in order
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            IndicatorKind::Rsi { .. } => &["rsi"],
            IndicatorKind::Sma { .. } => &["sma"],
            IndicatorKind::Ema { .. } => &["ema"],
            IndicatorKind::Macd { .. } => &["macd", "macd_signal", "macd_hist"],
            IndicatorKind::Bollinger { .. } => &["upper_band", "middle_band", "lower_band"],
            IndicatorKind::Atr { .. } => &["atr"],
            IndicatorKind::RelativeVolume { .. } => &["rvol"],
        }
    }

    /// Query parameters for the provider's indicator endpoint
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        match *self {
            IndicatorKind::Rsi { period }
            | IndicatorKind::Sma { period }
            | IndicatorKind::Ema { period }
            | IndicatorKind::Atr { period } => vec![("time_period", period.to_string())],
            IndicatorKind::Macd { fast, slow, signal } => vec![
                ("fast_period", fast.to_string()),
                ("slow_period", slow.to_string()),
                ("signal_period", signal.to_string()),
            ],
            IndicatorKind::Bollinger { period, std_devs } => vec![
                ("time_period", period.to_string()),
                ("sd", std_devs.to_string()),
            ],
            IndicatorKind::RelativeVolume { lookback } => {
                vec![("time_period", lookback.to_string())]
            }
        }
    }

    /// Stable key for caching
    pub fn cache_key(&self) -> String {
        let params: Vec<String> = self
            .query_params()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}({})", self.endpoint(), params.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>, // ordered as IndicatorKind::outputs()
}

/// Indicator values ordered oldest -> newest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub kind: IndicatorKind,
    pub points: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn latest(&self) -> Option<&IndicatorPoint> {
        self.points.last()
    }
}

/// Compute an indicator series locally from a candle window
pub fn compute_series(kind: IndicatorKind, candles: &[Candle]) -> IndicatorSeries {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let values: Vec<Vec<f64>> = match kind {
        IndicatorKind::Rsi { period } => rsi_series(&closes, period).into_iter().map(|v| vec![v]).collect(),
        IndicatorKind::Sma { period } => sma_series(&closes, period).into_iter().map(|v| vec![v]).collect(),
        IndicatorKind::Ema { period } => ema_series(&closes, period).into_iter().map(|v| vec![v]).collect(),
        IndicatorKind::Macd { fast, slow, signal } => macd_series(&closes, fast, slow, signal)
            .into_iter()
            .map(|m| vec![m.macd, m.signal, m.histogram])
            .collect(),
        IndicatorKind::Bollinger { period, std_devs } => bollinger_series(&closes, period, std_devs)
            .into_iter()
            .map(|b| vec![b.upper, b.middle, b.lower])
            .collect(),
        IndicatorKind::Atr { period } => calculate_atr_series(candles, period)
            .into_iter()
            .map(|v| vec![v])
            .collect(),
        IndicatorKind::RelativeVolume { lookback } => {
            if !has_genuine_volume(candles) || candles.len() < lookback + 1 {
                Vec::new()
            } else {
                (lookback..candles.len())
                    .filter_map(|end| relative_volume(&candles[..=end], lookback))
                    .map(|v| vec![v])
                    .collect()
            }
        }
    };

    // Every series ends on the last candle
    let offset = candles.len().saturating_sub(values.len());
    let points = values
        .into_iter()
        .enumerate()
        .map(|(i, values)| IndicatorPoint {
            timestamp: candles[offset + i].timestamp,
            values,
        })
        .collect();

    IndicatorSeries { kind, points }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn trending_candles(n: usize) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(n as i64);
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 0.3 } else { -0.3 };
                Candle {
                    symbol: "TEST".to_string(),
                    timestamp: start + Duration::hours(i as i64),
                    open: close - 0.2,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1000.0 + (i % 7) as f64 * 50.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_indicator_set_from_single_window() {
        let params = IndicatorParams::default();
        let candles = trending_candles(params.warmup_bars() + 5);

        let set = IndicatorSet::compute(&candles, &params);

        assert_eq!(set.close, candles.last().map(|c| c.close));
        assert!(set.rsi.unwrap() > 50.0);
        assert!(set.macd.unwrap().macd > 0.0);
        assert!(set.prev_macd_histogram.is_some());
        assert!(set.atr.unwrap() > 0.0);
        assert!(set.ema_fast.unwrap() > set.ema_slow.unwrap());
        assert!(set.sma_fast.unwrap() > set.sma_slow.unwrap());
        assert!(set.genuine_volume);
        assert!(set.relative_volume.is_some());
        assert!(set.bollinger.is_some());
        assert!(set.volatility.is_some());
    }

    #[test]
    fn test_short_window_leaves_gaps() {
        let params = IndicatorParams::default();
        let set = IndicatorSet::compute(&trending_candles(10), &params);

        assert!(set.close.is_some());
        assert!(set.rsi.is_none());
        assert!(set.macd.is_none());
        assert!(set.sma_slow.is_none());
    }

    #[test]
    fn test_compute_series_aligns_with_last_candle() {
        let candles = trending_candles(60);
        let series = compute_series(IndicatorKind::Rsi { period: 14 }, &candles);

        assert_eq!(series.points.len(), 46);
        assert_eq!(
            series.latest().map(|p| p.timestamp),
            candles.last().map(|c| c.timestamp)
        );

        let macd = compute_series(
            IndicatorKind::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
            &candles,
        );
        assert_eq!(macd.latest().unwrap().values.len(), 3);
    }

    #[test]
    fn test_cache_key_includes_params() {
        let a = IndicatorKind::Bollinger {
            period: 20,
            std_devs: 2.0,
        };
        let b = IndicatorKind::Bollinger {
            period: 20,
            std_devs: 2.5,
        };
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(IndicatorKind::Rsi { period: 14 }.cache_key(), "rsi(time_period=14)");
    }
}
