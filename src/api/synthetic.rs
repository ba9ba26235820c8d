use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;

use super::MarketDataProvider;
use crate::indicators::{compute_series, IndicatorKind, IndicatorSeries};
use crate::models::{Candle, Quote, Timeframe};
use crate::{Error, Result};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketScenario {
    /// Steady drift per bar (fraction of price, e.g. 0.002 = +0.2%) with noise
    Trending { drift: f64 },
    /// Mean-reverting random walk around the base price
    Ranging,
    /// Large swings (±2% per bar)
    Volatile,
}

struct Feed {
    rng: StdRng,
    candles: Vec<Candle>,
}

/// Offline market data feed generating seeded random-walk OHLCV bars
///
/// Every `time_series` call advances the feed by one bar, so consecutive
/// polling cycles see the market move.
pub struct SyntheticProvider {
    seed: u64,
    scenario: MarketScenario,
    base_prices: HashMap<String, f64>,
    base_volume: f64,
    zero_volume: bool,
    start: DateTime<Utc>,
    feeds: Mutex<HashMap<(String, Timeframe), Feed>>,
}

impl SyntheticProvider {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64, scenario: MarketScenario) -> Self {
        Self {
            seed,
            scenario,
            base_prices: HashMap::new(),
            base_volume: 1_000_000.0,
            zero_volume: false,
            start: Utc::now() - Duration::days(30),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_base_price(mut self, symbol: &str, price: f64) -> Self {
        self.base_prices.insert(symbol.to_string(), price);
        self
    }

    /// Emit zero volume, like quotes for instruments without exchange volume
    pub fn without_volume(mut self) -> Self {
        self.zero_volume = true;
        self
    }

    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    fn base_price(&self, symbol: &str) -> f64 {
        self.base_prices.get(symbol).copied().unwrap_or(100.0)
    }

    fn symbol_seed(&self, symbol: &str) -> u64 {
        symbol
            .bytes()
            .fold(self.seed, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
    }

    fn next_candle(&self, rng: &mut StdRng, symbol: &str, prev_close: f64, timestamp: DateTime<Utc>) -> Candle {
        let base = self.base_price(symbol);
        let close = match self.scenario {
            MarketScenario::Trending { drift } => {
                let noise = prev_close * rng.gen_range(-0.001..0.001); // ±0.1% noise
                prev_close * (1.0 + drift) + noise
            }
            MarketScenario::Ranging => {
                // Pull 10% of the way back to the base each bar
                let reversion = (base - prev_close) * 0.1;
                prev_close + reversion + prev_close * rng.gen_range(-0.005..0.005)
            }
            MarketScenario::Volatile => prev_close * (1.0 + rng.gen_range(-0.02..0.02)),
        };
        let close = close.max(base * 0.01);

        let spread = close * rng.gen_range(0.0005..0.003);
        let high = prev_close.max(close) + spread;
        let low = (prev_close.min(close) - spread).max(close * 0.5);
        let volume = if self.zero_volume {
            0.0
        } else {
            self.base_volume * rng.gen_range(0.5..1.5)
        };

        Candle {
            symbol: symbol.to_string(),
            timestamp,
            open: prev_close,
            high,
            low,
            close,
            volume,
        }
    }

    fn advance(&self, symbol: &str, interval: Timeframe, size: usize) -> Result<Vec<Candle>> {
        let mut feeds = self
            .feeds
            .lock()
            .map_err(|_| Error::Provider("synthetic feed poisoned".to_string()))?;

        let step = Duration::minutes(interval.minutes());
        let feed = feeds
            .entry((symbol.to_string(), interval))
            .or_insert_with(|| Feed {
                rng: StdRng::seed_from_u64(self.symbol_seed(symbol)),
                candles: Vec::new(),
            });

        // First call builds the full history; later calls add one bar
        let missing = if feed.candles.is_empty() {
            size.max(1)
        } else {
            1
        };
        for _ in 0..missing {
            let (prev_close, timestamp) = match feed.candles.last() {
                Some(last) => (last.close, last.timestamp + step),
                None => (self.base_price(symbol), self.start),
            };
            let candle = self.next_candle(&mut feed.rng, symbol, prev_close, timestamp);
            feed.candles.push(candle);
        }

        let start = feed.candles.len().saturating_sub(size);
        Ok(feed.candles[start..].to_vec())
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticProvider {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let feeds = self
            .feeds
            .lock()
            .map_err(|_| Error::Provider("synthetic feed poisoned".to_string()))?;

        let last = feeds
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .filter_map(|(_, feed)| feed.candles.last())
            .max_by_key(|c| c.timestamp);

        Ok(match last {
            Some(candle) => Quote {
                symbol: symbol.to_string(),
                price: candle.close,
                timestamp: candle.timestamp,
            },
            None => Quote {
                symbol: symbol.to_string(),
                price: self.base_price(symbol),
                timestamp: self.start,
            },
        })
    }

    async fn time_series(&self, symbol: &str, interval: Timeframe, size: usize) -> Result<Vec<Candle>> {
        self.advance(symbol, interval, size)
    }

    async fn indicator(
        &self,
        symbol: &str,
        kind: IndicatorKind,
        interval: Timeframe,
        size: usize,
    ) -> Result<IndicatorSeries> {
        let candles = self.advance(symbol, interval, size)?;
        Ok(compute_series(kind, &candles))
    }
}
