// Rate-limited data gateway
//
// Every market data request goes through here: cache first, then the
// request budget, then the provider. Stale cache entries are served
// (flagged) rather than failing while anything is cached at all.

pub mod budget;
pub mod cache;

pub use budget::{Acquire, BudgetUsage, RequestBudget};
pub use cache::{CacheEntry, SnapshotCache};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::api::MarketDataProvider;
use crate::clock::Clock;
use crate::indicators::{compute_series, IndicatorKind, IndicatorParams, IndicatorSeries, IndicatorSet};
use crate::models::{Candle, MarketSnapshot, Quote, Timeframe};
use crate::{Error, Result};

/// Provider-side 429s tolerated per request before giving up
const MAX_RATE_LIMITED_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorSource {
    /// Compute from the cached OHLCV window (no extra provider calls)
    Local,
    /// Ask the provider's indicator endpoint
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub daily_limit: u32,
    pub live_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub cache_capacity: usize,
    pub serve_stale_when_throttled: bool,
    pub indicator_source: IndicatorSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 8,
            window_secs: 60,
            daily_limit: 800,
            live_ttl_secs: 60,
            history_ttl_secs: 300,
            cache_capacity: 256,
            serve_stale_when_throttled: true,
            indicator_source: IndicatorSource::Local,
        }
    }
}

/// Data plus where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl<T> Fetched<T> {
    fn from_entry(entry: CacheEntry<T>, stale: bool) -> Self {
        Self {
            data: entry.value,
            fetched_at: entry.fetched_at,
            stale,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct DataGateway {
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
    params: IndicatorParams,
    budget: Mutex<RequestBudget>,
    series: Mutex<SnapshotCache<Vec<Candle>>>,
    remote_indicators: Mutex<SnapshotCache<IndicatorSeries>>,
    quotes: Mutex<SnapshotCache<Quote>>,
}

impl DataGateway {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
        params: IndicatorParams,
    ) -> Self {
        let budget = RequestBudget::new(
            config.requests_per_window,
            Duration::from_secs(config.window_secs),
            config.daily_limit,
            clock.clone(),
        );
        Self {
            provider,
            clock,
            budget: Mutex::new(budget),
            series: Mutex::new(SnapshotCache::new(config.cache_capacity)),
            remote_indicators: Mutex::new(SnapshotCache::new(config.cache_capacity)),
            quotes: Mutex::new(SnapshotCache::new(config.cache_capacity)),
            config,
            params,
        }
    }

    pub fn usage(&self) -> BudgetUsage {
        lock(&self.budget).usage()
    }

    pub fn indicator_params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Cache -> budget -> provider, with stale fallback
    async fn fetch<V, F, Fut>(
        &self,
        cache: &Mutex<SnapshotCache<V>>,
        key: String,
        ttl: Duration,
        symbol: &str,
        usable: impl Fn(&V) -> bool,
        call: F,
    ) -> Result<Fetched<V>>
    where
        V: Clone,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let mut rate_limited = 0;

        loop {
            let now = self.clock.now();
            let cached = lock(cache).get(&key).filter(|e| usable(&e.value));

            if let Some(entry) = &cached {
                if entry.is_fresh(now) {
                    return Ok(Fetched::from_entry(entry.clone(), false));
                }
            }

            let verdict = lock(&self.budget).try_acquire();
            match verdict {
                Acquire::Granted => {}
                Acquire::Wait(wait) => {
                    if self.config.serve_stale_when_throttled {
                        if let Some(entry) = cached {
                            tracing::debug!(symbol = %symbol, key = %key, "Budget spent, serving stale");
                            return Ok(Fetched::from_entry(entry, true));
                        }
                    }
                    tracing::debug!(symbol = %symbol, "⏳ Request budget spent, waiting {:?}", wait);
                    self.clock.sleep(wait).await;
                    continue;
                }
                Acquire::DailyExhausted => {
                    tracing::warn!(symbol = %symbol, "Daily request ceiling reached");
                    return match cached {
                        Some(entry) => Ok(Fetched::from_entry(entry, true)),
                        None => Err(Error::ProviderUnavailable {
                            symbol: symbol.to_string(),
                            reason: "daily request ceiling reached".to_string(),
                        }),
                    };
                }
            }

            match call().await {
                Ok(value) => {
                    let fetched_at = self.clock.now();
                    lock(cache).insert(key, value.clone(), ttl, fetched_at);
                    return Ok(Fetched {
                        data: value,
                        fetched_at,
                        stale: false,
                    });
                }
                Err(Error::RateLimitExceeded { retry_after }) => {
                    if let Some(entry) = cached {
                        return Ok(Fetched::from_entry(entry, true));
                    }
                    rate_limited += 1;
                    if rate_limited > MAX_RATE_LIMITED_RETRIES {
                        return Err(Error::ProviderUnavailable {
                            symbol: symbol.to_string(),
                            reason: "provider kept rate limiting".to_string(),
                        });
                    }
                    tracing::warn!(symbol = %symbol, "Provider rate limited, retrying in {:?}", retry_after);
                    self.clock.sleep(retry_after).await;
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, key = %key, "Provider request failed: {}", e);
                    return match cached {
                        Some(entry) => Ok(Fetched::from_entry(entry, true)),
                        None => Err(Error::ProviderUnavailable {
                            symbol: symbol.to_string(),
                            reason: e.to_string(),
                        }),
                    };
                }
            }
        }
    }

    /// OHLCV window ordered oldest -> newest, at most `length` bars
    pub async fn get_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        length: usize,
    ) -> Result<Fetched<Vec<Candle>>> {
        let key = format!("{}|{}|series", symbol, timeframe);
        let ttl = Duration::from_secs(self.config.history_ttl_secs);

        let mut fetched = self
            .fetch(
                &self.series,
                key,
                ttl,
                symbol,
                |candles: &Vec<Candle>| candles.len() >= length,
                || self.provider.time_series(symbol, timeframe, length),
            )
            .await?;

        let start = fetched.data.len().saturating_sub(length);
        fetched.data.drain(..start);
        Ok(fetched)
    }

    pub async fn get_indicator(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        kind: IndicatorKind,
        length: usize,
    ) -> Result<Fetched<IndicatorSeries>> {
        match self.config.indicator_source {
            IndicatorSource::Local => {
                let series = self.get_series(symbol, timeframe, length).await?;
                Ok(Fetched {
                    data: compute_series(kind, &series.data),
                    fetched_at: series.fetched_at,
                    stale: series.stale,
                })
            }
            IndicatorSource::Remote => {
                let key = format!("{}|{}|{}", symbol, timeframe, kind.cache_key());
                let ttl = Duration::from_secs(self.config.history_ttl_secs);
                self.fetch(
                    &self.remote_indicators,
                    key,
                    ttl,
                    symbol,
                    |_| true,
                    || self.provider.indicator(symbol, kind, timeframe, length),
                )
                .await
            }
        }
    }

    pub async fn quote(&self, symbol: &str) -> Result<Fetched<Quote>> {
        let key = format!("{}|quote", symbol);
        let ttl = Duration::from_secs(self.config.live_ttl_secs);
        self.fetch(&self.quotes, key, ttl, symbol, |_| true, || self.provider.quote(symbol))
            .await
    }

    /// One cycle's view of a symbol; indicators come from exactly the
    /// candles carried in the snapshot
    pub async fn snapshot(&self, symbol: &str, timeframe: Timeframe, length: usize) -> Result<MarketSnapshot> {
        let series = self.get_series(symbol, timeframe, length).await?;

        let need = self.params.warmup_bars();
        if series.data.len() < need {
            return Err(Error::InsufficientData {
                symbol: symbol.to_string(),
                have: series.data.len(),
                need,
            });
        }

        let indicators = IndicatorSet::compute(&series.data, &self.params);
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            timeframe,
            candles: series.data,
            indicators,
            fetched_at: series.fetched_at,
            stale: series.stale,
        })
    }
}
