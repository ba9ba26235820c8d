use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::MarketDataProvider;
use crate::indicators::{IndicatorKind, IndicatorPoint, IndicatorSeries};
use crate::models::{Candle, Quote, Timeframe};
use crate::{Error, Result};

pub const TWELVEDATA_API_BASE: &str = "https://api.twelvedata.com";
const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type TwelveDataRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Twelve Data REST client with request pacing and retry
///
/// This struct is cloneable to allow sharing across async tasks.
/// All clones share the same rate limiter. Quota accounting (per-window
/// and daily budgets, stale fallbacks) lives in the data gateway; this
/// limiter only keeps bursts under the provider's per-minute ceiling.
#[derive(Clone)]
pub struct TwelveDataClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: Arc<TwelveDataRateLimiter>,
}

/// Body of an error answer; Twelve Data often returns these with HTTP 200
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    symbol: String,
    close: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    values: Vec<HashMap<String, Value>>,
}

impl TwelveDataClient {
    pub fn new(api_key: String, requests_per_minute: u32) -> Result<Self> {
        Self::with_base_url(api_key, requests_per_minute, TWELVEDATA_API_BASE)
    }

    pub fn with_base_url(api_key: String, requests_per_minute: u32, base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    /// Make a rate-limited API request with retry logic
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut params: Vec<(&str, String)> = query.to_vec();
        params.push(("apikey", self.api_key.clone()));

        for attempt in 1..=MAX_RETRIES {
            // Wait for rate limiter
            self.rate_limiter.until_ready().await;

            let response = match self.client.get(&url).query(&params).send().await {
                Ok(response) => response,
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            // Handle server errors (5xx)
            if status.is_server_error() && attempt < MAX_RETRIES {
                let backoff_secs = 2u64.pow(attempt);
                tracing::warn!(
                    "Server error {} from Twelve Data, retrying in {}s (attempt {}/{})",
                    status,
                    backoff_secs,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                continue;
            }

            if status.as_u16() == 429 {
                return Err(Error::RateLimitExceeded {
                    retry_after: Duration::from_secs(60),
                });
            }

            let body: Value = response.json().await?;

            // Errors come back as {"status":"error","code":..,"message":..}
            if body.get("status").and_then(Value::as_str) == Some("error") || !status.is_success() {
                let err: ErrorBody = serde_json::from_value(body).unwrap_or(ErrorBody {
                    code: status.as_u16(),
                    message: "unknown error".to_string(),
                });
                if err.code == 429 {
                    return Err(Error::RateLimitExceeded {
                        retry_after: Duration::from_secs(60),
                    });
                }
                return Err(Error::Provider(format!("{} ({})", err.message, err.code)));
            }

            return Ok(body);
        }

        Err(Error::Provider(format!("Failed after {} retries", MAX_RETRIES)))
    }
}

#[async_trait]
impl MarketDataProvider for TwelveDataClient {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        tracing::debug!("Fetching quote for {}", symbol);

        let body = self.get_json("quote", &[("symbol", symbol.to_string())]).await?;
        let quote: QuoteResponse = serde_json::from_value(body)?;

        let price = quote
            .close
            .parse::<f64>()
            .map_err(|e| Error::Provider(format!("bad price '{}': {}", quote.close, e)))?;
        let timestamp = Utc
            .timestamp_opt(quote.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(Quote {
            symbol: quote.symbol,
            price,
            timestamp,
        })
    }

    async fn time_series(&self, symbol: &str, interval: Timeframe, size: usize) -> Result<Vec<Candle>> {
        tracing::debug!("Fetching {} {} bars for {}", size, interval, symbol);

        let body = self
            .get_json(
                "time_series",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_interval().to_string()),
                    ("outputsize", size.to_string()),
                ],
            )
            .await?;
        let response: ValuesResponse = serde_json::from_value(body)?;

        let mut candles = Vec::with_capacity(response.values.len());
        for row in &response.values {
            candles.push(Candle {
                symbol: symbol.to_string(),
                timestamp: parse_datetime(row)?,
                open: field_f64(row, "open")?,
                high: field_f64(row, "high")?,
                low: field_f64(row, "low")?,
                close: field_f64(row, "close")?,
                // FX pairs come without volume
                volume: field_f64(row, "volume").unwrap_or(0.0),
            });
        }

        // Provider answers newest first
        candles.sort_by_key(|c| c.timestamp);

        tracing::debug!("Fetched {} bars for {}", candles.len(), symbol);
        Ok(candles)
    }

    async fn indicator(
        &self,
        symbol: &str,
        kind: IndicatorKind,
        interval: Timeframe,
        size: usize,
    ) -> Result<IndicatorSeries> {
        let mut query = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.as_interval().to_string()),
            ("outputsize", size.to_string()),
        ];
        query.extend(kind.query_params());

        let body = self.get_json(kind.endpoint(), &query).await?;
        let response: ValuesResponse = serde_json::from_value(body)?;

        let mut points = Vec::with_capacity(response.values.len());
        for row in &response.values {
            let values = kind
                .outputs()
                .iter()
                .map(|name| field_f64(row, name))
                .collect::<Result<Vec<f64>>>()?;
            points.push(IndicatorPoint {
                timestamp: parse_datetime(row)?,
                values,
            });
        }
        points.sort_by_key(|p| p.timestamp);

        Ok(IndicatorSeries { kind, points })
    }
}

/// Numbers arrive as JSON strings ("1.08512") or plain numbers
fn field_f64(row: &HashMap<String, Value>, name: &str) -> Result<f64> {
    match row.get(name) {
        Some(Value::String(s)) => s
            .parse::<f64>()
            .map_err(|e| Error::Provider(format!("bad {} '{}': {}", name, s, e))),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Error::Provider(format!("bad {}: {}", name, n))),
        _ => Err(Error::Provider(format!("missing field '{}'", name))),
    }
}

/// Intraday bars use "YYYY-MM-DD HH:MM:SS", daily bars just the date
fn parse_datetime(row: &HashMap<String, Value>) -> Result<DateTime<Utc>> {
    let raw = row
        .get("datetime")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Provider("missing field 'datetime'".to_string()))?;

    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| Error::Provider(format!("bad datetime '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const SERIES_BODY: &str = r#"{
        "meta": {"symbol": "EUR/USD", "interval": "1h"},
        "values": [
            {"datetime": "2024-03-01 12:00:00", "open": "1.0810", "high": "1.0830", "low": "1.0800", "close": "1.0825"},
            {"datetime": "2024-03-01 11:00:00", "open": "1.0800", "high": "1.0815", "low": "1.0790", "close": "1.0810"}
        ],
        "status": "ok"
    }"#;

    #[tokio::test]
    async fn test_time_series_parses_and_orders_oldest_first() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/time_series")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "EUR/USD".into()),
                Matcher::UrlEncoded("interval".into(), "1h".into()),
                Matcher::UrlEncoded("outputsize".into(), "2".into()),
                Matcher::UrlEncoded("apikey".into(), "test-key".into()),
            ]))
            .with_status(200)
            .with_body(SERIES_BODY)
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("test-key".into(), 60, &server.url()).unwrap();
        let candles = client.time_series("EUR/USD", Timeframe::H1, 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert!(candles[0].timestamp < candles[1].timestamp);
        assert_eq!(candles[1].close, 1.0825);
        assert_eq!(candles[0].volume, 0.0); // no volume column for FX
    }

    #[tokio::test]
    async fn test_error_payload_with_http_200() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/time_series")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code": 400, "message": "symbol not found", "status": "error"}"#)
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".into(), 60, &server.url()).unwrap();
        let err = client.time_series("NOPE", Timeframe::H1, 10).await.unwrap_err();

        assert!(matches!(err, Error::Provider(ref msg) if msg.contains("symbol not found")));
    }

    #[tokio::test]
    async fn test_quota_error_maps_to_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code": 429, "message": "run out of API credits", "status": "error"}"#)
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".into(), 60, &server.url()).unwrap();
        let err = client.quote("EUR/USD").await.unwrap_err();

        assert!(matches!(err, Error::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_quote() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(Matcher::UrlEncoded("symbol".into(), "XAU/USD".into()))
            .with_status(200)
            .with_body(r#"{"symbol": "XAU/USD", "close": "2041.50", "timestamp": 1709294400}"#)
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".into(), 60, &server.url()).unwrap();
        let quote = client.quote("XAU/USD").await.unwrap();

        assert_eq!(quote.price, 2041.5);
        assert_eq!(quote.timestamp.timestamp(), 1709294400);
    }

    #[tokio::test]
    async fn test_indicator_endpoint_multi_output() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/macd")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("fast_period".into(), "12".into()),
                Matcher::UrlEncoded("slow_period".into(), "26".into()),
                Matcher::UrlEncoded("signal_period".into(), "9".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"values": [
                    {"datetime": "2024-03-02", "macd": "0.5", "macd_signal": "0.3", "macd_hist": "0.2"},
                    {"datetime": "2024-03-01", "macd": 0.4, "macd_signal": 0.35, "macd_hist": 0.05}
                ], "status": "ok"}"#,
            )
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".into(), 60, &server.url()).unwrap();
        let kind = IndicatorKind::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        let series = client.indicator("BTC/USD", kind, Timeframe::D1, 2).await.unwrap();

        assert_eq!(series.points.len(), 2);
        assert_eq!(series.latest().unwrap().values, vec![0.5, 0.3, 0.2]);
    }
}
