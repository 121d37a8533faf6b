//! Market Data Sources
//!
//! - [`TwelveDataSource`]: `GET {base}/time_series`, retried with exponential
//!   backoff on transport errors and 5xx responses
//! - [`JsonFileSource`]: candles stored as `{dir}/{SYMBOL}_{timeframe}.json`
//!
//! Both return candles sorted oldest first. Enforcing the minimum window is
//! the caller's job.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::ai::backend::validate_endpoint;
use crate::constants::network as net_constants;
use crate::types::{Candle, FxError, Result, Timeframe, normalize_symbol};

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `count` most recent candles, oldest first
    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>>;
}

// =============================================================================
// Twelve Data
// =============================================================================

pub struct TwelveDataSource {
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
    retries: usize,
}

impl std::fmt::Debug for TwelveDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwelveDataSource")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TwelveDataSource {
    pub fn new(api_key: String, base_url: &str) -> Result<Self> {
        let base_url = validate_endpoint(base_url, "Twelve Data")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(net_constants::DATA_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| FxError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
            client,
            retries: net_constants::MAX_NETWORK_RETRIES,
        })
    }

    async fn fetch_once(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>> {
        let outputsize = count.to_string();
        let response = self
            .client
            .get(format!("{}/time_series", self.base_url))
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe.twelve_data_interval()),
                ("apikey", self.api_key.expose_secret()),
                ("outputsize", outputsize.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: TimeSeriesResponse = response.json().await?;
        parse_time_series(body)
    }
}

/// Transport errors and server errors are worth retrying; API errors are not
fn is_transient(err: &FxError) -> bool {
    match err {
        FxError::Http(e) => e.status().is_none_or(|s| s.is_server_error()),
        _ => false,
    }
}

#[async_trait]
impl MarketDataSource for TwelveDataSource {
    fn name(&self) -> &str {
        "twelve_data"
    }

    #[instrument(skip(self), fields(source = "twelve_data"))]
    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>> {
        let symbol = normalize_symbol(symbol);
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(net_constants::RETRY_BASE_DELAY_MS))
            .with_max_times(self.retries);

        let candles = (|| self.fetch_once(&symbol, timeframe, count))
            .retry(backoff)
            .when(is_transient)
            .notify(|err, delay| {
                warn!(error = %err, delay_ms = delay.as_millis() as u64, "Market data request failed, retrying");
            })
            .await?;

        debug!(count = candles.len(), "Candles fetched");
        Ok(candles)
    }
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    values: Vec<TimeSeriesValue>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

fn parse_time_series(body: TimeSeriesResponse) -> Result<Vec<Candle>> {
    if body.status.as_deref().is_some_and(|s| s != "ok") {
        return Err(FxError::DataSource(format!(
            "TwelveData API error: {}",
            body.message.as_deref().unwrap_or("Unknown error from TwelveData API")
        )));
    }

    let mut candles: Vec<Candle> = body
        .values
        .iter()
        .filter_map(|v| {
            let candle = Candle::new(
                parse_timestamp(&v.datetime)?,
                v.open.parse().ok()?,
                v.high.parse().ok()?,
                v.low.parse().ok()?,
                v.close.parse().ok()?,
            );
            let volume = v.volume.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0.0);
            Some(candle.with_volume(volume))
        })
        .collect();

    let dropped = body.values.len() - candles.len();
    if dropped > 0 {
        warn!(dropped, "Skipped malformed candle rows");
    }

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

/// `2024-01-02 15:00:00`, or a bare date for daily bars
fn parse_timestamp(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// =============================================================================
// JSON Files
// =============================================================================

/// Reads candles recorded earlier, for offline runs and tests
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        let compact: String = normalize_symbol(symbol).chars().filter(|c| *c != '/').collect();
        self.dir.join(format!("{}_{}.json", compact, timeframe))
    }
}

#[async_trait]
impl MarketDataSource for JsonFileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Candle>> {
        let path = self.path_for(symbol, timeframe);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            FxError::DataSource(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut candles: Vec<Candle> = serde_json::from_str(&content)?;
        candles.sort_by_key(|c| c.timestamp);
        if candles.len() > count {
            candles.drain(..candles.len() - count);
        }
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_time_series_sorts_and_skips_bad_rows() {
        let body: TimeSeriesResponse = serde_json::from_str(
            r#"{
                "status": "ok",
                "values": [
                    {"datetime": "2024-01-02 11:00:00", "open": "1.1", "high": "1.2", "low": "1.0", "close": "1.15"},
                    {"datetime": "2024-01-02 10:00:00", "open": "1.0", "high": "1.1", "low": "0.9", "close": "1.1", "volume": "42"},
                    {"datetime": "garbage", "open": "1", "high": "1", "low": "1", "close": "1"}
                ]
            }"#,
        )
        .unwrap();

        let candles = parse_time_series(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].timestamp < candles[1].timestamp);
        assert_eq!(candles[0].volume, 42.0);
    }

    #[test]
    fn test_parse_time_series_api_error() {
        let body: TimeSeriesResponse =
            serde_json::from_str(r#"{"status": "error", "code": 401, "message": "Invalid API key"}"#).unwrap();
        let err = parse_time_series(body).unwrap_err();
        assert_eq!(err.to_string(), "Data source error: TwelveData API error: Invalid API key");
    }

    #[test]
    fn test_parse_daily_timestamp() {
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("03/01/2024").is_none());
    }

    #[test]
    fn test_api_errors_are_not_transient() {
        assert!(!is_transient(&FxError::DataSource("bad key".into())));
    }

    #[tokio::test]
    async fn test_file_source_keeps_most_recent() {
        let dir = TempDir::new().unwrap();
        let source = JsonFileSource::new(dir.path());
        let candles: Vec<Candle> = (0..5)
            .map(|i| {
                Candle::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, i, 0, 0).unwrap(),
                    1.0,
                    1.1,
                    0.9,
                    1.0 + i as f64 / 100.0,
                )
            })
            .rev()
            .collect();
        std::fs::write(
            source.path_for("eur/usd", Timeframe::H1),
            serde_json::to_string(&candles).unwrap(),
        )
        .unwrap();

        assert!(source.path_for("EURUSD", Timeframe::H1).ends_with("EURUSD_1h.json"));
        let loaded = source.fetch_candles("EURUSD", Timeframe::H1, 3).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
        assert_eq!(loaded[2].timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = JsonFileSource::new(dir.path())
            .fetch_candles("GBPUSD", Timeframe::D1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, FxError::DataSource(_)));
    }
}
