//! Open-Meteo forecast client.
//!
//! One request per call, answered from the response cache when possible and
//! retried with exponential backoff on transient failures.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, ForecastConfig};

pub mod cache;

pub use cache::{FileCache, MemoryCache, NoCache, ResponseCache};

pub const CURRENT_VARIABLES: [&str; 6] = [
    "temperature_2m",
    "relative_humidity_2m",
    "apparent_temperature",
    "is_day",
    "uv_index",
    "weather_code",
];

pub const DAILY_VARIABLES: [&str; 7] = [
    "temperature_2m_max",
    "temperature_2m_min",
    "apparent_temperature_max",
    "apparent_temperature_min",
    "uv_index_max",
    "precipitation_probability_mean",
    "weather_code",
];

pub const HOURLY_VARIABLES: [&str; 1] = ["precipitation_probability"];

#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout or body read failure.
    #[error("Forecast request failed: {0}")]
    Transport(String),

    #[error("Forecast API returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse forecast response: {0}")]
    Parse(String),
}

impl FetchError {
    /// Transport failures, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Http { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            FetchError::Parse(_) => false,
        }
    }
}

/// Query parameters for one forecast request.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastParams {
    pub latitude: f64,
    pub longitude: f64,
    pub past_days: u32,
    pub hourly: Vec<String>,
    pub daily: Vec<String>,
    pub current: Vec<String>,
    pub timezone: String,
    pub model: String,
}

impl ForecastParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            latitude: config.location.latitude,
            longitude: config.location.longitude,
            past_days: config.forecast.past_days,
            hourly: HOURLY_VARIABLES.iter().map(|v| v.to_string()).collect(),
            daily: DAILY_VARIABLES.iter().map(|v| v.to_string()).collect(),
            current: CURRENT_VARIABLES.iter().map(|v| v.to_string()).collect(),
            timezone: config.location.timezone.clone(),
            model: config.forecast.model.clone(),
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("past_days", self.past_days.to_string()),
            ("hourly", self.hourly.join(",")),
            ("daily", self.daily.join(",")),
            ("current", self.current.join(",")),
            ("timezone", self.timezone.clone()),
            ("models", self.model.clone()),
        ]
    }
}

/// Forecast response as returned by the API. Every series value is nullable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawForecast {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub utc_offset_seconds: i64,
    pub current: RawCurrent,
    pub hourly: RawHourly,
    pub daily: RawDaily,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCurrent {
    pub time: Option<String>,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub apparent_temperature: Option<f64>,
    pub is_day: Option<f64>,
    pub uv_index: Option<f64>,
    pub weather_code: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHourly {
    /// Local civil time in the requested timezone, `YYYY-MM-DDTHH:MM`.
    pub time: Vec<String>,
    pub precipitation_probability: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDaily {
    /// Calendar days, `YYYY-MM-DD`.
    pub time: Vec<String>,
    pub temperature_2m_max: Vec<Option<f64>>,
    pub temperature_2m_min: Vec<Option<f64>>,
    pub apparent_temperature_max: Vec<Option<f64>>,
    pub apparent_temperature_min: Vec<Option<f64>>,
    pub uv_index_max: Vec<Option<f64>>,
    pub precipitation_probability_mean: Vec<Option<f64>>,
    pub weather_code: Vec<Option<f64>>,
}

/// Value at `index` of a nullable series; short series read as missing.
pub fn series_value(series: &[Option<f64>], index: usize) -> Option<f64> {
    series.get(index).copied().flatten()
}

/// Exponential backoff: retry `n` waits `factor * 2^(n-1)` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5, backoff_factor: 0.2 }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        Duration::from_secs_f64(self.backoff_factor.max(0.0) * f64::from(1u32 << exp))
    }
}

#[async_trait]
pub trait ForecastProvider: Send + Sync + Debug {
    async fn fetch(&self, params: &ForecastParams) -> Result<RawForecast, FetchError>;
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    http: Client,
    base_url: String,
    cache: Arc<dyn ResponseCache>,
    retry: RetryPolicy,
}

impl OpenMeteoClient {
    /// Client with the on-disk cache and retry policy from `config`.
    pub fn new(config: &ForecastConfig) -> Result<Self, FetchError> {
        let cache = Arc::new(FileCache::new(&config.cache_dir, config.cache_ttl()));
        let retry =
            RetryPolicy { max_retries: config.max_retries, backoff_factor: config.backoff_factor };
        Self::with_cache(config, cache, retry)
    }

    pub fn with_cache(
        config: &ForecastConfig,
        cache: Arc<dyn ResponseCache>,
        retry: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self { http, base_url: config.base_url.clone(), cache, retry })
    }

    fn request_url(&self, params: &ForecastParams) -> Result<Url, FetchError> {
        Url::parse_with_params(&self.base_url, params.query())
            .map_err(|e| FetchError::Transport(format!("Invalid forecast URL: {e}")))
    }

    async fn send_once(&self, url: &Url) -> Result<String, FetchError> {
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| FetchError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(FetchError::Http { status: status.as_u16(), body: truncate_body(&body) });
        }

        Ok(body)
    }

    async fn send_with_retry(&self, url: &Url) -> Result<String, FetchError> {
        let mut retries = 0;
        loop {
            match self.send_once(url).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    let delay = self.retry.delay_for(retries);
                    warn!(
                        error = %err,
                        retry = retries,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Forecast request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl ForecastProvider for OpenMeteoClient {
    #[instrument(skip(self, params), fields(lat = %params.latitude, lon = %params.longitude))]
    async fn fetch(&self, params: &ForecastParams) -> Result<RawForecast, FetchError> {
        let url = self.request_url(params)?;
        let key = url.as_str();

        if let Some(body) = self.cache.get(key) {
            match serde_json::from_str::<RawForecast>(&body) {
                Ok(raw) => {
                    debug!("Forecast served from cache");
                    return Ok(raw);
                }
                Err(err) => debug!(error = %err, "Discarding unparseable cached forecast"),
            }
        }

        debug!(url = %url, "Fetching forecast");
        let body = self.send_with_retry(&url).await?;
        let raw: RawForecast =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

        self.cache.set(key, &body);
        info!("Weather data fetched successfully");
        Ok(raw)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
