use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    client::{
        FetchError, ForecastParams, ForecastProvider, RawCurrent, RawDaily, RawHourly,
        series_value,
    },
    codec::{self, Locale},
    config::Config,
    insight::{InsightGenerator, fallback_insight},
    model::{ForecastDay, Location, WeatherPayload, WeatherReading},
};

const HOURLY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
const DAILY_DATE_FORMAT: &str = "%Y-%m-%d";

/// Builds normalized payloads from one forecast fetch.
#[derive(Debug, Clone)]
pub struct WeatherAggregator {
    provider: Arc<dyn ForecastProvider>,
    insight: Option<Arc<dyn InsightGenerator>>,
    location: Location,
    timezone: Tz,
    params: ForecastParams,
    past_days: u32,
    locale: Locale,
}

impl WeatherAggregator {
    pub fn new(
        config: &Config,
        provider: Arc<dyn ForecastProvider>,
        insight: Option<Arc<dyn InsightGenerator>>,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            insight,
            location: config.location.clone(),
            timezone: config.timezone()?,
            params: ForecastParams::from_config(config),
            past_days: config.forecast.past_days,
            locale: config.locale,
        })
    }

    /// Payload for the current wall-clock time in the configured timezone.
    pub async fn build_payload(&self, include_insight: bool) -> Result<WeatherPayload, FetchError> {
        let now = Utc::now().with_timezone(&self.timezone).naive_local();
        self.build_payload_at(include_insight, now).await
    }

    /// Payload as seen at local time `now`.
    #[instrument(skip(self), fields(city = %self.location.city))]
    pub async fn build_payload_at(
        &self,
        include_insight: bool,
        now: NaiveDateTime,
    ) -> Result<WeatherPayload, FetchError> {
        info!(include_insight, "Fetching weather data");

        let raw = self.provider.fetch(&self.params).await?;
        let precipitation = current_precipitation(&raw.hourly, now);

        let mut payload = WeatherPayload {
            location: self.location.clone(),
            current: current_reading(&raw.current, now, precipitation, self.locale),
            daily: daily_forecast(&raw.daily, self.locale),
            past_days: self.past_days,
            ai_insight: None,
        };

        if include_insight {
            let insight = match &self.insight {
                Some(generator) => generator.generate(&payload).await,
                None => {
                    warn!("Insight requested but no generator is configured");
                    fallback_insight(self.locale).to_string()
                }
            };
            payload.ai_insight = Some(insight);
        }

        info!(days = payload.daily.len(), "Weather data processed successfully");
        Ok(payload)
    }
}

/// Probability for the hour containing `now`, or 0 when the series does not
/// cover it. The hourly series is short, a linear scan is enough.
pub fn current_precipitation(hourly: &RawHourly, now: NaiveDateTime) -> u8 {
    let hour = truncate_to_hour(now);

    for (index, raw_time) in hourly.time.iter().enumerate() {
        let Ok(time) = NaiveDateTime::parse_from_str(raw_time, HOURLY_TIME_FORMAT) else {
            continue;
        };
        if truncate_to_hour(time) == hour {
            return codec::coerce_percent(series_value(&hourly.precipitation_probability, index));
        }
    }

    0
}

fn truncate_to_hour(time: NaiveDateTime) -> NaiveDateTime {
    time.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

fn current_reading(
    current: &RawCurrent,
    now: NaiveDateTime,
    precipitation_probability: u8,
    locale: Locale,
) -> WeatherReading {
    let condition = codec::classify(codec::coerce_code(current.weather_code));

    WeatherReading {
        time: now.with_nanosecond(0).unwrap_or(now),
        temperature: codec::coerce_f64(current.temperature_2m),
        relative_humidity: codec::coerce_f64(current.relative_humidity_2m),
        apparent_temperature: codec::coerce_f64(current.apparent_temperature),
        is_day: codec::coerce_flag(current.is_day),
        uv: codec::coerce_f64(current.uv_index),
        weather_code: condition.label(locale).to_string(),
        precipitation_probability,
    }
}

/// Daily rows in the order the API returned them.
fn daily_forecast(daily: &RawDaily, locale: Locale) -> Vec<ForecastDay> {
    let mut days = Vec::with_capacity(daily.time.len());

    for (i, raw_date) in daily.time.iter().enumerate() {
        let date = match NaiveDate::parse_from_str(raw_date, DAILY_DATE_FORMAT) {
            Ok(date) => date,
            Err(err) => {
                warn!(date = %raw_date, error = %err, "Skipping daily entry with invalid date");
                continue;
            }
        };
        let condition = codec::classify(codec::coerce_code(series_value(&daily.weather_code, i)));

        days.push(ForecastDay {
            date,
            temperature_max: codec::coerce_f64(series_value(&daily.temperature_2m_max, i)),
            temperature_min: codec::coerce_f64(series_value(&daily.temperature_2m_min, i)),
            apparent_temperature_max: codec::coerce_f64(series_value(
                &daily.apparent_temperature_max,
                i,
            )),
            apparent_temperature_min: codec::coerce_f64(series_value(
                &daily.apparent_temperature_min,
                i,
            )),
            uv_index_max: codec::coerce_f64(series_value(&daily.uv_index_max, i)),
            precipitation_probability: codec::coerce_percent(series_value(
                &daily.precipitation_probability_mean,
                i,
            )),
            weather_code: condition.label(locale).to_string(),
        });
    }

    days
}
