use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// The fixed place the producer reports on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

/// Current conditions at the moment of the fetch, in the city's local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReading {
    #[serde(with = "local_time")]
    pub time: NaiveDateTime,
    pub temperature: f64,
    pub relative_humidity: f64,
    pub apparent_temperature: f64,
    pub is_day: bool,
    pub uv: f64,
    pub weather_code: String,
    pub precipitation_probability: u8,
}

/// One calendar day of the daily series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDay {
    #[serde(with = "local_date")]
    pub date: NaiveDate,
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub apparent_temperature_max: f64,
    pub apparent_temperature_min: f64,
    pub uv_index_max: f64,
    pub precipitation_probability: u8,
    pub weather_code: String,
}

/// The message published to the queue and fed to the exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherPayload {
    pub location: Location,
    pub current: WeatherReading,
    pub daily: Vec<ForecastDay>,
    pub past_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_insight: Option<String>,
}

impl WeatherPayload {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

pub(crate) const TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
pub(crate) const DATE_FORMAT: &str = "%d/%m/%Y";

mod local_time {
    use super::TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&value.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIME_FORMAT).map_err(D::Error::custom)
    }
}

mod local_date {
    use super::DATE_FORMAT;
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&value.format(DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(D::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::Value;

    pub(crate) fn sample_payload() -> WeatherPayload {
        WeatherPayload {
            location: Location {
                city: "Itaguaí-Rj".into(),
                latitude: -22.8765,
                longitude: -43.777,
                timezone: "America/Sao_Paulo".into(),
            },
            current: WeatherReading {
                time: NaiveDate::from_ymd_opt(2025, 3, 14)
                    .unwrap()
                    .and_hms_opt(15, 4, 5)
                    .unwrap(),
                temperature: 29.5,
                relative_humidity: 71.0,
                apparent_temperature: 33.25,
                is_day: true,
                uv: 6.5,
                weather_code: "Chuva".into(),
                precipitation_probability: 40,
            },
            daily: vec![
                ForecastDay {
                    date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
                    temperature_max: 31.0,
                    temperature_min: 22.5,
                    apparent_temperature_max: 35.0,
                    apparent_temperature_min: 24.0,
                    uv_index_max: 9.0,
                    precipitation_probability: 55,
                    weather_code: "Chuva".into(),
                },
                ForecastDay {
                    date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
                    temperature_max: 30.0,
                    temperature_min: 21.0,
                    apparent_temperature_max: 33.5,
                    apparent_temperature_min: 23.0,
                    uv_index_max: 8.5,
                    precipitation_probability: 0,
                    weather_code: "Céu limpo".into(),
                },
            ],
            past_days: 30,
            ai_insight: None,
        }
    }

    #[test]
    fn serializes_with_camel_case_schema() {
        let json: Value = serde_json::to_value(sample_payload()).unwrap();

        assert_eq!(json["location"]["city"], "Itaguaí-Rj");
        assert_eq!(json["current"]["time"], "14/03/2025 15:04:05");
        assert_eq!(json["current"]["relativeHumidity"], 71.0);
        assert_eq!(json["current"]["isDay"], true);
        assert_eq!(json["current"]["precipitationProbability"], 40);
        assert_eq!(json["daily"][1]["date"], "15/03/2025");
        assert_eq!(json["daily"][0]["uvIndexMax"], 9.0);
        assert_eq!(json["pastDays"], 30);
        assert!(json.get("aiInsight").is_none());
    }

    #[test]
    fn json_roundtrip_preserves_structure() {
        let mut payload = sample_payload();
        payload.ai_insight = Some("Leve guarda-chuva".into());

        let json = payload.to_json().unwrap();
        let parsed = WeatherPayload::from_json(&json).unwrap();
        assert_eq!(parsed, payload);

        let again: Value = serde_json::from_str(&parsed.to_json().unwrap()).unwrap();
        let original: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(again, original);
        assert_eq!(again["daily"][0]["date"], "14/03/2025");
        assert_eq!(again["daily"][1]["date"], "15/03/2025");
    }

    #[test]
    fn rejects_malformed_timestamp() {
        let mut json: Value = serde_json::to_value(sample_payload()).unwrap();
        json["current"]["time"] = Value::String("2025-03-14T15:04".into());
        assert!(serde_json::from_value::<WeatherPayload>(json).is_err());
    }
}
