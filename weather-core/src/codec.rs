//! Weather code classification and scalar coercion.
//!
//! Open-Meteo reports conditions as WMO codes and every series value as a
//! nullable number. This module folds both into the fixed types the payload
//! schema uses, so nothing downstream has to think about `null` or `NaN`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Language used for condition labels, the insight prompt and its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "pt-BR")]
    PtBr,
    #[serde(rename = "en")]
    En,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::PtBr => "pt-BR",
            Locale::En => "en",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Locale {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "pt-br" | "pt_br" | "pt" => Ok(Locale::PtBr),
            "en" | "en-us" | "en_us" => Ok(Locale::En),
            _ => Err(anyhow::anyhow!(
                "Unknown locale '{value}'. Supported locales: pt-BR, en."
            )),
        }
    }
}

/// The eight condition buckets a raw weather code collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherCondition {
    ClearSky,
    PartlyCloudy,
    Overcast,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Thunderstorm,
}

impl WeatherCondition {
    pub const fn all() -> &'static [WeatherCondition] {
        &[
            WeatherCondition::ClearSky,
            WeatherCondition::PartlyCloudy,
            WeatherCondition::Overcast,
            WeatherCondition::Fog,
            WeatherCondition::Drizzle,
            WeatherCondition::Rain,
            WeatherCondition::Snow,
            WeatherCondition::Thunderstorm,
        ]
    }

    /// Human-readable label in the given locale.
    pub fn label(&self, locale: Locale) -> &'static str {
        match locale {
            Locale::PtBr => match self {
                WeatherCondition::ClearSky => "Céu limpo",
                WeatherCondition::PartlyCloudy => "Parcialmente nublado",
                WeatherCondition::Overcast => "Nublado",
                WeatherCondition::Fog => "Neblina",
                WeatherCondition::Drizzle => "Chuvisco",
                WeatherCondition::Rain => "Chuva",
                WeatherCondition::Snow => "Neve",
                WeatherCondition::Thunderstorm => "Tempestade",
            },
            Locale::En => match self {
                WeatherCondition::ClearSky => "Clear sky",
                WeatherCondition::PartlyCloudy => "Partly cloudy",
                WeatherCondition::Overcast => "Overcast",
                WeatherCondition::Fog => "Fog",
                WeatherCondition::Drizzle => "Drizzle",
                WeatherCondition::Rain => "Rain",
                WeatherCondition::Snow => "Snow",
                WeatherCondition::Thunderstorm => "Thunderstorm",
            },
        }
    }
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(Locale::En))
    }
}

/// Map a raw WMO weather code to its condition bucket.
///
/// Total over `i64`: anything outside the table is clear sky.
pub const fn classify(code: i64) -> WeatherCondition {
    match code {
        0 => WeatherCondition::ClearSky,
        1 | 2 => WeatherCondition::PartlyCloudy,
        3 => WeatherCondition::Overcast,
        45 | 48 => WeatherCondition::Fog,
        51 | 53 | 55 | 56 | 57 => WeatherCondition::Drizzle,
        61 | 63 | 65 | 66 | 67 | 80 | 81 | 82 => WeatherCondition::Rain,
        71 | 73 | 75 | 77 | 85 | 86 => WeatherCondition::Snow,
        95 | 96 | 99 => WeatherCondition::Thunderstorm,
        _ => WeatherCondition::ClearSky,
    }
}

/// Float reading; missing or NaN becomes 0.0.
pub fn coerce_f64(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Probability in percent, truncated and clamped to 0..=100.
pub fn coerce_percent(value: Option<f64>) -> u8 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

/// Weather code; missing or NaN becomes 0 (clear sky).
pub fn coerce_code(value: Option<f64>) -> i64 {
    match value {
        Some(v) if v.is_finite() => v as i64,
        _ => 0,
    }
}

/// Boolean flag encoded as 0/1.
pub fn coerce_flag(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v.is_finite() && v != 0.0)
}
