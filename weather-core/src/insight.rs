//! One-sentence weather advisory from a chat-completions endpoint.
//!
//! Strictly best effort: [`InsightGenerator::generate`] always yields text,
//! substituting a fixed fallback when the model call fails.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, time::Duration};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::{codec::Locale, config::InsightConfig, model::WeatherPayload};

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Insight request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Language model API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid language model response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait InsightGenerator: Send + Sync + Debug {
    async fn generate(&self, payload: &WeatherPayload) -> String;
}

/// Advisory used whenever the model cannot be reached or answers garbage.
pub fn fallback_insight(locale: Locale) -> &'static str {
    match locale {
        Locale::PtBr => "Condições normais - sem alertas especiais",
        Locale::En => "Normal conditions - no special alerts",
    }
}

fn system_instruction(locale: Locale) -> &'static str {
    match locale {
        Locale::PtBr => {
            "Você é um assistente meteorológico. Responda em português brasileiro com \
             uma única frase objetiva de no máximo 15 palavras."
        }
        Locale::En => {
            "You are a weather assistant. Reply in English with a single concise \
             sentence of at most 15 words."
        }
    }
}

/// User prompt built from the current reading and the first three days.
pub fn build_prompt(payload: &WeatherPayload, locale: Locale) -> String {
    let current = &payload.current;
    let days = &payload.daily[..payload.daily.len().min(3)];
    let days_json = serde_json::to_string_pretty(days).unwrap_or_else(|_| "[]".to_string());

    match locale {
        Locale::PtBr => format!(
            "Analise os dados meteorológicos de {city} e gere uma frase curta com um alerta \
             ou recomendação.\n\n\
             AGORA:\n\
             - Temperatura: {temp}°C\n\
             - Umidade: {hum}%\n\
             - Índice UV: {uv}\n\
             - Condição: {cond}\n\
             - Probabilidade de chuva: {rain}%\n\n\
             PRÓXIMOS DIAS:\n{days_json}\n",
            city = payload.location.city,
            temp = current.temperature,
            hum = current.relative_humidity,
            uv = current.uv,
            cond = current.weather_code,
            rain = current.precipitation_probability,
        ),
        Locale::En => format!(
            "Look at the weather data for {city} and write one short alert or \
             recommendation.\n\n\
             NOW:\n\
             - Temperature: {temp}°C\n\
             - Humidity: {hum}%\n\
             - UV index: {uv}\n\
             - Condition: {cond}\n\
             - Chance of rain: {rain}%\n\n\
             NEXT DAYS:\n{days_json}\n",
            city = payload.location.city,
            temp = current.temperature,
            hum = current.relative_humidity,
            uv = current.uv,
            cond = current.weather_code,
            rain = current.precipitation_probability,
        ),
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiInsight {
    http: Client,
    api_key: String,
    config: InsightConfig,
    locale: Locale,
}

impl OpenAiInsight {
    /// `None` when no API key is configured.
    pub fn from_config(
        config: &InsightConfig,
        locale: Locale,
    ) -> Result<Option<Self>, InsightError> {
        match &config.api_key {
            Some(key) => Self::new(config, key.clone(), locale).map(Some),
            None => Ok(None),
        }
    }

    pub fn new(
        config: &InsightConfig,
        api_key: String,
        locale: Locale,
    ) -> Result<Self, InsightError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            config: config.clone(),
            locale,
        })
    }

    async fn request_insight(&self, payload: &WeatherPayload) -> Result<String, InsightError> {
        let prompt = build_prompt(payload, self.locale);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system_instruction(self.locale) },
                ChatMessage { role: "user", content: &prompt },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let res = self.http.post(url).bearer_auth(&self.api_key).json(&request).send().await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message: String = body.chars().take(200).collect();
            return Err(InsightError::Api { status: status.as_u16(), message });
        }

        let parsed: ChatResponse =
            res.json().await.map_err(|e| InsightError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| InsightError::InvalidResponse("response contained no content".into()))
    }
}

#[async_trait]
impl InsightGenerator for OpenAiInsight {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn generate(&self, payload: &WeatherPayload) -> String {
        info!("Generating AI insight");
        match self.request_insight(payload).await {
            Ok(insight) => {
                info!(insight = %insight, "AI insight generated");
                insight
            }
            Err(err) => {
                error!(error = %err, "Error generating AI insight, using fallback");
                fallback_insight(self.locale).to_string()
            }
        }
    }
}
