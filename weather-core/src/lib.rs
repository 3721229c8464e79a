//! Core library for the weather producer.
//!
//! This crate defines:
//! - Configuration loading (TOML file, `.env`, environment)
//! - The Open-Meteo client with response caching and retries
//! - Normalization of raw forecasts into the published payload schema
//! - Optional language-model insight, RabbitMQ publishing, CSV/Excel snapshots
//! - The pipeline and the interval scheduler that drives it
//!
//! It is used by `weather-producer`, but the pieces can be wired separately.

pub mod aggregator;
pub mod client;
pub mod codec;
pub mod config;
pub mod export;
pub mod insight;
pub mod model;
pub mod pipeline;
pub mod publisher;
pub mod scheduler;

pub use aggregator::WeatherAggregator;
pub use client::{FetchError, ForecastParams, ForecastProvider, OpenMeteoClient, RawForecast};
pub use codec::{Locale, WeatherCondition, classify};
pub use config::Config;
pub use export::SnapshotExporter;
pub use insight::{InsightGenerator, OpenAiInsight, fallback_insight};
pub use model::{ForecastDay, Location, WeatherPayload, WeatherReading};
pub use pipeline::{CycleReport, CycleRunner, Pipeline, PipelineError};
pub use publisher::{AmqpConnector, QueuePublisher};
pub use scheduler::Scheduler;
