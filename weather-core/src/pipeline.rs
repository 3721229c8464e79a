//! One fetch → publish → export cycle.

use anyhow::Context;
use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{
    aggregator::WeatherAggregator,
    client::{FetchError, OpenMeteoClient},
    config::Config,
    export::SnapshotExporter,
    insight::{InsightGenerator, OpenAiInsight},
    publisher::QueuePublisher,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What a completed cycle managed to deliver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub published: bool,
    pub csv: Option<PathBuf>,
    pub excel: Option<PathBuf>,
    pub insight: Option<String>,
}

#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, include_insight: bool) -> Result<CycleReport, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    aggregator: WeatherAggregator,
    publisher: QueuePublisher,
    exporter: SnapshotExporter,
}

impl Pipeline {
    pub fn new(
        aggregator: WeatherAggregator,
        publisher: QueuePublisher,
        exporter: SnapshotExporter,
    ) -> Self {
        Self { aggregator, publisher, exporter }
    }

    /// Production wiring: Open-Meteo with disk cache, optional OpenAI
    /// insight, RabbitMQ, and on-disk exports.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let provider = Arc::new(
            OpenMeteoClient::new(&config.forecast).context("Failed to build forecast client")?,
        );

        let insight = OpenAiInsight::from_config(&config.insight, config.locale)
            .context("Failed to build insight client")?
            .map(|generator| Arc::new(generator) as Arc<dyn InsightGenerator>);
        if insight.is_none() {
            warn!("OPENAI_API_KEY not set, insight runs will use the fallback text");
        }

        let aggregator = WeatherAggregator::new(config, provider, insight)?;
        let publisher = QueuePublisher::from_config(&config.broker)?;
        let exporter = SnapshotExporter::new(&config.export);

        Ok(Self::new(aggregator, publisher, exporter))
    }

    pub fn aggregator(&self) -> &WeatherAggregator {
        &self.aggregator
    }
}

#[async_trait]
impl CycleRunner for Pipeline {
    #[instrument(skip(self))]
    async fn run_cycle(&self, include_insight: bool) -> Result<CycleReport, PipelineError> {
        let payload = self.aggregator.build_payload(include_insight).await?;
        let json = payload.to_json()?;

        let published = self.publisher.publish_default(json.as_bytes()).await;
        if !published {
            warn!(queue = self.publisher.default_queue(), "Payload was not published");
        }

        // independent of each other and of the publish outcome
        let csv = self.exporter.export_csv(&json);
        let excel = self.exporter.export_excel(&json);

        info!(published, csv = csv.is_some(), excel = excel.is_some(), "Cycle finished");
        Ok(CycleReport { published, csv, excel, insight: payload.ai_insight })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{ForecastParams, ForecastProvider, RawForecast},
        config::ExportConfig,
        publisher::{
            ConnectRetry,
            tests::{Fail, FakeBroker},
        },
    };
    use std::{sync::atomic::Ordering, time::Duration};

    #[derive(Debug)]
    struct StaticProvider(Option<RawForecast>);

    #[async_trait]
    impl ForecastProvider for StaticProvider {
        async fn fetch(&self, _params: &ForecastParams) -> Result<RawForecast, FetchError> {
            self.0.clone().ok_or_else(|| FetchError::Transport("connection refused".into()))
        }
    }

    fn pipeline(
        raw: Option<RawForecast>,
        fail: Fail,
        dir: &std::path::Path,
    ) -> (Pipeline, Arc<crate::publisher::tests::Counters>) {
        let config = Config::default();
        let aggregator =
            WeatherAggregator::new(&config, Arc::new(StaticProvider(raw)), None).unwrap();
        let (broker, counters) = FakeBroker::new(fail);
        let publisher = QueuePublisher::new(
            broker,
            ConnectRetry { max_attempts: 2, delay: Duration::ZERO },
            "weather",
        );
        let exporter = SnapshotExporter::new(&ExportConfig {
            csv_dir: dir.join("csv"),
            excel_dir: dir.join("excel"),
        });
        (Pipeline::new(aggregator, publisher, exporter), counters)
    }

    #[tokio::test]
    async fn cycle_publishes_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, counters) =
            pipeline(Some(RawForecast::default()), Fail::Nothing, dir.path());

        let report = pipeline.run_cycle(false).await.unwrap();
        assert!(report.published);
        assert!(report.csv.as_ref().is_some_and(|p| p.exists()));
        assert!(report.excel.as_ref().is_some_and(|p| p.exists()));
        assert!(report.insight.is_none());

        let published = counters.published.lock();
        let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body["location"]["timezone"], "America/Sao_Paulo");
        assert!(body.get("aiInsight").is_none());
    }

    #[tokio::test]
    async fn broker_outage_does_not_stop_exports() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, counters) =
            pipeline(Some(RawForecast::default()), Fail::Connect, dir.path());

        let report = pipeline.run_cycle(true).await.unwrap();
        assert!(!report.published);
        assert!(report.csv.is_some());
        assert!(report.excel.is_some());
        assert!(report.insight.is_some());
        assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, counters) = pipeline(None, Fail::Nothing, dir.path());

        let err = pipeline.run_cycle(false).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)));
        assert_eq!(counters.connects.load(Ordering::SeqCst), 0);
    }
}
