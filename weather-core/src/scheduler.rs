//! Cooperative interval scheduler.
//!
//! Jobs run one at a time on the caller's task. A job that overruns its
//! interval simply makes the next due check fire late.

use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time::Instant};
use tracing::{error, info};

use crate::{config::ScheduleConfig, pipeline::CycleRunner};

#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub interval: Duration,
    pub include_insight: bool,
    next_due: Instant,
}

impl Job {
    pub fn next_due(&self) -> Instant {
        self.next_due
    }
}

pub struct Scheduler {
    runner: Arc<dyn CycleRunner>,
    jobs: Vec<Job>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CycleRunner>) -> Self {
        Self { runner, jobs: Vec::new(), tick: Duration::from_secs(1) }
    }

    /// The producer's two jobs: plain data every few minutes, data with
    /// insight every few hours.
    pub fn from_config(runner: Arc<dyn CycleRunner>, config: &ScheduleConfig) -> Self {
        let mut scheduler = Self::new(runner);
        scheduler.every("weather data", config.data_interval(), false);
        scheduler.every("weather data with insight", config.insight_interval(), true);
        scheduler
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Register a job; its first run is one `interval` from now. `run`
    /// re-bases this after the initial cycle.
    pub fn every(&mut self, name: &str, interval: Duration, include_insight: bool) -> &mut Self {
        self.jobs.push(Job {
            name: name.to_string(),
            interval,
            include_insight,
            next_due: Instant::now() + interval,
        });
        self
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Run every due job, in registration order. Returns how many ran.
    pub async fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        for index in 0..self.jobs.len() {
            if Instant::now() < self.jobs[index].next_due {
                continue;
            }

            let (name, include_insight) = {
                let job = &self.jobs[index];
                (job.name.clone(), job.include_insight)
            };
            run_job(self.runner.as_ref(), &name, include_insight).await;

            let job = &mut self.jobs[index];
            job.next_due = Instant::now() + job.interval;
            ran += 1;
        }
        ran
    }

    /// Every job becomes due one interval from the current instant.
    fn reschedule_from_now(&mut self) {
        let now = Instant::now();
        for job in &mut self.jobs {
            job.next_due = now + job.interval;
        }
    }

    /// Fire the initial insight run, then poll due jobs until `shutdown`
    /// changes or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        run_job(self.runner.as_ref(), "initial weather data with insight", true).await;
        self.reschedule_from_now();

        loop {
            self.run_pending().await;

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = shutdown.changed() => {
                    info!("Scheduler stopping");
                    break;
                }
            }
        }
    }
}

/// One cycle; failures are logged and swallowed so the loop keeps going.
async fn run_job(runner: &dyn CycleRunner, name: &str, include_insight: bool) {
    info!(job = name, include_insight, "Running job");
    match runner.run_cycle(include_insight).await {
        Ok(report) => info!(job = name, published = report.published, "Job finished"),
        Err(err) => error!(job = name, error = %err, "Error running job"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::FetchError,
        pipeline::{CycleReport, PipelineError},
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(bool, Instant)>>,
        fail: bool,
        insight_duration: Duration,
    }

    #[async_trait]
    impl CycleRunner for RecordingRunner {
        async fn run_cycle(&self, include_insight: bool) -> Result<CycleReport, PipelineError> {
            self.calls.lock().push((include_insight, Instant::now()));
            if include_insight {
                tokio::time::sleep(self.insight_duration).await;
            }
            if self.fail {
                return Err(FetchError::Transport("offline".into()).into());
            }
            Ok(CycleReport::default())
        }
    }

    fn flags(runner: &RecordingRunner) -> Vec<bool> {
        flags_of(&runner.calls.lock())
    }

    fn flags_of(calls: &[(bool, Instant)]) -> Vec<bool> {
        calls.iter().map(|(flag, _)| *flag).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn due_jobs_run_in_registration_order() {
        let runner = Arc::new(RecordingRunner::default());
        let mut scheduler = Scheduler::from_config(runner.clone(), &ScheduleConfig::default());

        assert_eq!(scheduler.run_pending().await, 0);

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(scheduler.run_pending().await, 1);
        assert_eq!(flags(&runner), vec![false]);

        // data job is overdue several times over but runs once, then insight
        tokio::time::advance(Duration::from_secs(55 * 60)).await;
        assert_eq!(scheduler.run_pending().await, 2);
        assert_eq!(flags(&runner), vec![false, false, true]);

        assert_eq!(scheduler.run_pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn next_due_counts_from_completion() {
        let runner = Arc::new(RecordingRunner::default());
        let mut scheduler = Scheduler::new(runner.clone());
        scheduler.every("data", Duration::from_secs(60), false);

        tokio::time::advance(Duration::from_secs(90)).await;
        scheduler.run_pending().await;

        let due = scheduler.jobs()[0].next_due();
        assert_eq!(due, Instant::now() + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_loop() {
        let runner = Arc::new(RecordingRunner { fail: true, ..Default::default() });
        let mut scheduler = Scheduler::new(runner.clone());
        scheduler.every("data", Duration::from_secs(60), false);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(60)).await;
            assert_eq!(scheduler.run_pending().await, 1);
        }
        assert_eq!(runner.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_fires_initial_insight_then_periodic_jobs() {
        let runner = Arc::new(RecordingRunner::default());
        let scheduler = Scheduler::from_config(runner.clone(), &ScheduleConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(5 * 60 + 30)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(flags(&runner), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_jobs_count_from_end_of_initial_run() {
        let runner = Arc::new(RecordingRunner {
            insight_duration: Duration::from_secs(120),
            ..Default::default()
        });
        let scheduler = Scheduler::from_config(runner.clone(), &ScheduleConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let started = Instant::now();

        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(419)).await;
        assert_eq!(flags(&runner), vec![true]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let calls = runner.calls.lock();
        assert_eq!(flags_of(&calls), vec![true, false]);
        assert_eq!(calls[1].1 - started, Duration::from_secs(420));
    }
}
