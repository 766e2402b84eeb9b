//! Job orchestration.
//!
//! Every configured job runs as its own tokio task. All jobs share one
//! cancellation token, cancelled on a shutdown signal or when the configured
//! maximum run duration elapses.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use snafu::prelude::*;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{Config, JobConfig, JobKey};
use crate::distribute::DistributeJob;
use crate::error::{AddressParseSnafu, JobError, JobsFailedSnafu, MetricsSnafu, PipelineError};
use crate::pipeline::IngestJob;
use crate::signal::shutdown_signal;

/// A self-contained unit of work run by the [`PipelineRunner`].
pub trait Pipeline: Send + 'static {
    type Key: Clone + Display + Send + 'static;
    type Error: std::error::Error + Send + 'static;

    fn key(&self) -> &Self::Key;

    /// Run to completion.
    fn run(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A configured job ready to run.
pub enum Job {
    Ingest(IngestJob),
    Distribute(DistributeJob),
}

impl Job {
    /// Build the job for `config`, observing `shutdown`.
    pub fn from_config(
        key: &JobKey,
        config: &JobConfig,
        trigger_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        match config {
            JobConfig::Ingest(c) => Job::Ingest(IngestJob::new(
                key.clone(),
                c.clone(),
                trigger_interval,
                shutdown,
            )),
            JobConfig::Distribute(c) => Job::Distribute(DistributeJob::new(
                key.clone(),
                c.clone(),
                trigger_interval,
                shutdown,
            )),
        }
    }
}

impl Pipeline for Job {
    type Key = JobKey;
    type Error = JobError;

    fn key(&self) -> &JobKey {
        match self {
            Job::Ingest(job) => job.key(),
            Job::Distribute(job) => job.key(),
        }
    }

    async fn run(self) -> Result<(), JobError> {
        match self {
            Job::Ingest(job) => job.run().await.map(|_| ()),
            Job::Distribute(job) => job.run().await,
        }
    }
}

/// Runs pipelines concurrently with jittered starts and shared shutdown.
pub struct PipelineRunner<P: Pipeline> {
    pipelines: Vec<P>,
    shutdown: CancellationToken,
    start_jitter_secs: u64,
}

impl<P: Pipeline> PipelineRunner<P> {
    pub fn new(pipelines: Vec<P>, shutdown: CancellationToken, start_jitter_secs: u64) -> Self {
        Self {
            pipelines,
            shutdown,
            start_jitter_secs,
        }
    }

    /// Cancel the shared token on SIGINT, SIGTERM or SIGQUIT.
    pub fn spawn_shutdown_handler(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    /// Cancel the shared token once `after` has elapsed.
    pub fn spawn_exit_timer(&self, after: Duration) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if shutdown
                .run_until_cancelled(tokio::time::sleep(after))
                .await
                .is_some()
            {
                info!(
                    exit_after_secs = after.as_secs(),
                    "Maximum run duration reached, stopping jobs"
                );
                shutdown.cancel();
            }
        });
    }

    /// Run every pipeline to completion. Returns the number that failed.
    pub async fn run(self) -> usize {
        let mut handles: JoinSet<(P::Key, Result<(), P::Error>)> = JoinSet::new();

        for pipeline in self.pipelines {
            let shutdown = self.shutdown.clone();
            let key = pipeline.key().clone();
            let start_jitter = random_jitter(self.start_jitter_secs);

            handles.spawn(async move {
                if !start_jitter.is_zero() {
                    info!(
                        target = %key,
                        jitter_ms = start_jitter.as_millis(),
                        "Delaying job start for jitter"
                    );
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(start_jitter))
                        .await
                        .is_none()
                    {
                        info!(target = %key, "Shutdown requested during jitter delay");
                        return (key, Ok(()));
                    }
                }

                let result = pipeline.run().await;
                (key, result)
            });
        }

        info!("Spawned {} job tasks", handles.len());

        let mut failed = 0;
        while let Some(result) = handles.join_next().await {
            match result {
                Ok((key, Ok(()))) => {
                    info!(target = %key, "Job completed");
                }
                Ok((key, Err(e))) => {
                    failed += 1;
                    error!(target = %key, error = %snafu::Report::from_error(&e), "Job failed");
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "Job task panicked");
                }
            }
        }

        info!(failed, "All jobs complete");
        failed
    }
}

/// Run every job of `config` until shutdown or until all have ended.
///
/// Starts the metrics endpoint when enabled. Fails if any job failed.
pub async fn run_pipelines(config: &Config) -> Result<(), PipelineError> {
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        crate::metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let shutdown = CancellationToken::new();
    let jobs: Vec<Job> = config
        .jobs()
        .map(|(key, job)| {
            Job::from_config(
                key,
                job,
                job.trigger_interval(&config.global),
                shutdown.clone(),
            )
        })
        .collect();

    let runner = PipelineRunner::new(jobs, shutdown, config.global.start_jitter_secs);
    runner.spawn_shutdown_handler();
    if let Some(after) = config.global.exit_after() {
        runner.spawn_exit_timer(after);
    }

    let failed = runner.run().await;
    ensure!(failed == 0, JobsFailedSnafu { failed });
    Ok(())
}

/// Random duration below `max_secs` seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
