//! Distribution of enriched alerts to downstream channels.
//!
//! A distribution job opens the enriched store with the same
//! discover-then-stream acquisition as ingest, strips broker-internal
//! columns and hands the remaining schema to a [`Router`]. Every
//! [`OutputStream`] it returns runs as an independent micro-batch loop with
//! its own checkpoint, so one channel can lag or be stopped without holding
//! back the others.

pub mod publisher;
pub mod router;

pub use publisher::{Publisher, PublisherRef, StoragePublisher, encode_ndjson};
pub use router::{ChannelRouter, OutputStream, RecordFilter, RouteContext, Router};

use async_trait::async_trait;
use futures::future::select_all;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::checkpoint::{BatchSummary, CheckpointManager};
use crate::columns::{drop_columns, drop_fields};
use crate::config::{DistributeConfig, JobKey};
use crate::emit;
use crate::error::{
    DuplicateStreamSnafu, FilterSnafu, JobError, SharedStreamCheckpointSnafu, StreamFailedSnafu,
    StreamPanickedSnafu,
};
use crate::metrics::events::{PendingFiles, RecordsPublished, RecordsRead};
use crate::pipeline::{BatchOutcome, MicroBatchProcessor, TriggerStats, run_trigger_loop};
use crate::source::{Acquirer, LiveSource};
use crate::storage::StorageProvider;

/// Enriched store to external channels.
pub struct DistributeJob {
    key: JobKey,
    config: DistributeConfig,
    trigger_interval: Duration,
    router: Arc<dyn Router>,
    shutdown: CancellationToken,
}

impl DistributeJob {
    pub fn new(
        key: JobKey,
        config: DistributeConfig,
        trigger_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key,
            config,
            trigger_interval,
            router: Arc::new(ChannelRouter),
            shutdown,
        }
    }

    /// Replace the routing collaborator.
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    /// Run until shutdown or until any output stream fails.
    pub async fn run(self) -> Result<(), JobError> {
        let job = self.key.id().to_string();
        let DistributeConfig {
            source,
            checkpoint,
            channels,
            strip_columns,
            ..
        } = &self.config;

        let storage = StorageProvider::shared(&source.path, source.storage_options.clone()).await?;
        let acquirer = Acquirer::new(job.clone(), storage, source)?;

        info!(
            target = %job,
            source = %source.path,
            channels = channels.streams.len(),
            "Starting distribution job"
        );

        let Some(live) = acquirer.acquire(&self.shutdown).await else {
            info!(target = %job, "Shutdown before the source became available");
            return Ok(());
        };

        let context = RouteContext {
            schema: drop_fields(&live.schema(), strip_columns),
            checkpoint_root: &checkpoint.path,
            checkpoint_options: &checkpoint.storage_options,
            trigger_interval: self.trigger_interval,
            channels,
        };
        let streams = self.router.routes(&context).await?;

        let running = start_streams(
            &job,
            &live,
            strip_columns,
            streams,
            self.trigger_interval,
            &self.shutdown,
        )
        .await?;
        let result = running.wait().await;

        live.mark_stopping();
        info!(target = %job, ok = result.is_ok(), "Distribution job stopping");
        live.mark_stopped();
        result
    }
}

/// Control over one running output stream.
#[derive(Debug)]
pub struct OutputStreamHandle {
    name: String,
    token: CancellationToken,
    task: JoinHandle<Result<TriggerStats, JobError>>,
}

impl OutputStreamHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop this stream after its current batch.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream to end.
    pub async fn join(self) -> Result<TriggerStats, JobError> {
        let channel = self.name;
        match self.task.await {
            Ok(result) => result.context(StreamFailedSnafu { channel }),
            Err(source) => Err(source).context(StreamPanickedSnafu { channel }),
        }
    }
}

/// The output streams of one distribution job.
#[derive(Debug)]
pub struct RunningStreams {
    handles: Vec<OutputStreamHandle>,
    token: CancellationToken,
}

impl RunningStreams {
    pub fn handles(&self) -> &[OutputStreamHandle] {
        &self.handles
    }

    pub fn handle(&self, name: &str) -> Option<&OutputStreamHandle> {
        self.handles.iter().find(|h| h.name == name)
    }

    /// Stop every stream.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for all streams. The first failure stops the remaining streams
    /// and is returned once they have ended.
    pub async fn wait(self) -> Result<(), JobError> {
        let mut pending: Vec<_> = self
            .handles
            .into_iter()
            .map(|handle| Box::pin(handle.join()))
            .collect();
        let mut failure = None;

        while !pending.is_empty() {
            let (result, _, rest) = select_all(pending).await;
            pending = rest;
            match result {
                Err(e) if failure.is_none() => {
                    error!(error = %e, "Output stream failed, stopping the remaining streams");
                    self.token.cancel();
                    failure = Some(e);
                }
                Err(e) => error!(error = %e, "Output stream failed"),
                Ok(_) => {}
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Open a checkpoint for every stream and spawn its trigger loop.
///
/// Stream `c` of job `j` owns the checkpoint under the job key `j/c`. All
/// streams run at `trigger_interval`. Streams must have distinct names and
/// distinct checkpoint locations; nothing is opened otherwise.
pub async fn start_streams(
    job: &str,
    source: &LiveSource,
    strip_columns: &[String],
    streams: Vec<OutputStream>,
    trigger_interval: Duration,
    shutdown: &CancellationToken,
) -> Result<RunningStreams, JobError> {
    ensure_exclusive(&streams)?;

    let token = shutdown.child_token();
    let mut processors = Vec::with_capacity(streams.len());

    for stream in streams {
        let storage =
            StorageProvider::shared(&stream.checkpoint, stream.checkpoint_options.clone()).await?;
        let stream_job = format!("{}/{}", job, stream.name);
        let checkpoint = CheckpointManager::open(storage, &stream_job).await?;
        info!(
            target = %stream_job,
            checkpoint = checkpoint.location(),
            next_batch = checkpoint.next_batch_id(),
            "Opened output stream"
        );
        processors.push(StreamProcessor {
            job: stream_job,
            channel: stream.name,
            source: source.clone(),
            checkpoint,
            strip_columns: strip_columns.to_vec(),
            filter: stream.filter,
            publisher: stream.publisher,
        });
    }

    let handles = processors
        .into_iter()
        .map(|mut processor| {
            let name = processor.channel.clone();
            let stream_token = token.child_token();
            let loop_token = stream_token.clone();
            let task = tokio::spawn(async move {
                let job = processor.job.clone();
                run_trigger_loop(&mut processor, trigger_interval, loop_token, &job).await
            });
            OutputStreamHandle {
                name,
                token: stream_token,
                task,
            }
        })
        .collect();

    Ok(RunningStreams { handles, token })
}

fn ensure_exclusive(streams: &[OutputStream]) -> Result<(), JobError> {
    let mut locations: HashMap<&str, &str> = HashMap::with_capacity(streams.len());
    for (i, stream) in streams.iter().enumerate() {
        ensure!(
            !streams[..i].iter().any(|s| s.name == stream.name),
            DuplicateStreamSnafu {
                channel: &stream.name
            }
        );
        let location = stream.checkpoint.trim_end_matches('/');
        if let Some(first) = locations.insert(location, &stream.name) {
            return SharedStreamCheckpointSnafu {
                first,
                second: &stream.name,
                location,
            }
            .fail();
        }
    }
    Ok(())
}

/// State of one output stream.
struct StreamProcessor {
    job: String,
    channel: String,
    source: LiveSource,
    checkpoint: CheckpointManager,
    strip_columns: Vec<String>,
    filter: RecordFilter,
    publisher: PublisherRef,
}

#[async_trait]
impl MicroBatchProcessor for StreamProcessor {
    type Error = JobError;

    async fn process_batch(&mut self) -> Result<BatchOutcome, JobError> {
        let started = Instant::now();
        let (files, pending) = self
            .source
            .pending(&self.checkpoint.state().consumed_files)
            .await?;
        if files.is_empty() {
            emit!(PendingFiles {
                job: self.job.clone(),
                count: 0,
            });
            return Ok(BatchOutcome::Idle);
        }

        let batch_id = self.checkpoint.next_batch_id();
        let raw = self.source.read(&files).await?;
        emit!(RecordsRead {
            job: self.job.clone(),
            count: raw.num_rows() as u64,
        });

        let stripped = drop_columns(&raw, &self.strip_columns)?;
        let selected = self.filter.apply(&stripped).context(FilterSnafu {
            channel: &self.channel,
        })?;
        let published = self
            .publisher
            .publish(&self.channel, batch_id, &selected)
            .await?;
        emit!(RecordsPublished {
            job: self.job.clone(),
            channel: self.channel.clone(),
            count: published as u64,
        });

        let summary = BatchSummary {
            files: files.len(),
            records_read: raw.num_rows(),
            records_rejected: raw.num_rows() - selected.num_rows(),
            records_written: published,
            output_files: usize::from(published > 0),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.checkpoint
            .commit(batch_id, files.into_iter().map(|f| f.path), summary.clone())
            .await?;

        emit!(PendingFiles {
            job: self.job.clone(),
            count: pending - summary.files,
        });
        info!(
            target = %self.job,
            batch_id,
            files = summary.files,
            read = summary.records_read,
            published = summary.records_written,
            "Batch published"
        );
        Ok(BatchOutcome::Processed)
    }
}
