//! Ingest micro-batch pipeline.
//!
//! An ingest job discovers its input partition, then on every trigger:
//!
//! 1. reads the source files not yet in the checkpoint,
//! 2. stamps ingress time and version tags,
//! 3. applies the quality gate,
//! 4. runs the enrichment stage,
//! 5. stamps egress time (or date partitions for alternate input),
//! 6. appends the result to the partitioned sink and commits the checkpoint.
//!
//! Output is written before the checkpoint, so delivery is at-least-once:
//! a crash in between replays the batch on restart.

pub mod enrich;
pub mod quality;
pub mod shape;
pub mod trigger;

pub use enrich::{EnrichOptions, Enricher, EnricherRef, PassthroughEnricher, enrich_checked};
pub use quality::{GateOutcome, QualityGate};
pub use trigger::{BatchOutcome, MicroBatchProcessor, TriggerStats, run_trigger_loop};

use arrow::array::RecordBatch;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::checkpoint::{BatchSummary, CheckpointManager};
use crate::config::{IngestConfig, InputShape, JobKey, VersionTags};
use crate::emit;
use crate::error::JobError;
use crate::metrics::events::{PendingFiles, RecordsRead, RecordsRejected, RecordsWritten};
use crate::sink::PartitionedWriter;
use crate::source::{Acquirer, LiveSource};
use crate::storage::StorageProvider;

use shape::{BROKER_END_COLUMN, BROKER_START_COLUMN};

/// Raw alerts to the enriched science store.
pub struct IngestJob {
    key: JobKey,
    config: IngestConfig,
    trigger_interval: Duration,
    enricher: EnricherRef,
    shutdown: CancellationToken,
}

impl IngestJob {
    pub fn new(
        key: JobKey,
        config: IngestConfig,
        trigger_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key,
            config,
            trigger_interval,
            enricher: Arc::new(PassthroughEnricher),
            shutdown,
        }
    }

    /// Replace the enrichment stage.
    pub fn with_enricher(mut self, enricher: EnricherRef) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    /// Run until shutdown. Returns without error if shutdown arrives while
    /// the input partition is still being discovered.
    pub async fn run(self) -> Result<TriggerStats, JobError> {
        let job = self.key.id().to_string();
        let IngestConfig {
            source,
            checkpoint,
            sink,
            shape,
            quality_gate,
            science,
            versions,
            ..
        } = &self.config;

        let checkpoint_storage =
            StorageProvider::shared(&checkpoint.path, checkpoint.storage_options.clone()).await?;
        let checkpoint = CheckpointManager::open(checkpoint_storage, &job).await?;

        let sink_storage = StorageProvider::shared(&sink.path, sink.storage_options.clone()).await?;
        let writer = PartitionedWriter::new(
            sink_storage,
            self.config.partition_by(),
            sink.file_size_mb,
            sink.compression,
            job.clone(),
        );

        let source_storage =
            StorageProvider::shared(&source.path, source.storage_options.clone()).await?;
        let acquirer = Acquirer::new(job.clone(), source_storage, source)?;

        info!(
            target = %job,
            source = %source.path,
            sink = %sink.path,
            lineage = checkpoint.lineage(),
            next_batch = checkpoint.next_batch_id(),
            "Starting ingest job"
        );

        let Some(live) = acquirer.acquire(&self.shutdown).await else {
            info!(target = %job, "Shutdown before the source became available");
            return Ok(TriggerStats::default());
        };

        let mut processor = IngestProcessor {
            job: job.clone(),
            source: live,
            checkpoint,
            writer,
            gate: quality_gate
                .is_enabled(*shape)
                .then(|| QualityGate::from(quality_gate)),
            enricher: self.enricher.clone(),
            options: EnrichOptions {
                with_science: *science,
            },
            shape: *shape,
            versions: versions.clone(),
        };

        let result = run_trigger_loop(
            &mut processor,
            self.trigger_interval,
            self.shutdown.clone(),
            &job,
        )
        .await;

        processor.source.mark_stopping();
        info!(
            target = %job,
            last_committed_batch = ?processor.checkpoint.last_batch_id(),
            "Ingest job stopping"
        );
        processor.source.mark_stopped();
        result
    }
}

/// State of a running ingest job.
struct IngestProcessor {
    job: String,
    source: LiveSource,
    checkpoint: CheckpointManager,
    writer: PartitionedWriter,
    gate: Option<QualityGate>,
    enricher: EnricherRef,
    options: EnrichOptions,
    shape: InputShape,
    versions: VersionTags,
}

impl IngestProcessor {
    /// Apply every per-batch transformation to freshly read records.
    async fn transform(&self, batch: RecordBatch) -> Result<(RecordBatch, usize), JobError> {
        let mut batch = batch;
        if self.shape == InputShape::Primary {
            batch = shape::stamp_now(&batch, BROKER_START_COLUMN)?;
        }
        batch = shape::add_version_tags(&batch, &self.versions)?;

        let mut rejected = 0;
        if let Some(gate) = &self.gate {
            let outcome = gate.apply(&batch)?;
            rejected = outcome.rejected;
            batch = outcome.batch;
            if rejected > 0 {
                debug!(target = %self.job, rejected, kept = batch.num_rows(), "Quality gate applied");
                emit!(RecordsRejected {
                    job: self.job.clone(),
                    count: rejected as u64,
                });
            }
        }

        batch = enrich_checked(self.enricher.as_ref(), batch, self.options).await?;

        batch = match self.shape {
            InputShape::Primary => shape::stamp_now(&batch, BROKER_END_COLUMN)?,
            InputShape::Alternate => shape::ensure_date_parts(&shape::ensure_timestamp(&batch)?)?,
        };
        Ok((batch, rejected))
    }
}

#[async_trait]
impl MicroBatchProcessor for IngestProcessor {
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
        let records_read = raw.num_rows();
        emit!(RecordsRead {
            job: self.job.clone(),
            count: records_read as u64,
        });

        let (batch, rejected) = self.transform(raw).await?;
        let written = self.writer.write(batch_id, &batch).await?;
        emit!(RecordsWritten {
            job: self.job.clone(),
            count: batch.num_rows() as u64,
        });

        let summary = BatchSummary {
            files: files.len(),
            records_read,
            records_rejected: rejected,
            records_written: batch.num_rows(),
            output_files: written.len(),
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
            rejected = summary.records_rejected,
            written = summary.records_written,
            "Batch committed"
        );
        Ok(BatchOutcome::Processed)
    }
}
