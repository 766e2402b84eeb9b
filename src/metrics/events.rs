//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a job. Events
//! implement [`InternalEvent`], which records the matching Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Records decoded from source files in one batch.
pub struct RecordsRead {
    pub job: String,
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(job = %self.job, count = self.count, "Records read");
        counter!("aurora_records_read_total", "job" => self.job).increment(self.count);
    }
}

/// Records dropped by the quality gate in one batch.
pub struct RecordsRejected {
    pub job: String,
    pub count: u64,
}

impl InternalEvent for RecordsRejected {
    fn emit(self) {
        trace!(job = %self.job, count = self.count, "Records rejected");
        counter!("aurora_records_rejected_total", "job" => self.job).increment(self.count);
    }
}

/// Records appended to the output store.
pub struct RecordsWritten {
    pub job: String,
    pub count: u64,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(job = %self.job, count = self.count, "Records written");
        counter!("aurora_records_written_total", "job" => self.job).increment(self.count);
    }
}

/// A Parquet file was uploaded.
pub struct FileWritten {
    pub job: String,
    pub bytes: u64,
}

impl InternalEvent for FileWritten {
    fn emit(self) {
        trace!(job = %self.job, bytes = self.bytes, "File written");
        counter!("aurora_files_written_total", "job" => self.job.clone()).increment(1);
        counter!("aurora_bytes_written_total", "job" => self.job).increment(self.bytes);
    }
}

/// Records delivered to one channel.
pub struct RecordsPublished {
    pub job: String,
    pub channel: String,
    pub count: u64,
}

impl InternalEvent for RecordsPublished {
    fn emit(self) {
        trace!(job = %self.job, channel = %self.channel, count = self.count, "Records published");
        counter!(
            "aurora_records_published_total",
            "job" => self.job,
            "channel" => self.channel
        )
        .increment(self.count);
    }
}

/// Outcome of a triggered micro-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcomeType {
    Processed,
    Idle,
}

impl BatchOutcomeType {
    fn as_str(&self) -> &'static str {
        match self {
            BatchOutcomeType::Processed => "processed",
            BatchOutcomeType::Idle => "idle",
        }
    }
}

/// A micro-batch trigger completed.
pub struct BatchCompleted {
    pub job: String,
    pub outcome: BatchOutcomeType,
    pub duration: Duration,
}

impl InternalEvent for BatchCompleted {
    fn emit(self) {
        trace!(
            job = %self.job,
            outcome = self.outcome.as_str(),
            duration_ms = self.duration.as_millis(),
            "Batch completed"
        );
        counter!(
            "aurora_batches_total",
            "job" => self.job.clone(),
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
        histogram!("aurora_batch_duration_seconds", "job" => self.job)
            .record(self.duration.as_secs_f64());
    }
}

/// A batch ran longer than the trigger interval.
pub struct TriggerOverrun {
    pub job: String,
    pub overrun: Duration,
}

impl InternalEvent for TriggerOverrun {
    fn emit(self) {
        trace!(job = %self.job, overrun_ms = self.overrun.as_millis(), "Trigger overrun");
        counter!("aurora_trigger_overruns_total", "job" => self.job).increment(1);
    }
}

/// The source partition was not available yet.
pub struct AcquireRetry {
    pub job: String,
    pub wait: Duration,
}

impl InternalEvent for AcquireRetry {
    fn emit(self) {
        trace!(job = %self.job, wait_secs = self.wait.as_secs_f64(), "Acquire retry");
        counter!("aurora_acquire_retries_total", "job" => self.job.clone()).increment(1);
        gauge!("aurora_acquire_wait_seconds", "job" => self.job).set(self.wait.as_secs_f64());
    }
}

/// The source partition was opened as a live stream.
pub struct SourceAcquired {
    pub job: String,
    pub attempts: u64,
}

impl InternalEvent for SourceAcquired {
    fn emit(self) {
        trace!(job = %self.job, attempts = self.attempts, "Source acquired");
        counter!("aurora_sources_acquired_total", "job" => self.job.clone()).increment(1);
        gauge!("aurora_acquire_wait_seconds", "job" => self.job).set(0.0);
    }
}

/// A checkpoint was committed.
pub struct CheckpointCommitted {
    pub job: String,
    pub batch_id: u64,
}

impl InternalEvent for CheckpointCommitted {
    fn emit(self) {
        trace!(job = %self.job, batch_id = self.batch_id, "Checkpoint committed");
        counter!("aurora_checkpoints_committed_total", "job" => self.job.clone()).increment(1);
        gauge!("aurora_last_committed_batch", "job" => self.job).set(self.batch_id as f64);
    }
}

/// Source files waiting to be consumed after a batch.
pub struct PendingFiles {
    pub job: String,
    pub count: usize,
}

impl InternalEvent for PendingFiles {
    fn emit(self) {
        trace!(job = %self.job, count = self.count, "Pending files");
        gauge!("aurora_pending_files", "job" => self.job).set(self.count as f64);
    }
}

/// Storage operation type.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
    Rename,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::Rename => "rename",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// A storage request completed.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "aurora_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "aurora_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_emit_without_recorder() {
        InternalEvent::emit(BatchCompleted {
            job: "raw2science".into(),
            outcome: BatchOutcomeType::Idle,
            duration: Duration::from_millis(5),
        });
        InternalEvent::emit(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::Error,
            duration: Duration::ZERO,
        });
    }

    #[test]
    fn test_label_values() {
        assert_eq!(BatchOutcomeType::Processed.as_str(), "processed");
        assert_eq!(StorageOperation::Rename.as_str(), "rename");
        assert_eq!(RequestStatus::Success.as_str(), "success");
    }
}
