//! Error types for aurora using snafu.
//!
//! Each layer of the crate has its own error enum with context selectors.
//! Jobs surface a [`JobError`]; the binary surfaces a [`PipelineError`].

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error"))]
    GcsConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            StorageError::Io { source } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required path is empty.
    #[snafu(display("Job '{job}' has an empty {field}"))]
    EmptyPath { job: String, field: &'static str },

    /// The trigger interval must be positive.
    #[snafu(display("Job '{job}' has a zero trigger interval"))]
    ZeroTriggerInterval { job: String },

    /// The night string is not a valid YYYYMMDD date.
    #[snafu(display("Invalid night '{value}', expected YYYYMMDD"))]
    InvalidNight { value: String },

    /// Backoff settings are out of range.
    #[snafu(display("Job '{job}' has invalid backoff settings: {message}"))]
    InvalidBackoff { job: String, message: String },

    /// A distribution job declared no channels.
    #[snafu(display("Distribution job '{job}' must declare at least one channel"))]
    NoChannels { job: String },

    /// Two channels of one job share a name.
    #[snafu(display("Distribution job '{job}' declares channel '{channel}' more than once"))]
    DuplicateChannel { job: String, channel: String },

    /// No jobs were configured.
    #[snafu(display("Configuration must declare at least one job"))]
    NoJobs,

    /// Two jobs claim the same exclusive resource.
    #[snafu(display("Resource conflict: {message}"))]
    ResourceConflict { message: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Batch Errors ============

/// Errors raised while reshaping Arrow record batches.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BatchError {
    /// A column (or nested struct field) does not exist.
    #[snafu(display("Column '{path}' not found"))]
    MissingColumn { path: String },

    /// A dotted path traverses a column that is not a struct.
    #[snafu(display("Column '{path}' is not a struct"))]
    NotAStruct { path: String },

    /// A non-nullable column is absent from the data being conformed.
    #[snafu(display("Required column '{name}' is missing"))]
    RequiredColumnMissing { name: String },

    /// An Arrow kernel failed.
    #[snafu(display("Arrow operation failed"))]
    Arrow { source: arrow::error::ArrowError },
}

// ============ Source Errors ============

/// Errors that can occur while reading source files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Listing or fetching from storage failed.
    #[snafu(display("Source storage error"))]
    SourceStorage { source: StorageError },

    /// A Parquet file could not be decoded.
    #[snafu(display("Failed to read Parquet file {path}"))]
    ParquetRead {
        path: String,
        source: parquet::errors::ParquetError,
    },

    /// A record batch could not be decoded.
    #[snafu(display("Failed to decode record batch from {path}"))]
    ArrowRead {
        path: String,
        source: arrow::error::ArrowError,
    },

    /// A file could not be conformed to the learned schema.
    #[snafu(display("File {path} does not match the stream schema"))]
    Conform { path: String, source: BatchError },
}

// ============ Checkpoint Errors ============

/// Errors that can occur while loading or committing checkpoints.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CheckpointError {
    /// Storage error while reading or writing the checkpoint.
    #[snafu(display("Checkpoint storage error"))]
    CheckpointStorage { source: StorageError },

    /// Failed to serialize checkpoint state.
    #[snafu(display("Failed to serialize checkpoint"))]
    Serialize { source: serde_json::Error },

    /// Failed to parse a stored checkpoint.
    #[snafu(display("Failed to parse checkpoint at {location}"))]
    Deserialize {
        location: String,
        source: serde_json::Error,
    },

    /// The checkpoint location belongs to another job.
    #[snafu(display(
        "Checkpoint location {location} is owned by job '{owner}', refusing to use it for '{job}'"
    ))]
    OwnedByOtherJob {
        location: String,
        owner: String,
        job: String,
    },

    /// The stored checkpoint was written by an incompatible version.
    #[snafu(display("Unsupported checkpoint schema version {version}"))]
    UnsupportedVersion { version: u32 },

    /// A batch id that is not the next one in the lineage was committed.
    #[snafu(display("Batch {batch_id} cannot be committed, next batch is {expected}"))]
    OutOfOrderCommit { batch_id: u64, expected: u64 },
}

// ============ Sink Errors ============

/// Errors that can occur while writing Parquet output.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Failed to create the Arrow writer.
    #[snafu(display("Failed to create Parquet writer"))]
    WriterCreate {
        source: parquet::errors::ParquetError,
    },

    /// Failed to write or close a Parquet file.
    #[snafu(display("Failed to write Parquet data"))]
    Write {
        source: parquet::errors::ParquetError,
    },

    /// Failed to split a batch into partitions.
    #[snafu(display("Failed to partition output batch"))]
    Partition { source: BatchError },

    /// Failed to upload a finished file.
    #[snafu(display("Failed to upload {path}"))]
    Upload { path: String, source: StorageError },
}

// ============ Enrichment Errors ============

/// Errors raised by an enrichment stage.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EnrichError {
    /// The stage reported a failure.
    #[snafu(display("Enrichment stage '{stage}' failed: {message}"))]
    StageFailed { stage: String, message: String },

    /// The stage added or removed rows.
    #[snafu(display(
        "Enrichment stage '{stage}' changed the row count from {expected} to {actual}"
    ))]
    RowCountChanged {
        stage: String,
        expected: usize,
        actual: usize,
    },
}

// ============ Publish Errors ============

/// Errors that can occur while publishing to a channel.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    /// Failed to encode records for the channel.
    #[snafu(display("Failed to encode records for channel '{channel}'"))]
    Encode {
        channel: String,
        source: arrow::error::ArrowError,
    },

    /// Failed to deliver the payload.
    #[snafu(display("Failed to deliver records to channel '{channel}'"))]
    Deliver {
        channel: String,
        source: StorageError,
    },

    /// Failed to apply the channel filter.
    #[snafu(display("Failed to filter records for channel '{channel}'"))]
    Filter { channel: String, source: BatchError },
}

// ============ Index Errors ============

/// Errors raised by the index builder command.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IndexError {
    /// Failed to read the input file.
    #[snafu(display("Failed to read {path}"))]
    ReadInput {
        path: String,
        source: std::io::Error,
    },

    /// The input file is not valid Parquet.
    #[snafu(display("Failed to decode {path}"))]
    DecodeInput {
        path: String,
        source: parquet::errors::ParquetError,
    },

    /// A record batch in the input could not be decoded.
    #[snafu(display("Failed to decode a record batch"))]
    DecodeBatch { source: arrow::error::ArrowError },

    /// A required column is missing or has the wrong type.
    #[snafu(display("Input column '{name}' is missing or not a string column"))]
    InputColumn { name: String },

    /// Failed to build the output batch.
    #[snafu(display("Failed to build index batch"))]
    BuildBatch { source: arrow::error::ArrowError },

    /// Failed to write the output file.
    #[snafu(display("Failed to write index"))]
    WriteIndex { source: SinkError },

    /// Failed to persist the output file.
    #[snafu(display("Failed to write {path}"))]
    WriteOutput {
        path: String,
        source: std::io::Error,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to install Prometheus recorder.
    #[snafu(display("Failed to install Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Job Errors ============

/// Errors that end a running job.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// The job configuration is invalid.
    #[snafu(display("Job configuration error"))]
    JobConfig { source: ConfigError },

    /// Storage setup or access failed.
    #[snafu(display("Storage error"))]
    Storage { source: StorageError },

    /// Reading the live source failed.
    #[snafu(display("Source error"))]
    Source { source: SourceError },

    /// Checkpoint load or commit failed.
    #[snafu(display("Checkpoint error"))]
    Checkpoint { source: CheckpointError },

    /// Writing output failed.
    #[snafu(display("Sink error"))]
    Sink { source: SinkError },

    /// The enrichment stage failed or broke its contract.
    #[snafu(display("Enrichment error"))]
    Enrich { source: EnrichError },

    /// Reshaping a batch failed.
    #[snafu(display("Batch transformation error"))]
    Batch { source: BatchError },

    /// Publishing to a channel failed.
    #[snafu(display("Publish error"))]
    Publish { source: PublishError },

    /// An output stream of a distribution job failed.
    #[snafu(display("Output stream '{channel}' failed"))]
    StreamFailed {
        channel: String,
        #[snafu(source(from(JobError, Box::new)))]
        source: Box<JobError>,
    },

    /// Two output streams of one job share a name.
    #[snafu(display("Output stream '{channel}' is defined more than once"))]
    DuplicateStream { channel: String },

    /// Two output streams of one job share a checkpoint location.
    #[snafu(display("Output streams '{first}' and '{second}' share checkpoint '{location}'"))]
    SharedStreamCheckpoint {
        first: String,
        second: String,
        location: String,
    },

    /// An output stream task panicked.
    #[snafu(display("Output stream '{channel}' panicked"))]
    StreamPanicked {
        channel: String,
        source: tokio::task::JoinError,
    },
}

// ============ Pipeline Errors ============

/// Top-level errors reported by the binary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Failed to parse metrics address.
    #[snafu(display("Invalid metrics address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics initialization failed.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// The index command failed.
    #[snafu(display("Index error"))]
    Index { source: IndexError },

    /// One or more jobs ended with an error.
    #[snafu(display("{failed} job(s) failed"))]
    JobsFailed { failed: usize },
}

impl From<ConfigError> for JobError {
    fn from(source: ConfigError) -> Self {
        JobError::JobConfig { source }
    }
}

impl From<StorageError> for JobError {
    fn from(source: StorageError) -> Self {
        JobError::Storage { source }
    }
}

impl From<SourceError> for JobError {
    fn from(source: SourceError) -> Self {
        JobError::Source { source }
    }
}

impl From<CheckpointError> for JobError {
    fn from(source: CheckpointError) -> Self {
        JobError::Checkpoint { source }
    }
}

impl From<SinkError> for JobError {
    fn from(source: SinkError) -> Self {
        JobError::Sink { source }
    }
}

impl From<EnrichError> for JobError {
    fn from(source: EnrichError) -> Self {
        JobError::Enrich { source }
    }
}

impl From<BatchError> for JobError {
    fn from(source: BatchError) -> Self {
        JobError::Batch { source }
    }
}

impl From<PublishError> for JobError {
    fn from(source: PublishError) -> Self {
        JobError::Publish { source }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}
