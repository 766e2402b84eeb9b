//! Configuration for aurora jobs.
//!
//! A config file declares global cadence settings, the metrics endpoint and a
//! map of named jobs. Each job is either an `ingest` job (raw alerts to the
//! enriched science store) or a `distribute` job (science store to channels).
//!
//! ```yaml
//! global:
//!   trigger_interval_secs: 30
//!   exit_after_secs: 36000
//!
//! jobs:
//!   raw2science:
//!     kind: ingest
//!     source:
//!       path: s3://alerts/raw
//!       night: "${NIGHT}"
//!       layout: compact
//!     checkpoint:
//!       path: s3://alerts/science_checkpoint/${NIGHT}
//!     sink:
//!       path: s3://alerts/science
//! ```

mod job_key;
mod resource;
mod vars;

pub use job_key::JobKey;
pub use resource::Resource;
pub use vars::{InterpolationResult, interpolate};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::{
    ConfigError, DuplicateChannelSnafu, EmptyPathSnafu, InvalidBackoffSnafu, NoChannelsSnafu,
    NoJobsSnafu, ZeroTriggerIntervalSnafu,
};
use crate::partition::{Night, PartitionLayout};

/// Bytes in a megabyte.
pub const MB: usize = 1024 * 1024;

/// Default partition size used to size output files.
pub const DEFAULT_PARTITION_SIZE_MB: usize = 128;

/// Columns holding broker-internal latency stamps.
pub const BROKER_TIMESTAMP_COLUMNS: [&str; 3] = [
    "brokerEndProcessTimestamp",
    "brokerStartProcessTimestamp",
    "brokerIngestTimestamp",
];

/// Settings shared by every job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Wall-clock interval between micro-batch triggers.
    pub trigger_interval_secs: u64,
    /// Stop all jobs gracefully after this many seconds.
    #[serde(default)]
    pub exit_after_secs: Option<u64>,
    /// Maximum random delay before each job starts.
    #[serde(default)]
    pub start_jitter_secs: u64,
}

impl GlobalConfig {
    /// Maximum total run duration, if bounded.
    pub fn exit_after(&self) -> Option<Duration> {
        self.exit_after_secs.map(Duration::from_secs)
    }
}

/// Prometheus endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_true() -> bool {
    true
}

/// Order in which pending source files are consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOrdering {
    /// Newest files first. Used to catch up on the live edge of a night.
    #[default]
    LatestFirst,
    /// Oldest files first.
    OldestFirst,
}

/// Retry policy while waiting for a partition to appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_wait")]
    pub initial_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
    #[serde(default = "default_max_wait")]
    pub max_secs: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_initial_wait(),
            factor: default_backoff_factor(),
            max_secs: default_max_wait(),
        }
    }
}

fn default_initial_wait() -> f64 {
    5.0
}

fn default_backoff_factor() -> f64 {
    1.2
}

fn default_max_wait() -> f64 {
    60.0
}

/// Partitioned input dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base path of the dataset (local, `file://`, `s3://`, `gs://`).
    pub path: String,
    /// Night to read, as `YYYYMMDD`. Reads the whole base path when absent.
    #[serde(default)]
    pub night: Option<String>,
    /// How the night maps to a sub-directory of the base path.
    #[serde(default)]
    pub layout: PartitionLayout,
    #[serde(default)]
    pub ordering: FileOrdering,
    /// Upper bound on files consumed by one micro-batch.
    #[serde(default = "default_max_files_per_trigger")]
    pub max_files_per_trigger: usize,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_max_files_per_trigger() -> usize {
    1000
}

impl SourceConfig {
    /// Parsed night, if configured.
    pub fn night(&self) -> Result<Option<Night>, ConfigError> {
        self.night.as_deref().map(Night::parse).transpose()
    }

    /// Full URL of the partition this source reads.
    pub fn partition_url(&self) -> Result<String, ConfigError> {
        let base = self.path.trim_end_matches('/');
        Ok(match self.night()? {
            Some(night) => format!("{}/{}", base, self.layout.path_for(&night)),
            None => base.to_string(),
        })
    }
}

/// Durable progress location of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub path: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

/// Append-only partitioned Parquet output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub path: String,
    /// Partition columns. Defaults depend on the input shape.
    #[serde(default)]
    pub partition_by: Option<Vec<String>>,
    /// Target size of each output file.
    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: usize,
    #[serde(default)]
    pub compression: ParquetCompression,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_file_size_mb() -> usize {
    DEFAULT_PARTITION_SIZE_MB
}

/// Shape of the records entering an ingest job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputShape {
    /// Survey alerts with a `candidate` struct and JD timestamps.
    #[default]
    Primary,
    /// Simulated alerts with a `diaSource` struct and MJD timestamps.
    Alternate,
}

impl InputShape {
    /// Partition columns used when the sink does not name any.
    pub fn default_partition_by(&self) -> Vec<String> {
        match self {
            InputShape::Primary => Vec::new(),
            InputShape::Alternate => vec!["year".into(), "month".into(), "day".into()],
        }
    }
}

/// Per-record quality filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateConfig {
    /// Whether the gate runs. Defaults to on for primary input, off otherwise.
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default = "default_defect_column")]
    pub defect_column: String,
    #[serde(default = "default_score_column")]
    pub score_column: String,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            defect_column: default_defect_column(),
            score_column: default_score_column(),
            min_score: default_min_score(),
        }
    }
}

impl QualityGateConfig {
    pub fn is_enabled(&self, shape: InputShape) -> bool {
        self.enabled.unwrap_or(shape == InputShape::Primary)
    }
}

fn default_defect_column() -> String {
    "candidate.nbad".to_string()
}

fn default_score_column() -> String {
    "candidate.rb".to_string()
}

fn default_min_score() -> f64 {
    0.55
}

/// Software version tags stamped on every enriched record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionTags {
    #[serde(default = "default_broker_version")]
    pub broker: String,
    #[serde(default = "default_science_version")]
    pub science: String,
    #[serde(default = "default_publisher")]
    pub publisher: String,
}

impl Default for VersionTags {
    fn default() -> Self {
        Self {
            broker: default_broker_version(),
            science: default_science_version(),
            publisher: default_publisher(),
        }
    }
}

fn default_broker_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_science_version() -> String {
    "unknown".to_string()
}

fn default_publisher() -> String {
    "Fink".to_string()
}

/// Ingest job: raw alerts to the enriched, partitioned science store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub checkpoint: CheckpointConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub shape: InputShape,
    #[serde(default)]
    pub quality_gate: QualityGateConfig,
    /// Passed to the enrichment stage; `false` skips science modules.
    #[serde(default = "default_true")]
    pub science: bool,
    #[serde(default)]
    pub versions: VersionTags,
    /// Overrides the global trigger interval.
    #[serde(default)]
    pub trigger_interval_secs: Option<u64>,
}

impl IngestConfig {
    /// Partition columns of the output.
    pub fn partition_by(&self) -> Vec<String> {
        self.sink
            .partition_by
            .clone()
            .unwrap_or_else(|| self.shape.default_partition_by())
    }
}

/// Record filter of a channel: keep rows whose column equals one of the values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFilterConfig {
    /// Column name, or a dotted path into a struct column.
    pub column: String,
    pub equals: Vec<String>,
}

/// One named outgoing channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub filter: Option<ChannelFilterConfig>,
}

/// Destination and credentials shared by all channels of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    pub path: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
    pub streams: Vec<ChannelConfig>,
}

/// Distribute job: science store to external channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributeConfig {
    pub source: SourceConfig,
    /// Root under which each channel keeps its own checkpoint.
    pub checkpoint: CheckpointConfig,
    pub channels: ChannelsConfig,
    /// Columns removed before publishing. Missing columns are ignored.
    #[serde(default = "default_strip_columns")]
    pub strip_columns: Vec<String>,
    #[serde(default)]
    pub trigger_interval_secs: Option<u64>,
}

fn default_strip_columns() -> Vec<String> {
    BROKER_TIMESTAMP_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .collect()
}

/// A configured job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobConfig {
    Ingest(IngestConfig),
    Distribute(DistributeConfig),
}

impl JobConfig {
    pub fn source(&self) -> &SourceConfig {
        match self {
            JobConfig::Ingest(c) => &c.source,
            JobConfig::Distribute(c) => &c.source,
        }
    }

    pub fn checkpoint(&self) -> &CheckpointConfig {
        match self {
            JobConfig::Ingest(c) => &c.checkpoint,
            JobConfig::Distribute(c) => &c.checkpoint,
        }
    }

    /// Effective trigger interval, falling back to the global one.
    pub fn trigger_interval(&self, global: &GlobalConfig) -> Duration {
        let override_secs = match self {
            JobConfig::Ingest(c) => c.trigger_interval_secs,
            JobConfig::Distribute(c) => c.trigger_interval_secs,
        };
        Duration::from_secs(override_secs.unwrap_or(global.trigger_interval_secs))
    }

    /// Resources this job needs exclusive access to.
    pub fn resources(&self) -> Vec<Resource> {
        vec![Resource::checkpoint(&self.checkpoint().path)]
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobConfig::Ingest(_) => "ingest",
            JobConfig::Distribute(_) => "distribute",
        }
    }
}

/// Main configuration for aurora.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub jobs: IndexMap<JobKey, JobConfig>,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: Config = serde_yaml::from_str(&result.text)
            .map_err(|source| ConfigError::YamlParse { source })?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.jobs.is_empty(), NoJobsSnafu);

        for (key, job) in &self.jobs {
            let job_name = key.id();

            ensure!(
                !job.trigger_interval(&self.global).is_zero(),
                ZeroTriggerIntervalSnafu { job: job_name }
            );
            ensure!(
                !job.source().path.is_empty(),
                EmptyPathSnafu {
                    job: job_name,
                    field: "source path"
                }
            );
            ensure!(
                !job.checkpoint().path.is_empty(),
                EmptyPathSnafu {
                    job: job_name,
                    field: "checkpoint path"
                }
            );
            job.source().night()?;
            validate_backoff(job_name, &job.source().backoff)?;

            match job {
                JobConfig::Ingest(ingest) => {
                    ensure!(
                        !ingest.sink.path.is_empty(),
                        EmptyPathSnafu {
                            job: job_name,
                            field: "sink path"
                        }
                    );
                }
                JobConfig::Distribute(distribute) => {
                    ensure!(
                        !distribute.channels.path.is_empty(),
                        EmptyPathSnafu {
                            job: job_name,
                            field: "channels path"
                        }
                    );
                    ensure!(
                        !distribute.channels.streams.is_empty(),
                        NoChannelsSnafu { job: job_name }
                    );
                    let mut seen = HashSet::new();
                    for channel in &distribute.channels.streams {
                        ensure!(
                            seen.insert(channel.name.as_str()),
                            DuplicateChannelSnafu {
                                job: job_name,
                                channel: channel.name.clone()
                            }
                        );
                    }
                }
            }
        }

        let conflicts = Resource::conflicts(
            self.jobs
                .iter()
                .map(|(key, job)| (key.id(), job.resources())),
        );

        if !conflicts.is_empty() {
            let message = conflicts
                .iter()
                .map(|(resource, jobs)| format!("{} claimed by: {:?}", resource, jobs))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ConfigError::ResourceConflict { message });
        }

        Ok(())
    }

    /// Iterate over all jobs with their keys.
    pub fn jobs(&self) -> impl Iterator<Item = (&JobKey, &JobConfig)> {
        self.jobs.iter()
    }
}

fn validate_backoff(job: &str, backoff: &BackoffConfig) -> Result<(), ConfigError> {
    let message = if !(backoff.initial_secs > 0.0) {
        "initial_secs must be positive"
    } else if !(backoff.factor >= 1.0) {
        "factor must be at least 1.0"
    } else if !(backoff.max_secs >= backoff.initial_secs) {
        "max_secs must be at least initial_secs"
    } else {
        return Ok(());
    };

    InvalidBackoffSnafu { job, message }.fail()
}
