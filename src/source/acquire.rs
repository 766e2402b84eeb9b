//! Open-with-retry discovery of a partitioned dataset.
//!
//! The acquirer probes the configured partition as a bounded dataset. A
//! missing path, a failed listing, an empty listing or an unreadable footer
//! all mean the partition is not available yet; the acquirer then waits
//! according to its [`Backoff`] and tries again, forever, until the shutdown
//! token is cancelled.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use object_store::path::Path;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backoff::Backoff;
use super::reader::{LiveSource, is_data_file};
use crate::config::{FileOrdering, SourceConfig};
use crate::emit;
use crate::error::{ConfigError, ParquetReadSnafu, SourceError, SourceStorageSnafu};
use crate::metrics::events::{AcquireRetry, SourceAcquired};
use crate::partition::PartitionExtractor;
use crate::storage::StorageProviderRef;

/// Lifecycle of a source, published on a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireState {
    /// Waiting for the partition to become readable.
    Discovering {
        failed_attempts: u32,
        next_wait: Duration,
    },
    /// The partition is open as a live stream.
    Streaming,
    /// Shutdown was requested.
    Stopping,
    Stopped,
}

impl fmt::Display for AcquireState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireState::Discovering {
                failed_attempts, ..
            } => write!(f, "discovering (failed attempts: {failed_attempts})"),
            AcquireState::Streaming => write!(f, "streaming"),
            AcquireState::Stopping => write!(f, "stopping"),
            AcquireState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a probe did not yield a schema.
#[derive(Debug)]
enum Unavailable {
    Empty,
    Failed(SourceError),
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::Empty => write!(f, "no data files"),
            Unavailable::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Schema learned from one data file.
#[derive(Debug, Clone)]
pub struct Discovered {
    /// File schema followed by injected partition columns.
    pub schema: SchemaRef,
    pub partition_columns: Vec<String>,
    /// The file the schema was read from.
    pub sample: String,
}

/// Discovers a partition and opens it as a [`LiveSource`].
pub struct Acquirer {
    job: String,
    storage: StorageProviderRef,
    prefix: Option<String>,
    ordering: FileOrdering,
    max_files_per_trigger: usize,
    backoff: Backoff,
    state: Arc<watch::Sender<AcquireState>>,
}

impl Acquirer {
    /// Create an acquirer over `storage`, which must be rooted at the
    /// dataset base path.
    pub fn new(
        job: impl Into<String>,
        storage: StorageProviderRef,
        config: &SourceConfig,
    ) -> Result<Self, ConfigError> {
        let prefix = config
            .night()?
            .map(|night| config.layout.path_for(&night));
        let backoff = Backoff::from(&config.backoff);
        let (state, _) = watch::channel(AcquireState::Discovering {
            failed_attempts: 0,
            next_wait: backoff.peek(),
        });

        Ok(Self {
            job: job.into(),
            storage,
            prefix,
            ordering: config.ordering,
            max_files_per_trigger: config.max_files_per_trigger,
            backoff,
            state: Arc::new(state),
        })
    }

    /// Partition directory below the base path, if a night is configured.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Lifecycle updates. The receiver stays valid after the source opens.
    pub fn subscribe(&self) -> watch::Receiver<AcquireState> {
        self.state.subscribe()
    }

    /// Probe the partition once.
    pub async fn probe(&self) -> Result<Option<Discovered>, SourceError> {
        match self.try_probe().await {
            Ok(discovered) => Ok(Some(discovered)),
            Err(Unavailable::Empty) => Ok(None),
            Err(Unavailable::Failed(e)) => Err(e),
        }
    }

    async fn try_probe(&self) -> Result<Discovered, Unavailable> {
        let files = self
            .storage
            .list_files(self.prefix.as_deref())
            .await
            .context(SourceStorageSnafu)
            .map_err(Unavailable::Failed)?;

        let newest = files
            .into_iter()
            .filter(|f| is_data_file(&f.path))
            .max_by(|a, b| {
                a.last_modified
                    .cmp(&b.last_modified)
                    .then_with(|| a.path.cmp(&b.path))
            })
            .ok_or(Unavailable::Empty)?;

        let bytes = self
            .storage
            .get(&Path::from(newest.path.as_str()))
            .await
            .context(SourceStorageSnafu)
            .map_err(Unavailable::Failed)?;
        let file_schema = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .context(ParquetReadSnafu { path: &newest.path })
            .map_err(Unavailable::Failed)?
            .schema()
            .clone();

        let partition_columns: Vec<String> = PartitionExtractor::all()
            .keys(&newest.path)
            .into_iter()
            .filter(|key| file_schema.field_with_name(key).is_err())
            .collect();

        let mut fields: Vec<Arc<Field>> = file_schema.fields().iter().cloned().collect();
        fields.extend(
            partition_columns
                .iter()
                .map(|name| Arc::new(Field::new(name, DataType::Utf8, true))),
        );

        Ok(Discovered {
            schema: Arc::new(Schema::new_with_metadata(
                fields,
                file_schema.metadata().clone(),
            )),
            partition_columns,
            sample: newest.path,
        })
    }

    /// Retry until the partition is readable or `shutdown` is cancelled.
    ///
    /// Returns `None` only when cancelled.
    pub async fn acquire(mut self, shutdown: &CancellationToken) -> Option<LiveSource> {
        self.backoff.reset();

        loop {
            if shutdown.is_cancelled() {
                return self.stop();
            }

            let reason = match self.try_probe().await {
                Ok(discovered) => return Some(self.open(discovered)),
                Err(reason) => reason,
            };

            let attempt = self.backoff.attempts() + 1;
            let wait = self.backoff.next_delay();
            self.state.send_replace(AcquireState::Discovering {
                failed_attempts: attempt,
                next_wait: wait,
            });

            info!(
                target = %self.job,
                partition = self.prefix.as_deref().unwrap_or("/"),
                attempt,
                wait_secs = wait.as_secs_f64(),
                reason = %reason,
                "Partition not available yet, retrying"
            );
            emit!(AcquireRetry {
                job: self.job.clone(),
                wait,
            });

            if shutdown
                .run_until_cancelled(tokio::time::sleep(wait))
                .await
                .is_none()
            {
                info!(target = %self.job, "Shutdown requested during discovery backoff");
                return self.stop();
            }
        }
    }

    fn open(self, discovered: Discovered) -> LiveSource {
        let attempts = u64::from(self.backoff.attempts()) + 1;
        info!(
            target = %self.job,
            partition = self.prefix.as_deref().unwrap_or("/"),
            sample = %discovered.sample,
            columns = discovered.schema.fields().len(),
            attempts,
            "Partition available, streaming"
        );
        emit!(SourceAcquired {
            job: self.job.clone(),
            attempts,
        });

        self.state.send_replace(AcquireState::Streaming);
        LiveSource::new(
            self.storage,
            self.prefix,
            discovered.schema,
            discovered.partition_columns,
            self.ordering,
            self.max_files_per_trigger,
            self.state,
        )
    }

    fn stop(self) -> Option<LiveSource> {
        self.state.send_replace(AcquireState::Stopping);
        debug!(target = %self.job, "Acquisition cancelled");
        self.state.send_replace(AcquireState::Stopped);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffConfig, ParquetCompression};
    use crate::partition::PartitionLayout;
    use crate::sink::encode_parquet;
    use crate::storage::StorageProvider;
    use arrow::array::{ArrayRef, Int64Array, RecordBatch};
    use object_store::PutPayload;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SourceConfig {
        SourceConfig {
            path: dir.path().to_str().unwrap().to_string(),
            night: Some("20240115".to_string()),
            layout: PartitionLayout::Hive,
            ordering: FileOrdering::LatestFirst,
            max_files_per_trigger: 10,
            backoff: BackoffConfig {
                initial_secs: 0.01,
                factor: 1.2,
                max_secs: 0.05,
            },
            storage_options: HashMap::new(),
        }
    }

    async fn acquirer(dir: &TempDir) -> Acquirer {
        let config = config(dir);
        let storage = StorageProvider::shared(&config.path, HashMap::new())
            .await
            .unwrap();
        Acquirer::new("test", storage, &config).unwrap()
    }

    async fn write_file(dir: &TempDir, path: &str, bytes: bytes::Bytes) {
        let storage = StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap();
        storage
            .put_payload(&Path::from(path), PutPayload::from(bytes))
            .await
            .unwrap();
    }

    fn alerts() -> bytes::Bytes {
        let batch = RecordBatch::try_from_iter(vec![(
            "candid",
            Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
        )])
        .unwrap();
        encode_parquet(batch.schema(), &[batch], ParquetCompression::Snappy).unwrap()
    }

    #[tokio::test]
    async fn test_probe_learns_schema_and_partitions() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "year=2024/month=01/day=15/part-0.parquet", alerts()).await;

        let acquirer = acquirer(&dir).await;
        assert_eq!(acquirer.prefix(), Some("year=2024/month=01/day=15"));

        let discovered = acquirer.probe().await.unwrap().unwrap();
        let names: Vec<&str> = discovered
            .schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, ["candid", "year", "month", "day"]);
        assert_eq!(discovered.partition_columns, ["year", "month", "day"]);
    }

    #[tokio::test]
    async fn test_probe_treats_missing_partition_as_empty() {
        let dir = TempDir::new().unwrap();
        let acquirer = acquirer(&dir).await;
        assert!(acquirer.probe().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_probe_reports_unreadable_footer() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "year=2024/month=01/day=15/part-0.parquet",
            bytes::Bytes::from_static(b"not parquet"),
        )
        .await;
        let acquirer = acquirer(&dir).await;
        assert!(acquirer.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_returns_none() {
        let dir = TempDir::new().unwrap();
        let acquirer = acquirer(&dir).await;
        let mut state = acquirer.subscribe();

        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        assert!(acquirer.acquire(&shutdown).await.is_none());
        assert_eq!(*state.borrow_and_update(), AcquireState::Stopped);
    }

    #[tokio::test]
    async fn test_acquire_publishes_failed_attempts() {
        let dir = TempDir::new().unwrap();
        let acquirer = acquirer(&dir).await;
        let mut state = acquirer.subscribe();
        let shutdown = CancellationToken::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { acquirer.acquire(&shutdown).await })
        };

        state
            .wait_for(|s| {
                matches!(s, AcquireState::Discovering { failed_attempts, .. } if *failed_attempts >= 2)
            })
            .await
            .unwrap();

        write_file(&dir, "year=2024/month=01/day=15/part-0.parquet", alerts()).await;
        let live = task.await.unwrap().unwrap();
        assert_eq!(*state.borrow_and_update(), AcquireState::Streaming);
        assert_eq!(live.partition_columns(), ["year", "month", "day"]);
    }
}
