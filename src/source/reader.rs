//! Unbounded reader over a partitioned Parquet dataset.
//!
//! A [`LiveSource`] is created once the acquirer has learned the dataset
//! schema. Every trigger it lists the files that have not been consumed yet
//! and reads them conformed to that schema, injecting Hive partition columns
//! found in each file's path.

use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use object_store::path::Path;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::acquire::AcquireState;
use crate::columns::{conform, with_column};
use crate::config::FileOrdering;
use crate::error::{
    ArrowReadSnafu, ConformSnafu, ParquetReadSnafu, SourceError, SourceStorageSnafu,
};
use crate::partition::PartitionExtractor;
use crate::storage::{ListedFile, StorageProviderRef};

const PARQUET_EXTENSION: &str = ".parquet";

/// Whether a listed path is a Parquet data file.
///
/// Hidden and metadata entries (any segment starting with `_` or `.`) are
/// skipped, as are staging files left by uploads.
pub fn is_data_file(path: &str) -> bool {
    path.ends_with(PARQUET_EXTENSION)
        && path
            .split('/')
            .all(|segment| !segment.starts_with('_') && !segment.starts_with('.'))
}

/// A dataset opened as a live stream with a known schema.
#[derive(Debug, Clone)]
pub struct LiveSource {
    storage: StorageProviderRef,
    prefix: Option<String>,
    schema: SchemaRef,
    partition_columns: Vec<String>,
    ordering: FileOrdering,
    max_files_per_trigger: usize,
    state: Arc<watch::Sender<AcquireState>>,
}

impl LiveSource {
    pub(crate) fn new(
        storage: StorageProviderRef,
        prefix: Option<String>,
        schema: SchemaRef,
        partition_columns: Vec<String>,
        ordering: FileOrdering,
        max_files_per_trigger: usize,
        state: Arc<watch::Sender<AcquireState>>,
    ) -> Self {
        Self {
            storage,
            prefix,
            schema,
            partition_columns,
            ordering,
            max_files_per_trigger,
            state,
        }
    }

    /// Schema of every batch this source returns.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Partition columns injected from file paths.
    pub fn partition_columns(&self) -> &[String] {
        &self.partition_columns
    }

    /// Lifecycle updates of this source.
    pub fn subscribe(&self) -> watch::Receiver<AcquireState> {
        self.state.subscribe()
    }

    pub fn mark_stopping(&self) {
        self.state.send_replace(AcquireState::Stopping);
    }

    pub fn mark_stopped(&self) {
        self.state.send_replace(AcquireState::Stopped);
    }

    /// Files not yet consumed, in configured order and bounded by
    /// `max_files_per_trigger`.
    ///
    /// Returns the selected files and the total number pending.
    pub async fn pending(
        &self,
        consumed: &BTreeSet<String>,
    ) -> Result<(Vec<ListedFile>, usize), SourceError> {
        let mut files: Vec<ListedFile> = self
            .storage
            .list_files(self.prefix.as_deref())
            .await
            .context(SourceStorageSnafu)?
            .into_iter()
            .filter(|f| is_data_file(&f.path) && !consumed.contains(&f.path))
            .collect();

        files.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.path.cmp(&b.path))
        });
        if self.ordering == FileOrdering::LatestFirst {
            files.reverse();
        }

        let total = files.len();
        files.truncate(self.max_files_per_trigger);
        Ok((files, total))
    }

    /// Read one file conformed to the stream schema.
    pub async fn read_file(&self, file: &ListedFile) -> Result<RecordBatch, SourceError> {
        let bytes = self
            .storage
            .get(&Path::from(file.path.as_str()))
            .await
            .context(SourceStorageSnafu)?;
        let mut batch = decode_parquet(bytes, &file.path)?;

        let values = PartitionExtractor::new(self.partition_columns.clone()).extract(&file.path);
        for (name, value) in &values {
            let column: ArrayRef =
                Arc::new(StringArray::from(vec![value.as_deref(); batch.num_rows()]));
            batch = with_column(&batch, name, column).context(ConformSnafu { path: &file.path })?;
        }

        let batch = conform(&batch, &self.schema).context(ConformSnafu { path: &file.path })?;
        debug!(path = %file.path, rows = batch.num_rows(), "Read source file");
        Ok(batch)
    }

    /// Read several files into one batch.
    pub async fn read(&self, files: &[ListedFile]) -> Result<RecordBatch, SourceError> {
        let mut batches = Vec::with_capacity(files.len());
        for file in files {
            batches.push(self.read_file(file).await?);
        }
        concat_batches(&self.schema, &batches).context(ArrowReadSnafu {
            path: self.prefix.clone().unwrap_or_default(),
        })
    }
}

/// Decode a whole Parquet file into a single batch.
pub(crate) fn decode_parquet(bytes: Bytes, path: &str) -> Result<RecordBatch, SourceError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).context(ParquetReadSnafu { path })?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()
        .context(ParquetReadSnafu { path })?
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowReadSnafu { path })?;
    concat_batches(&schema, &batches).context(ArrowReadSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParquetCompression;
    use crate::sink::{PartitionedWriter, encode_parquet};
    use crate::storage::StorageProvider;
    use arrow::array::{Array, ArrayRef, AsArray, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};
    use object_store::PutPayload;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn parquet(candids: &[i64]) -> Bytes {
        let batch = RecordBatch::try_from_iter(vec![(
            "candid",
            Arc::new(Int64Array::from(candids.to_vec())) as ArrayRef,
        )])
        .unwrap();
        encode_parquet(batch.schema(), &[batch], ParquetCompression::Snappy).unwrap()
    }

    async fn source(dir: &TempDir, ordering: FileOrdering, max: usize) -> LiveSource {
        let storage = StorageProvider::shared(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap();
        let schema = Arc::new(Schema::new(vec![
            Field::new("candid", DataType::Int64, true),
            Field::new("objectId", DataType::Utf8, true),
            Field::new("day", DataType::Utf8, true),
        ]));
        let (state, _) = watch::channel(AcquireState::Streaming);
        LiveSource::new(
            storage,
            Some("year=2024".to_string()),
            schema,
            vec!["day".to_string()],
            ordering,
            max,
            Arc::new(state),
        )
    }

    async fn put(dir: &TempDir, path: &str, bytes: Bytes) {
        let storage = StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap();
        storage
            .put_payload(&Path::from(path), PutPayload::from(bytes))
            .await
            .unwrap();
    }

    #[test]
    fn test_data_file_filter() {
        assert!(is_data_file("year=2024/day=15/part-0.parquet"));
        assert!(!is_data_file("year=2024/_delta_log/0.json"));
        assert!(!is_data_file("year=2024/.part-0.parquet.crc"));
        assert!(!is_data_file("year=2024/_SUCCESS"));
        assert!(!is_data_file("checkpoint.json"));
    }

    #[tokio::test]
    async fn test_pending_excludes_consumed_and_caps() {
        let dir = TempDir::new().unwrap();
        put(&dir, "year=2024/day=15/a.parquet", parquet(&[1])).await;
        put(&dir, "year=2024/day=15/b.parquet", parquet(&[2])).await;
        put(&dir, "year=2024/day=16/c.parquet", parquet(&[3])).await;
        put(&dir, "year=2023/day=01/old.parquet", parquet(&[0])).await;

        let live = source(&dir, FileOrdering::OldestFirst, 2).await;
        let consumed = BTreeSet::from(["year=2024/day=15/a.parquet".to_string()]);
        let (files, total) = live.pending(&consumed).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.path.starts_with("year=2024/")));
        assert!(files.iter().all(|f| !consumed.contains(&f.path)));

        let live = source(&dir, FileOrdering::LatestFirst, 1).await;
        let (files, total) = live.pending(&BTreeSet::new()).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_read_injects_partition_and_conforms() {
        let dir = TempDir::new().unwrap();
        put(&dir, "year=2024/day=15/a.parquet", parquet(&[1, 2])).await;
        put(&dir, "year=2024/day=16/b.parquet", parquet(&[3])).await;

        let live = source(&dir, FileOrdering::OldestFirst, 10).await;
        let (mut files, _) = live.pending(&BTreeSet::new()).await.unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let batch = live.read(&files).await.unwrap();
        assert_eq!(batch.schema(), live.schema());
        assert_eq!(batch.num_rows(), 3);

        let days = batch.column_by_name("day").unwrap().as_string::<i32>();
        assert_eq!(days, &StringArray::from(vec!["15", "15", "16"]));
        assert_eq!(batch.column_by_name("objectId").unwrap().null_count(), 3);
    }

    #[tokio::test]
    async fn test_null_partition_reads_back_as_null() {
        let dir = TempDir::new().unwrap();
        let partition_root = dir.path().join("year=2024");
        let sink = StorageProvider::shared(partition_root.to_str().unwrap(), HashMap::new())
            .await
            .unwrap();
        let writer = PartitionedWriter::new(
            sink,
            vec!["day".to_string()],
            128,
            ParquetCompression::Snappy,
            "raw2science",
        );
        let batch = RecordBatch::try_from_iter(vec![
            ("candid", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
            (
                "day",
                Arc::new(StringArray::from(vec![Some("15"), None])) as ArrayRef,
            ),
        ])
        .unwrap();
        writer.write(0, &batch).await.unwrap();

        let live = source(&dir, FileOrdering::OldestFirst, 10).await;
        let (files, _) = live.pending(&BTreeSet::new()).await.unwrap();
        assert_eq!(files.len(), 2);
        let read = live.read(&files).await.unwrap();

        let candids = read.column_by_name("candid").unwrap().as_primitive::<Int64Type>();
        let days = read.column_by_name("day").unwrap().as_string::<i32>();
        let mut rows: Vec<(i64, Option<&str>)> = candids
            .iter()
            .flatten()
            .zip(days.iter())
            .collect();
        rows.sort();
        assert_eq!(rows, vec![(1, Some("15")), (2, None)]);
        assert_eq!(days.null_count(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        put(&dir, "year=2024/day=15/bad.parquet", Bytes::from_static(b"nope")).await;

        let live = source(&dir, FileOrdering::OldestFirst, 10).await;
        let (files, _) = live.pending(&BTreeSet::new()).await.unwrap();
        let err = live.read(&files).await.unwrap_err();
        assert!(matches!(err, SourceError::ParquetRead { .. }));
    }
}
