//! Append-only partitioned Parquet output.
//!
//! Each micro-batch is split by its partition columns, encoded into one or
//! more Parquet files per partition and uploaded under a Hive-style prefix.
//! Files are never rewritten; a replayed batch produces new files.

mod writer;

pub use writer::{ParquetWriter, encode_parquet};

use arrow::array::{Array, AsArray, RecordBatch, UInt32Array};
use arrow::compute::{cast, take_record_batch};
use arrow::datatypes::DataType;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::columns::drop_columns;
use crate::config::ParquetCompression;
use crate::emit;
use crate::error::{
    ArrowSnafu, BatchError, MissingColumnSnafu, PartitionSnafu, SinkError, UploadSnafu,
};
use crate::metrics::events::FileWritten;
use crate::partition::hive_prefix;
use crate::storage::StorageProviderRef;
use crate::time::estimate_partitions;

/// A file written by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedFile {
    /// Path relative to the sink root.
    pub path: String,
    pub size: usize,
    pub record_count: usize,
    /// Partition values in `partition_by` order.
    pub partition_values: Vec<(String, Option<String>)>,
}

/// Writes batches as Hive-partitioned Parquet files.
pub struct PartitionedWriter {
    storage: StorageProviderRef,
    partition_by: Vec<String>,
    file_size_mb: usize,
    compression: ParquetCompression,
    job: String,
}

impl PartitionedWriter {
    pub fn new(
        storage: StorageProviderRef,
        partition_by: Vec<String>,
        file_size_mb: usize,
        compression: ParquetCompression,
        job: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            partition_by,
            file_size_mb,
            compression,
            job: job.into(),
        }
    }

    pub fn partition_by(&self) -> &[String] {
        &self.partition_by
    }

    /// Write one micro-batch. Returns the files in upload order.
    pub async fn write(
        &self,
        batch_id: u64,
        batch: &RecordBatch,
    ) -> Result<Vec<FinishedFile>, SinkError> {
        if batch.num_rows() == 0 {
            return Ok(Vec::new());
        }

        let mut finished = Vec::new();
        for (values, rows) in self.split(batch).context(PartitionSnafu)? {
            let data = drop_columns(&rows, &self.partition_by).context(PartitionSnafu)?;
            let prefix = hive_prefix(&values);

            let files = estimate_partitions(data.get_array_memory_size(), self.file_size_mb);
            let chunk = data.num_rows().div_ceil(files);
            let mut offset = 0;
            while offset < data.num_rows() {
                let len = chunk.min(data.num_rows() - offset);
                let slice = data.slice(offset, len);
                offset += len;

                let bytes = encode_parquet(slice.schema(), &[slice], self.compression)?;
                let name = format!("part-{:06}-{}.parquet", batch_id, Uuid::now_v7());
                let path = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };

                let size = bytes.len();
                self.storage
                    .put_payload(&Path::from(path.as_str()), PutPayload::from(bytes))
                    .await
                    .context(UploadSnafu { path: &path })?;

                emit!(FileWritten {
                    job: self.job.clone(),
                    bytes: size as u64,
                });
                debug!(target = %self.job, path = %path, records = len, "Wrote output file");

                finished.push(FinishedFile {
                    path,
                    size,
                    record_count: len,
                    partition_values: values.clone(),
                });
            }
        }

        Ok(finished)
    }

    /// Group rows by the values of the partition columns.
    fn split(
        &self,
        batch: &RecordBatch,
    ) -> Result<Vec<(Vec<(String, Option<String>)>, RecordBatch)>, BatchError> {
        if self.partition_by.is_empty() {
            return Ok(vec![(Vec::new(), batch.clone())]);
        }

        let keys = self
            .partition_by
            .iter()
            .map(|name| {
                let column = batch
                    .column_by_name(name)
                    .context(MissingColumnSnafu { path: name })?;
                let strings = cast(column, &DataType::Utf8).context(ArrowSnafu)?;
                Ok(strings.as_string::<i32>().clone())
            })
            .collect::<Result<Vec<_>, BatchError>>()?;

        let mut groups: BTreeMap<Vec<Option<String>>, Vec<u32>> = BTreeMap::new();
        for row in 0..batch.num_rows() {
            let key = keys
                .iter()
                .map(|col| (!col.is_null(row)).then(|| col.value(row).to_string()))
                .collect();
            groups.entry(key).or_default().push(row as u32);
        }

        groups
            .into_iter()
            .map(|(key, rows)| {
                let values = self.partition_by.iter().cloned().zip(key).collect();
                let rows = take_record_batch(batch, &UInt32Array::from(rows)).context(ArrowSnafu)?;
                Ok((values, rows))
            })
            .collect()
    }
}
