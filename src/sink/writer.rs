//! Parquet encoding.
//!
//! Record batches are encoded into an in-memory buffer which is uploaded as a
//! single object once the file is closed.

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use bytes::{BufMut, Bytes, BytesMut};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::time::Instant;

use crate::config::ParquetCompression;
use crate::error::{SinkError, WriteSnafu, WriterCreateSnafu};

/// Rows per row group.
const MAX_ROW_GROUP_ROWS: usize = 128 * 1024;

/// Writes batches into one in-memory Parquet file.
pub struct ParquetWriter {
    writer: ArrowWriter<bytes::buf::Writer<BytesMut>>,
    records_written: usize,
    started_at: Instant,
}

impl ParquetWriter {
    /// Create a writer for `schema`.
    pub fn new(schema: SchemaRef, compression: ParquetCompression) -> Result<Self, SinkError> {
        let writer = ArrowWriter::try_new(
            BytesMut::new().writer(),
            schema,
            Some(writer_properties(compression)),
        )
        .context(WriterCreateSnafu)?;

        Ok(Self {
            writer,
            records_written: 0,
            started_at: Instant::now(),
        })
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), SinkError> {
        self.writer.write(batch).context(WriteSnafu)?;
        self.records_written += batch.num_rows();
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Close the file and return its bytes.
    pub fn finish(self) -> Result<Bytes, SinkError> {
        let records = self.records_written;
        let started_at = self.started_at;
        let buffer = self.writer.into_inner().context(WriteSnafu)?;
        let bytes = buffer.into_inner().freeze();

        tracing::trace!(
            records,
            bytes = bytes.len(),
            elapsed_ms = started_at.elapsed().as_millis(),
            "Parquet file encoded"
        );
        Ok(bytes)
    }
}

fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    WriterProperties::builder()
        .set_max_row_group_size(MAX_ROW_GROUP_ROWS)
        .set_compression(match compression {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Lz4 => Compression::LZ4,
        })
        .build()
}

/// Encode batches sharing `schema` into one Parquet file.
pub fn encode_parquet(
    schema: SchemaRef,
    batches: &[RecordBatch],
    compression: ParquetCompression,
) -> Result<Bytes, SinkError> {
    let mut writer = ParquetWriter::new(schema, compression)?;
    for batch in batches {
        writer.write_batch(batch)?;
    }
    writer.finish()
}
