//! Lookup index over resolved designations.
//!
//! The index maps every name under which an object may be queried (its
//! resolved name, or its original designation when unresolved, plus its
//! number when it has one) back to the original designation. Keys are made
//! unique with [`mark_as_duplicate`].

mod dedup;

pub use dedup::mark_as_duplicate;

use arrow::array::{Array, ArrayRef, AsArray, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::ParquetCompression;
use crate::error::{
    BuildBatchSnafu, DecodeBatchSnafu, DecodeInputSnafu, IndexError, InputColumnSnafu,
    ReadInputSnafu, WriteIndexSnafu, WriteOutputSnafu,
};
use crate::sink::encode_parquet;

/// Resolution outcome for one original designation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub original: String,
    pub name: Option<String>,
    pub number: Option<String>,
}

/// One row of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Unique lookup key, suffixed with its generation.
    pub key: String,
    pub original: String,
}

/// Accumulates resolutions and builds the index.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    resolutions: Vec<Resolution>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resolution: Resolution) {
        self.resolutions.push(resolution);
    }

    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }

    /// Names first, then numbers, each paired with its original designation.
    pub fn build(&self) -> Vec<IndexEntry> {
        let numbered: Vec<(&str, &str)> = self
            .resolutions
            .iter()
            .filter_map(|r| valid(r.number.as_deref()).map(|n| (n, r.original.as_str())))
            .collect();

        let (keys, originals): (Vec<&str>, Vec<&str>) = self
            .resolutions
            .iter()
            .map(|r| {
                let name = valid(r.name.as_deref()).unwrap_or(r.original.as_str());
                (name, r.original.as_str())
            })
            .chain(numbered)
            .unzip();

        mark_as_duplicate(&keys)
            .into_iter()
            .zip(originals)
            .map(|(key, original)| IndexEntry {
                key,
                original: original.to_string(),
            })
            .collect()
    }
}

impl FromIterator<Resolution> for IndexBuilder {
    fn from_iter<I: IntoIterator<Item = Resolution>>(iter: I) -> Self {
        Self {
            resolutions: iter.into_iter().collect(),
        }
    }
}

fn valid(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("none"))
}

/// Arrow schema of the written index.
pub fn index_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("original", DataType::Utf8, false),
    ]))
}

/// Convert index entries to a record batch.
pub fn to_record_batch(entries: &[IndexEntry]) -> Result<RecordBatch, IndexError> {
    let keys: ArrayRef = Arc::new(StringArray::from_iter_values(
        entries.iter().map(|e| e.key.as_str()),
    ));
    let originals: ArrayRef = Arc::new(StringArray::from_iter_values(
        entries.iter().map(|e| e.original.as_str()),
    ));
    RecordBatch::try_new(index_schema(), vec![keys, originals]).context(BuildBatchSnafu)
}

/// Read resolutions from Parquet with `original`, `name` and `number` columns.
///
/// `name` and `number` are optional columns.
pub fn read_resolutions(bytes: Bytes, path: &str) -> Result<Vec<Resolution>, IndexError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .context(DecodeInputSnafu { path })?
        .build()
        .context(DecodeInputSnafu { path })?;

    let mut resolutions = Vec::new();
    for batch in reader {
        let batch = batch.context(DecodeBatchSnafu)?;
        let originals = string_column(&batch, "original")?.context(InputColumnSnafu {
            name: "original",
        })?;
        let names = string_column(&batch, "name")?;
        let numbers = string_column(&batch, "number")?;

        for row in 0..batch.num_rows() {
            if originals.is_null(row) {
                continue;
            }
            resolutions.push(Resolution {
                original: originals.value(row).to_string(),
                name: names.as_ref().and_then(|a| value_at(a, row)),
                number: numbers.as_ref().and_then(|a| value_at(a, row)),
            });
        }
    }
    Ok(resolutions)
}

fn string_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>, IndexError> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let column = arrow::compute::cast(column, &DataType::Utf8)
        .ok()
        .context(InputColumnSnafu { name })?;
    Ok(Some(column.as_string::<i32>().clone()))
}

fn value_at(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_string())
}

/// Build an index file from a resolutions file. Returns the number of entries.
pub async fn build_index_file(
    input: &Path,
    output: &Path,
    compression: ParquetCompression,
) -> Result<usize, IndexError> {
    let input_name = input.display().to_string();
    let bytes = tokio::fs::read(input)
        .await
        .context(ReadInputSnafu { path: &input_name })?;

    let builder: IndexBuilder = read_resolutions(Bytes::from(bytes), &input_name)?
        .into_iter()
        .collect();
    let entries = builder.build();
    let batch = to_record_batch(&entries)?;

    let encoded = encode_parquet(index_schema(), &[batch], compression).context(WriteIndexSnafu)?;
    tokio::fs::write(output, &encoded)
        .await
        .context(WriteOutputSnafu {
            path: output.display().to_string(),
        })?;

    info!(
        input = %input_name,
        output = %output.display(),
        resolutions = builder.len(),
        entries = entries.len(),
        "Index written"
    );

    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolution(original: &str, name: Option<&str>, number: Option<&str>) -> Resolution {
        Resolution {
            original: original.to_string(),
            name: name.map(String::from),
            number: number.map(String::from),
        }
    }

    #[test]
    fn test_names_then_numbers() {
        let builder: IndexBuilder = vec![
            resolution("2001 AB", Some("Ceres"), Some("1")),
            resolution("2002 CD", None, None),
            resolution("2003 EF", Some("Ceres"), Some("None")),
        ]
        .into_iter()
        .collect();

        let entries = builder.build();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        let originals: Vec<&str> = entries.iter().map(|e| e.original.as_str()).collect();

        assert_eq!(keys, ["Ceres_0", "2002 CD_0", "Ceres_1", "1_0"]);
        assert_eq!(originals, ["2001 AB", "2002 CD", "2003 EF", "2001 AB"]);
    }

    #[test]
    fn test_empty_builder() {
        let builder = IndexBuilder::new();
        assert!(builder.is_empty());
        assert!(builder.build().is_empty());
    }

    #[tokio::test]
    async fn test_index_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("resolutions.parquet");
        let output = dir.path().join("index.parquet");

        let schema = Arc::new(Schema::new(vec![
            Field::new("original", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("number", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["x1", "x2", "x3"])),
                Arc::new(StringArray::from(vec![Some("Vesta"), Some("Vesta"), None])),
                Arc::new(StringArray::from(vec![Some("4"), None, None])),
            ],
        )
        .unwrap();
        let bytes = encode_parquet(schema, &[batch], ParquetCompression::Snappy).unwrap();
        std::fs::write(&input, &bytes).unwrap();

        let count = build_index_file(&input, &output, ParquetCompression::Zstd)
            .await
            .unwrap();
        assert_eq!(count, 4);

        let written = Bytes::from(std::fs::read(&output).unwrap());
        let reader = ParquetRecordBatchReaderBuilder::try_new(written)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.collect::<Result<_, _>>().unwrap();
        let keys = batches[0].column(0).as_string::<i32>();
        let keys: Vec<&str> = keys.iter().flatten().collect();
        assert_eq!(keys, ["Vesta_0", "Vesta_1", "x3_0", "4_0"]);
    }

    #[test]
    fn test_missing_original_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec![Some("Vesta")]))],
        )
        .unwrap();
        let bytes = encode_parquet(schema, &[batch], ParquetCompression::Snappy).unwrap();
        let err = read_resolutions(bytes, "in.parquet").unwrap_err();
        assert!(matches!(err, IndexError::InputColumn { .. }));
    }
}
