//! Column-level helpers over Arrow record batches.
//!
//! Alert records nest most fields in struct columns, so lookups accept dotted
//! paths such as `candidate.jd`.

use arrow::array::{Array, ArrayRef, AsArray, RecordBatch, RecordBatchOptions, StringArray, make_array};
use arrow::buffer::NullBuffer;
use arrow::compute::cast;
use arrow::datatypes::{Field, Schema, SchemaRef};
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{
    ArrowSnafu, BatchError, MissingColumnSnafu, NotAStructSnafu, RequiredColumnMissingSnafu,
};

/// Resolve a column or a dotted path into struct columns.
///
/// Rows where any enclosing struct is null are null in the result.
pub fn column_by_path(batch: &RecordBatch, path: &str) -> Result<ArrayRef, BatchError> {
    let mut segments = path.split('.');
    let first = segments.next().unwrap_or_default();
    let mut current = batch
        .column_by_name(first)
        .cloned()
        .context(MissingColumnSnafu { path })?;

    let mut walked = first.to_string();
    for segment in segments {
        let parent = current
            .as_struct_opt()
            .context(NotAStructSnafu { path: &walked })?;
        let child = parent
            .column_by_name(segment)
            .context(MissingColumnSnafu { path })?;

        current = match NullBuffer::union(parent.nulls(), child.nulls()) {
            Some(nulls) if parent.null_count() > 0 => {
                let data = child
                    .to_data()
                    .into_builder()
                    .nulls(Some(nulls))
                    .build()
                    .context(ArrowSnafu)?;
                make_array(data)
            }
            _ => child.clone(),
        };
        walked.push('.');
        walked.push_str(segment);
    }

    Ok(current)
}

/// Add a top-level column, replacing any existing column with the same name.
pub fn with_column(
    batch: &RecordBatch,
    name: &str,
    array: ArrayRef,
) -> Result<RecordBatch, BatchError> {
    let field = Field::new(name, array.data_type().clone(), true);
    let schema = batch.schema();

    let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();

    match schema.index_of(name) {
        Ok(index) => {
            fields[index] = Arc::new(field);
            columns[index] = array;
        }
        Err(_) => {
            fields.push(Arc::new(field));
            columns.push(array);
        }
    }

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    RecordBatch::try_new(schema, columns).context(ArrowSnafu)
}

/// Remove top-level columns. Names that do not exist are ignored.
pub fn drop_columns<S: AsRef<str>>(
    batch: &RecordBatch,
    names: &[S],
) -> Result<RecordBatch, BatchError> {
    let keep: Vec<usize> = batch
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !names.iter().any(|n| n.as_ref() == f.name()))
        .map(|(i, _)| i)
        .collect();
    batch.project(&keep).context(ArrowSnafu)
}

/// Schema without the named top-level fields.
pub fn drop_fields<S: AsRef<str>>(schema: &Schema, names: &[S]) -> SchemaRef {
    let fields: Vec<Arc<Field>> = schema
        .fields()
        .iter()
        .filter(|f| !names.iter().any(|n| n.as_ref() == f.name()))
        .cloned()
        .collect();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

/// A utf8 column repeating `value`.
pub fn literal_utf8(value: &str, len: usize) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(std::iter::repeat_n(value, len)))
}

/// Reshape a batch to `schema`.
///
/// Columns are matched by name. Extra columns are dropped, mismatched types
/// are cast and missing nullable columns are filled with nulls.
pub fn conform(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch, BatchError> {
    let rows = batch.num_rows();
    let columns = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(column) if column.data_type() == field.data_type() => Ok(column.clone()),
            Some(column) => cast(column, field.data_type()).context(ArrowSnafu),
            None if field.is_nullable() => Ok(arrow::array::new_null_array(field.data_type(), rows)),
            None => RequiredColumnMissingSnafu {
                name: field.name().clone(),
            }
            .fail(),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    RecordBatch::try_new_with_options(schema.clone(), columns, &options).context(ArrowSnafu)
}
