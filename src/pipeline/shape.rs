//! Columns stamped on records as they pass through an ingest job.

use arrow::array::{ArrayRef, AsArray, Float64Array, RecordBatch, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int64Type, TimeUnit};
use chrono::{DateTime, Datelike};
use snafu::prelude::*;
use std::sync::Arc;

use crate::columns::{column_by_path, literal_utf8, with_column};
use crate::config::VersionTags;
use crate::error::{ArrowSnafu, BatchError};
use crate::time::{TimeFormat, now_millis, to_datetime};

pub const BROKER_START_COLUMN: &str = "brokerStartProcessTimestamp";
pub const BROKER_END_COLUMN: &str = "brokerEndProcessTimestamp";

/// Column holding the MJD of the source detection in alternate input.
pub const ALTERNATE_TIME_COLUMN: &str = "diaSource.midPointTai";

pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Stamp the current instant, in epoch milliseconds, as `column`.
///
/// Every row of the batch receives the same instant.
pub fn stamp_now(batch: &RecordBatch, column: &str) -> Result<RecordBatch, BatchError> {
    with_column(batch, column, Arc::new(now_millis(batch.num_rows())))
}

/// Add the broker, science and publisher tags.
pub fn add_version_tags(
    batch: &RecordBatch,
    versions: &VersionTags,
) -> Result<RecordBatch, BatchError> {
    let rows = batch.num_rows();
    let batch = with_column(batch, "fink_broker_version", literal_utf8(&versions.broker, rows))?;
    let batch = with_column(&batch, "fink_science_version", literal_utf8(&versions.science, rows))?;
    with_column(&batch, "publisher", literal_utf8(&versions.publisher, rows))
}

/// Add `timestamp` from the detection MJD, unless already present.
pub fn ensure_timestamp(batch: &RecordBatch) -> Result<RecordBatch, BatchError> {
    if batch.column_by_name(TIMESTAMP_COLUMN).is_some() {
        return Ok(batch.clone());
    }
    let mjd = cast(&column_by_path(batch, ALTERNATE_TIME_COLUMN)?, &DataType::Float64)
        .context(ArrowSnafu)?;
    let mjd: &Float64Array = mjd.as_primitive();
    with_column(batch, TIMESTAMP_COLUMN, Arc::new(to_datetime(mjd, TimeFormat::Mjd)))
}

/// Add zero-padded `year`, `month` and `day` strings derived from
/// `timestamp`, keeping any that already exist.
pub fn ensure_date_parts(batch: &RecordBatch) -> Result<RecordBatch, BatchError> {
    let missing: Vec<DatePart> = [DatePart::Year, DatePart::Month, DatePart::Day]
        .into_iter()
        .filter(|part| batch.column_by_name(part.column()).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(batch.clone());
    }

    let micros = timestamp_micros(&column_by_path(batch, TIMESTAMP_COLUMN)?)?;
    let mut batch = batch.clone();
    for part in missing {
        let values: StringArray = micros
            .iter()
            .map(|&value| {
                value
                    .and_then(DateTime::from_timestamp_micros)
                    .map(|dt| part.format(&dt))
            })
            .collect();
        batch = with_column(&batch, part.column(), Arc::new(values) as ArrayRef)?;
    }
    Ok(batch)
}

#[derive(Debug, Clone, Copy)]
enum DatePart {
    Year,
    Month,
    Day,
}

impl DatePart {
    fn column(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
        }
    }

    fn format<T: Datelike>(self, date: &T) -> String {
        match self {
            DatePart::Year => format!("{:04}", date.year()),
            DatePart::Month => format!("{:02}", date.month()),
            DatePart::Day => format!("{:02}", date.day()),
        }
    }
}

/// Raw microseconds since the epoch of a timestamp-like column.
fn timestamp_micros(column: &ArrayRef) -> Result<Vec<Option<i64>>, BatchError> {
    let (raw, to_micros): (ArrayRef, fn(i64) -> Option<i64>) = match column.data_type() {
        DataType::Timestamp(unit, _) => {
            let raw = cast(column, &DataType::Int64).context(ArrowSnafu)?;
            let to_micros: fn(i64) -> Option<i64> = match unit {
                TimeUnit::Second => |v| v.checked_mul(1_000_000),
                TimeUnit::Millisecond => |v| v.checked_mul(1_000),
                TimeUnit::Microsecond => Some,
                TimeUnit::Nanosecond => |v| Some(v.div_euclid(1_000)),
            };
            (raw, to_micros)
        }
        _ => {
            let ts = cast(column, &DataType::Timestamp(TimeUnit::Microsecond, None))
                .context(ArrowSnafu)?;
            (cast(&ts, &DataType::Int64).context(ArrowSnafu)?, Some)
        }
    };

    // Instants beyond the microsecond range become null.
    Ok(raw
        .as_primitive::<Int64Type>()
        .iter()
        .map(|v| v.and_then(to_micros))
        .collect())
}
