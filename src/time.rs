//! Astronomical time conversions and partition sizing.
//!
//! Alert timestamps arrive as Julian Dates (`jd`), Modified Julian Dates
//! (`mjd`) or unix seconds. Conversions are pure per row and preserve nulls.

use arrow::array::{Float64Array, Int64Array, TimestampMicrosecondArray};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MB;

/// Julian Date of the unix epoch.
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Offset between JD and MJD.
pub const MJD_OFFSET: f64 = 2_400_000.5;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Encoding of a floating point time column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    Jd,
    Mjd,
    /// Seconds since the unix epoch.
    Unix,
}

impl TimeFormat {
    /// Convert one value to milliseconds since the unix epoch, rounded to nearest.
    pub fn to_unix_millis(self, value: f64) -> i64 {
        let millis = match self {
            TimeFormat::Jd => (value - UNIX_EPOCH_JD) * MILLIS_PER_DAY,
            TimeFormat::Mjd => (value + MJD_OFFSET - UNIX_EPOCH_JD) * MILLIS_PER_DAY,
            TimeFormat::Unix => value * 1000.0,
        };
        millis.round() as i64
    }

    /// Inverse of [`TimeFormat::to_unix_millis`].
    pub fn from_unix_millis(self, millis: i64) -> f64 {
        match self {
            TimeFormat::Jd => unix_millis_to_jd(millis),
            TimeFormat::Mjd => unix_millis_to_mjd(millis),
            TimeFormat::Unix => millis as f64 / 1000.0,
        }
    }
}

/// Milliseconds since the unix epoch as a Julian Date.
pub fn unix_millis_to_jd(millis: i64) -> f64 {
    millis as f64 / MILLIS_PER_DAY + UNIX_EPOCH_JD
}

/// Milliseconds since the unix epoch as a Modified Julian Date.
pub fn unix_millis_to_mjd(millis: i64) -> f64 {
    unix_millis_to_jd(millis) - MJD_OFFSET
}

/// Convert a time column to epoch milliseconds.
///
/// With `now` set, the input values are ignored and every row receives the
/// same instant, captured once for the whole call.
pub fn to_unix_millis(values: &Float64Array, format: TimeFormat, now: bool) -> Int64Array {
    if now {
        return now_millis(values.len());
    }
    values.unary(|v| format.to_unix_millis(v))
}

/// A column of `len` copies of the current instant in epoch milliseconds.
pub fn now_millis(len: usize) -> Int64Array {
    let instant = Utc::now().timestamp_millis();
    Int64Array::from_value(instant, len)
}

/// Convert a time column to UTC timestamps with microsecond precision.
///
/// Instants outside the representable microsecond range become null.
pub fn to_datetime(values: &Float64Array, format: TimeFormat) -> TimestampMicrosecondArray {
    values
        .iter()
        .map(|v| v.and_then(|v| format.to_unix_millis(v).checked_mul(1000)))
        .collect::<TimestampMicrosecondArray>()
        .with_timezone("UTC")
}

/// Calendar date of an epoch-millisecond instant.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Number of output files for a payload so each stays near `partition_size_mb`.
///
/// Always at least one.
///
/// ```
/// use aurora::time::estimate_partitions;
///
/// assert_eq!(estimate_partitions(300 * 1024 * 1024, 128), 3);
/// assert_eq!(estimate_partitions(0, 128), 1);
/// ```
pub fn estimate_partitions(size_bytes: usize, partition_size_mb: usize) -> usize {
    let size_mb = size_bytes as f64 / MB as f64;
    let target = partition_size_mb.max(1) as f64;
    ((size_mb / target).ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn test_jd_epoch_is_zero() {
        assert_eq!(TimeFormat::Jd.to_unix_millis(UNIX_EPOCH_JD), 0);
        assert_eq!(TimeFormat::Mjd.to_unix_millis(40_587.0), 0);
    }

    #[test]
    fn test_known_instant() {
        // 2024-01-15T00:00:00Z
        let millis = TimeFormat::Jd.to_unix_millis(2_460_324.5);
        assert_eq!(millis, 1_705_276_800_000);
        let dt = millis_to_datetime(millis).unwrap();
        assert_eq!(dt.format("%Y%m%d").to_string(), "20240115");

        assert_eq!(TimeFormat::Mjd.to_unix_millis(60_324.0), 1_705_276_800_000);
        assert_eq!(TimeFormat::Unix.to_unix_millis(1_705_276_800.25), 1_705_276_800_250);
    }

    #[test]
    fn test_round_trip_within_a_millisecond() {
        for jd in [2_459_000.123_456_7, 2_460_324.987_654_3, 2_451_544.5] {
            let millis = TimeFormat::Jd.to_unix_millis(jd);
            let back = unix_millis_to_jd(millis);
            let drift_ms = (back - jd).abs() * MILLIS_PER_DAY;
            assert!(drift_ms <= 1.0, "drift {drift_ms} ms for jd {jd}");
        }
        for mjd in [59_000.5, 60_324.333_333] {
            let millis = TimeFormat::Mjd.to_unix_millis(mjd);
            let drift_ms = (TimeFormat::Mjd.from_unix_millis(millis) - mjd).abs() * MILLIS_PER_DAY;
            assert!(drift_ms <= 1.0);
        }
    }

    #[test]
    fn test_column_conversion_preserves_nulls() {
        let values = Float64Array::from(vec![Some(UNIX_EPOCH_JD + 1.0), None]);
        let millis = to_unix_millis(&values, TimeFormat::Jd, false);
        assert_eq!(millis.value(0), 86_400_000);
        assert!(millis.is_null(1));
    }

    #[test]
    fn test_now_mode_uses_one_instant() {
        let values = Float64Array::from(vec![1.0, 2.0, 3.0, 4.0]);
        let before = Utc::now().timestamp_millis();
        let stamped = to_unix_millis(&values, TimeFormat::Jd, true);
        let after = Utc::now().timestamp_millis();

        assert_eq!(stamped.len(), 4);
        let first = stamped.value(0);
        assert!(stamped.values().iter().all(|v| *v == first));
        assert!(first >= before && first <= after);
    }

    #[test]
    fn test_to_datetime() {
        let values = Float64Array::from(vec![2_460_324.5]);
        let ts = to_datetime(&values, TimeFormat::Jd);
        assert_eq!(ts.value(0), 1_705_276_800_000_000);
        assert_eq!(ts.timezone(), Some("UTC"));
    }

    #[test]
    fn test_to_datetime_out_of_range_is_null() {
        let values = Float64Array::from(vec![Some(f64::MAX), None, Some(2_460_324.5)]);
        let ts = to_datetime(&values, TimeFormat::Jd);
        assert!(ts.is_null(0));
        assert!(ts.is_null(1));
        assert_eq!(ts.value(2), 1_705_276_800_000_000);
    }

    #[test]
    fn test_estimate_partitions() {
        assert_eq!(estimate_partitions(MB, 128), 1);
        assert_eq!(estimate_partitions(128 * MB, 128), 1);
        assert_eq!(estimate_partitions(128 * MB + 1, 128), 2);
        assert_eq!(estimate_partitions(10 * MB, 0), 10);
    }
}
