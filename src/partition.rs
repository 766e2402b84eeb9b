//! Night partitions and Hive-style path handling.
//!
//! Alert datasets are laid out by observing night, either as
//! `year=YYYY/month=MM/day=DD` (Hive) or as a single `YYYYMMDD` directory.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, InvalidNightSnafu};

/// Directory value used for null partition values.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// An observing night, written `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Night(NaiveDate);

impl Night {
    /// Parse a `YYYYMMDD` string.
    ///
    /// ```
    /// use aurora::partition::Night;
    ///
    /// let night = Night::parse("20240115").unwrap();
    /// assert_eq!(night.hive_path(), "year=2024/month=01/day=15");
    /// assert!(Night::parse("2024-01-15").is_err());
    /// ```
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return InvalidNightSnafu { value }.fail();
        }
        NaiveDate::parse_from_str(value, "%Y%m%d")
            .map(Night)
            .map_err(|_| ConfigError::InvalidNight {
                value: value.to_string(),
            })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Night(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// `year=YYYY/month=MM/day=DD`
    pub fn hive_path(&self) -> String {
        format!(
            "year={:04}/month={:02}/day={:02}",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }

    /// `YYYYMMDD`
    pub fn compact(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for Night {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact())
    }
}

impl FromStr for Night {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Night::parse(s)
    }
}

/// How a night maps to a directory under a dataset's base path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionLayout {
    #[default]
    Hive,
    Compact,
}

impl PartitionLayout {
    pub fn path_for(&self, night: &Night) -> String {
        match self {
            PartitionLayout::Hive => night.hive_path(),
            PartitionLayout::Compact => night.compact(),
        }
    }
}

/// Extracts `key=value` partition values from relative file paths.
///
/// ```
/// use aurora::partition::PartitionExtractor;
///
/// let values = PartitionExtractor::all()
///     .extract("year=2024/month=__HIVE_DEFAULT_PARTITION__/part-0.parquet");
/// assert_eq!(values["year"].as_deref(), Some("2024"));
/// assert_eq!(values["month"], None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PartitionExtractor {
    columns: Option<Vec<String>>,
}

impl PartitionExtractor {
    /// Extract only the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: Some(columns),
        }
    }

    /// Extract every `key=value` directory segment.
    pub fn all() -> Self {
        Self { columns: None }
    }

    /// Partition values by key. The last segment (file name) is ignored and
    /// [`HIVE_DEFAULT_PARTITION`] reads back as `None`.
    pub fn extract(&self, path: &str) -> BTreeMap<String, Option<String>> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        segments.pop();

        segments
            .into_iter()
            .filter_map(|segment| segment.split_once('='))
            .filter(|(key, _)| !key.is_empty())
            .filter(|(key, _)| {
                self.columns
                    .as_ref()
                    .is_none_or(|cols| cols.iter().any(|c| c == key))
            })
            .map(|(key, value)| {
                let value = (value != HIVE_DEFAULT_PARTITION).then(|| value.to_string());
                (key.to_string(), value)
            })
            .collect()
    }

    /// Ordered partition keys found in a path.
    pub fn keys(&self, path: &str) -> Vec<String> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        segments.pop();
        segments
            .into_iter()
            .filter_map(|segment| segment.split_once('=').map(|(k, _)| k))
            .filter(|key| !key.is_empty())
            .filter(|key| {
                self.columns
                    .as_ref()
                    .is_none_or(|cols| cols.iter().any(|c| c == key))
            })
            .map(str::to_string)
            .collect()
    }
}

/// Build a Hive directory prefix (`a=1/b=2`) from ordered partition values.
pub fn hive_prefix(values: &[(String, Option<String>)]) -> String {
    values
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                key,
                value.as_deref().unwrap_or(HIVE_DEFAULT_PARTITION)
            )
        })
        .collect::<Vec<_>>()
        .join("/")
}
