//! Checkpoint documents.
//!
//! A checkpoint location holds two JSON files: `metadata.json`, written
//! once when the lineage is created, and `checkpoint.json`, replaced on
//! every commit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Current `checkpoint.json` layout version.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Ownership record of a checkpoint location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Job key that owns the location.
    pub job: String,
    /// Identifier of this lineage. A new one is created when the location is
    /// empty.
    pub lineage: String,
    pub created_at_ms: i64,
}

/// Summary of the last committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub files: usize,
    pub records_read: usize,
    #[serde(default)]
    pub records_rejected: usize,
    pub records_written: usize,
    pub output_files: usize,
    pub duration_ms: u64,
}

/// Progress cursor of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub schema_version: u32,
    /// Last committed batch, `None` before the first commit.
    pub last_batch_id: Option<u64>,
    /// Source files (relative to the source root) already consumed.
    pub consumed_files: BTreeSet<String>,
    #[serde(default)]
    pub last_batch: Option<BatchSummary>,
    #[serde(default)]
    pub updated_at_ms: i64,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            last_batch_id: None,
            consumed_files: BTreeSet::new(),
            last_batch: None,
            updated_at_ms: 0,
        }
    }
}

impl CheckpointState {
    /// Id the next batch of this lineage must use.
    pub fn next_batch_id(&self) -> u64 {
        self.last_batch_id.map_or(0, |id| id + 1)
    }

    pub fn is_consumed(&self, path: &str) -> bool {
        self.consumed_files.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = CheckpointState::default();
        assert_eq!(state.next_batch_id(), 0);
        assert!(state.consumed_files.is_empty());
        assert_eq!(state.schema_version, CHECKPOINT_SCHEMA_VERSION);
    }

    #[test]
    fn test_state_serialization() {
        let state = CheckpointState {
            last_batch_id: Some(4),
            consumed_files: BTreeSet::from(["year=2024/part-0.parquet".to_string()]),
            last_batch: Some(BatchSummary {
                files: 1,
                records_read: 10,
                records_rejected: 2,
                records_written: 8,
                output_files: 1,
                duration_ms: 120,
            }),
            ..CheckpointState::default()
        };

        let json = serde_json::to_string(&state).unwrap();
        let restored: CheckpointState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.next_batch_id(), 5);
        assert!(restored.is_consumed("year=2024/part-0.parquet"));
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{"schema_version":1,"last_batch_id":null,"consumed_files":[]}"#;
        let state: CheckpointState = serde_json::from_str(json).unwrap();
        assert!(state.last_batch.is_none());
        assert_eq!(state.updated_at_ms, 0);
    }
}
