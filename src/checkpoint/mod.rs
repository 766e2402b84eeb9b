//! Durable, single-owner progress tracking.
//!
//! # Layout
//!
//! ```text
//! {checkpoint}/metadata.json    owner job and lineage id
//! {checkpoint}/checkpoint.json  last batch id and consumed source files
//! ```
//!
//! A location is owned by the first job that opens it. Opening it from a
//! different job key fails. Deleting the location starts a new lineage and
//! reprocesses everything.
//!
//! Output is always written before the checkpoint is replaced, so a crash in
//! between replays the batch (at-least-once).

pub mod state;

pub use state::{BatchSummary, CHECKPOINT_SCHEMA_VERSION, CheckpointMetadata, CheckpointState};

use chrono::Utc;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

use crate::emit;
use crate::error::{
    CheckpointError, CheckpointStorageSnafu, DeserializeSnafu, OutOfOrderCommitSnafu,
    OwnedByOtherJobSnafu, SerializeSnafu, UnsupportedVersionSnafu,
};
use crate::metrics::events::CheckpointCommitted;
use crate::storage::StorageProviderRef;

const METADATA_FILE: &str = "metadata.json";
const STATE_FILE: &str = "checkpoint.json";

/// Loads and commits the checkpoint of one job lineage.
#[derive(Debug)]
pub struct CheckpointManager {
    storage: StorageProviderRef,
    job: String,
    metadata: CheckpointMetadata,
    state: CheckpointState,
}

impl CheckpointManager {
    /// Open the checkpoint at the root of `storage` for `job`.
    ///
    /// Creates a new lineage when the location is empty.
    pub async fn open(storage: StorageProviderRef, job: &str) -> Result<Self, CheckpointError> {
        let location = storage.url().to_string();

        let metadata = match storage
            .get_if_exists(&Path::from(METADATA_FILE))
            .await
            .context(CheckpointStorageSnafu)?
        {
            Some(bytes) => {
                let metadata: CheckpointMetadata =
                    serde_json::from_slice(&bytes).context(DeserializeSnafu {
                        location: &location,
                    })?;
                ensure!(
                    metadata.job == job,
                    OwnedByOtherJobSnafu {
                        location: &location,
                        owner: metadata.job.clone(),
                        job,
                    }
                );
                metadata
            }
            None => {
                let metadata = CheckpointMetadata {
                    job: job.to_string(),
                    lineage: Uuid::new_v4().to_string(),
                    created_at_ms: Utc::now().timestamp_millis(),
                };
                let json = serde_json::to_vec_pretty(&metadata).context(SerializeSnafu)?;
                storage
                    .atomic_write(&Path::from(METADATA_FILE), json)
                    .await
                    .context(CheckpointStorageSnafu)?;
                info!(
                    target = %job,
                    location = %location,
                    lineage = %metadata.lineage,
                    "Created checkpoint lineage"
                );
                metadata
            }
        };

        let state = match storage
            .get_if_exists(&Path::from(STATE_FILE))
            .await
            .context(CheckpointStorageSnafu)?
        {
            Some(bytes) => {
                let state: CheckpointState =
                    serde_json::from_slice(&bytes).context(DeserializeSnafu {
                        location: &location,
                    })?;
                ensure!(
                    state.schema_version == CHECKPOINT_SCHEMA_VERSION,
                    UnsupportedVersionSnafu {
                        version: state.schema_version,
                    }
                );
                info!(
                    target = %job,
                    last_batch_id = ?state.last_batch_id,
                    consumed_files = state.consumed_files.len(),
                    "Restored checkpoint"
                );
                state
            }
            None => CheckpointState::default(),
        };

        Ok(Self {
            storage,
            job: job.to_string(),
            metadata,
            state,
        })
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn lineage(&self) -> &str {
        &self.metadata.lineage
    }

    pub fn location(&self) -> &str {
        self.storage.url()
    }

    pub fn next_batch_id(&self) -> u64 {
        self.state.next_batch_id()
    }

    pub fn last_batch_id(&self) -> Option<u64> {
        self.state.last_batch_id
    }

    /// Commit `batch_id` as done, marking `files` as consumed.
    ///
    /// `batch_id` must be [`next_batch_id`](Self::next_batch_id). The in-memory
    /// state only advances once the write succeeded.
    pub async fn commit(
        &mut self,
        batch_id: u64,
        files: impl IntoIterator<Item = String>,
        summary: BatchSummary,
    ) -> Result<(), CheckpointError> {
        let expected = self.next_batch_id();
        ensure!(
            batch_id == expected,
            OutOfOrderCommitSnafu { batch_id, expected }
        );

        let mut next = self.state.clone();
        next.last_batch_id = Some(batch_id);
        next.consumed_files.extend(files);
        next.last_batch = Some(summary);
        next.updated_at_ms = Utc::now().timestamp_millis();

        let json = serde_json::to_vec_pretty(&next).context(SerializeSnafu)?;
        self.storage
            .atomic_write(&Path::from(STATE_FILE), json)
            .await
            .context(CheckpointStorageSnafu)?;

        self.state = next;
        emit!(CheckpointCommitted {
            job: self.job.clone(),
            batch_id,
        });
        debug!(target = %self.job, batch_id, "Checkpoint committed");
        Ok(())
    }
}
