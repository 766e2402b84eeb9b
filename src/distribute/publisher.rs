//! Channel publishers.

use arrow::array::RecordBatch;
use arrow::json::LineDelimitedWriter;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DeliverSnafu, EncodeSnafu, PublishError};
use crate::storage::StorageProviderRef;

/// Delivers records of one batch to a channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `batch` to `channel`. Returns the number of records delivered.
    async fn publish(
        &self,
        channel: &str,
        batch_id: u64,
        batch: &RecordBatch,
    ) -> Result<usize, PublishError>;
}

pub type PublisherRef = Arc<dyn Publisher>;

/// Writes newline-delimited JSON files to `{root}/{channel}/`.
#[derive(Debug, Clone)]
pub struct StoragePublisher {
    storage: StorageProviderRef,
}

impl StoragePublisher {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }
}

/// Encode a batch as newline-delimited JSON.
pub fn encode_ndjson(batch: &RecordBatch) -> Result<Vec<u8>, arrow::error::ArrowError> {
    let mut writer = LineDelimitedWriter::new(Vec::new());
    writer.write(batch)?;
    writer.finish()?;
    Ok(writer.into_inner())
}

#[async_trait]
impl Publisher for StoragePublisher {
    async fn publish(
        &self,
        channel: &str,
        batch_id: u64,
        batch: &RecordBatch,
    ) -> Result<usize, PublishError> {
        if batch.num_rows() == 0 {
            return Ok(0);
        }

        let payload = encode_ndjson(batch).context(EncodeSnafu { channel })?;
        let path = format!("{}/batch-{:06}-{}.json", channel, batch_id, Uuid::now_v7());
        self.storage
            .put_payload(&Path::from(path.as_str()), PutPayload::from(Bytes::from(payload)))
            .await
            .context(DeliverSnafu { channel })?;

        debug!(channel, path = %path, records = batch.num_rows(), "Published batch");
        Ok(batch.num_rows())
    }
}
