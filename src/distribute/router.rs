//! Channel routing.

use arrow::array::{AsArray, BooleanArray, RecordBatch};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::{DataType, SchemaRef};
use async_trait::async_trait;
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::publisher::{PublisherRef, StoragePublisher};
use crate::columns::column_by_path;
use crate::config::{ChannelConfig, ChannelsConfig};
use crate::error::{ArrowSnafu, BatchError, JobError};
use crate::storage::StorageProvider;

/// Selects the records a channel receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    All,
    /// Keep rows whose column (or dotted struct path) equals one of `values`.
    /// Nulls never match.
    Equals {
        column: String,
        values: HashSet<String>,
    },
}

impl RecordFilter {
    pub fn apply(&self, batch: &RecordBatch) -> Result<RecordBatch, BatchError> {
        match self {
            RecordFilter::All => Ok(batch.clone()),
            RecordFilter::Equals { column, values } => {
                let strings = cast(&column_by_path(batch, column)?, &DataType::Utf8)
                    .context(ArrowSnafu)?;
                let mask: BooleanArray = strings
                    .as_string::<i32>()
                    .iter()
                    .map(|value| Some(value.is_some_and(|v| values.contains(v))))
                    .collect();
                filter_record_batch(batch, &mask).context(ArrowSnafu)
            }
        }
    }
}

impl From<&ChannelConfig> for RecordFilter {
    fn from(channel: &ChannelConfig) -> Self {
        match &channel.filter {
            None => RecordFilter::All,
            Some(filter) => RecordFilter::Equals {
                column: filter.column.clone(),
                values: filter.equals.iter().cloned().collect(),
            },
        }
    }
}

/// One independent output of a distribution job.
#[derive(Clone)]
pub struct OutputStream {
    pub name: String,
    pub filter: RecordFilter,
    pub publisher: PublisherRef,
    /// Checkpoint location of this stream.
    pub checkpoint: String,
    pub checkpoint_options: HashMap<String, String>,
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

/// Inputs a router needs to build the output streams.
#[derive(Debug, Clone)]
pub struct RouteContext<'a> {
    /// Schema of the records after internal columns were stripped.
    pub schema: SchemaRef,
    /// Each stream checkpoints under `{checkpoint_root}/{name}`.
    pub checkpoint_root: &'a str,
    pub checkpoint_options: &'a HashMap<String, String>,
    /// Cadence every stream of the job runs at.
    pub trigger_interval: Duration,
    pub channels: &'a ChannelsConfig,
}

impl RouteContext<'_> {
    /// Checkpoint location of the stream called `name`.
    pub fn checkpoint_for(&self, name: &str) -> String {
        format!("{}/{}", self.checkpoint_root.trim_end_matches('/'), name)
    }
}

/// Splits a stream into named outputs.
#[async_trait]
pub trait Router: Send + Sync {
    async fn routes(&self, context: &RouteContext<'_>) -> Result<Vec<OutputStream>, JobError>;
}

/// Routes to the configured channels, publishing through object storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelRouter;

#[async_trait]
impl Router for ChannelRouter {
    async fn routes(&self, context: &RouteContext<'_>) -> Result<Vec<OutputStream>, JobError> {
        let channels = context.channels;
        let storage =
            StorageProvider::shared(&channels.path, channels.storage_options.clone()).await?;
        let publisher: PublisherRef = Arc::new(StoragePublisher::new(storage));

        channels
            .streams
            .iter()
            .map(|channel| {
                let filter = RecordFilter::from(channel);
                if let RecordFilter::Equals { column, .. } = &filter {
                    column_path_exists(&context.schema, column)?;
                }
                Ok::<_, JobError>(OutputStream {
                    name: channel.name.clone(),
                    filter,
                    publisher: publisher.clone(),
                    checkpoint: context.checkpoint_for(&channel.name),
                    checkpoint_options: context.checkpoint_options.clone(),
                })
            })
            .collect()
    }
}

fn column_path_exists(schema: &SchemaRef, path: &str) -> Result<(), BatchError> {
    let batch = RecordBatch::new_empty(schema.clone());
    column_by_path(&batch, path).map(|_| ())
}
