//! aurora: streaming alert ingestion, enrichment and distribution.
//!
//! Alerts arrive as Parquet files in a partitioned dataset. An ingest job
//! waits for the night's partition to appear, then processes new files on a
//! fixed trigger: quality gate, enrichment, timestamps, partitioned output
//! and a checkpoint commit. A distribution job follows the enriched store
//! and republishes records to named channels, each under its own checkpoint.
//!
//! # Example
//!
//! ```ignore
//! use aurora::{Config, run_pipelines};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), aurora::error::PipelineError> {
//!     let config = Config::from_file("aurora.yaml")?;
//!     run_pipelines(&config).await
//! }
//! ```

pub mod checkpoint;
pub mod columns;
pub mod config;
pub mod distribute;
pub mod error;
pub mod index;
pub mod logging;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod signal;
pub mod sink;
pub mod source;
pub mod storage;
pub mod time;
pub mod topology;

pub use config::Config;
pub use distribute::DistributeJob;
pub use pipeline::IngestJob;
pub use storage::{StorageProvider, StorageProviderRef};
pub use topology::run_pipelines;
