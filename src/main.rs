//! aurora: streaming alert ingestion, enrichment and distribution.
//!
//! `aurora run` starts every job of a configuration file. `aurora index`
//! builds a designation lookup index from a resolutions file.

use aurora::config::{Config, JobConfig, ParquetCompression};
use aurora::error::{ConfigSnafu, IndexSnafu, PipelineError};
use aurora::index::build_index_file;
use aurora::logging::init_tracing;
use aurora::run_pipelines;
use clap::{Parser, Subcommand};
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;

/// Streaming alert broker.
#[derive(Parser, Debug)]
#[command(name = "aurora")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured jobs until shutdown.
    Run {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,

        /// Validate the configuration without running any job.
        #[arg(long)]
        dry_run: bool,
    },
    /// Build a lookup index from a Parquet file of resolutions.
    Index {
        /// Parquet file with `original`, `name` and `number` columns.
        #[arg(short, long)]
        input: PathBuf,

        /// Output Parquet file.
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match args.command {
        Command::Run { config, dry_run } => {
            let config = Config::from_file(&config).context(ConfigSnafu)?;
            if dry_run {
                return describe(&config);
            }
            info!(jobs = config.jobs.len(), "aurora starting");
            run_pipelines(&config).await
        }
        Command::Index { input, output } => {
            let entries = build_index_file(&input, &output, ParquetCompression::default())
                .await
                .context(IndexSnafu)?;
            info!(entries, "Index complete");
            Ok(())
        }
    }
}

/// Log what each job would do.
fn describe(config: &Config) -> Result<(), PipelineError> {
    info!("Dry run mode - configuration is valid");
    for (key, job) in config.jobs() {
        let interval = job.trigger_interval(&config.global);
        let source = job
            .source()
            .partition_url()
            .context(ConfigSnafu)?;
        info!(
            "{} [{}] source={} checkpoint={} trigger={}s",
            key,
            job.kind(),
            source,
            job.checkpoint().path,
            interval.as_secs()
        );
        match job {
            JobConfig::Ingest(c) => {
                info!("  sink: {} partition_by={:?}", c.sink.path, c.partition_by());
            }
            JobConfig::Distribute(c) => {
                for channel in &c.channels.streams {
                    info!("  channel: {}", channel.name);
                }
            }
        }
    }
    Ok(())
}
