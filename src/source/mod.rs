//! Partitioned Parquet sources.
//!
//! A source is first discovered with retry ([`Acquirer`]) and then read as an
//! unbounded stream with a known schema ([`LiveSource`]).

pub mod acquire;
pub mod backoff;
pub mod reader;

pub use acquire::{AcquireState, Acquirer, Discovered};
pub use backoff::Backoff;
pub use reader::{LiveSource, is_data_file};
