//! Fixed-cadence micro-batch trigger loop.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::emit;
use crate::metrics::events::{BatchCompleted, BatchOutcomeType, TriggerOverrun};

/// Result of one triggered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// New input was processed and committed.
    Processed,
    /// Nothing new was available.
    Idle,
}

/// Work done on every trigger.
#[async_trait]
pub trait MicroBatchProcessor: Send {
    type Error: std::error::Error + Send;

    async fn process_batch(&mut self) -> Result<BatchOutcome, Self::Error>;
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerStats {
    pub processed: u64,
    pub idle: u64,
    pub overruns: u64,
}

/// Run `processor` every `interval` until `shutdown` is cancelled.
///
/// Triggers are aligned to the start of each batch: a batch that finishes
/// early sleeps for the rest of the interval, a batch that overruns is
/// followed immediately by the next one. Batches never overlap, and the
/// token is only observed between batches and while sleeping.
pub async fn run_trigger_loop<P: MicroBatchProcessor>(
    processor: &mut P,
    interval: Duration,
    shutdown: CancellationToken,
    job: &str,
) -> Result<TriggerStats, P::Error> {
    let mut stats = TriggerStats::default();

    while !shutdown.is_cancelled() {
        let started = Instant::now();
        let outcome = processor.process_batch().await?;
        let elapsed = started.elapsed();

        let outcome_type = match outcome {
            BatchOutcome::Processed => {
                stats.processed += 1;
                BatchOutcomeType::Processed
            }
            BatchOutcome::Idle => {
                stats.idle += 1;
                BatchOutcomeType::Idle
            }
        };
        emit!(BatchCompleted {
            job: job.to_string(),
            outcome: outcome_type,
            duration: elapsed,
        });

        let Some(remaining) = interval.checked_sub(elapsed).filter(|d| !d.is_zero()) else {
            stats.overruns += 1;
            warn!(
                target = job,
                elapsed_ms = elapsed.as_millis(),
                interval_ms = interval.as_millis(),
                "Batch overran the trigger interval, starting next batch immediately"
            );
            emit!(TriggerOverrun {
                job: job.to_string(),
                overrun: elapsed.saturating_sub(interval),
            });
            continue;
        };

        debug!(
            target = job,
            "Waiting {}ms for next trigger",
            remaining.as_millis()
        );
        if shutdown
            .run_until_cancelled(tokio::time::sleep(remaining))
            .await
            .is_none()
        {
            break;
        }
    }

    info!(
        target = job,
        processed = stats.processed,
        idle = stats.idle,
        overruns = stats.overruns,
        "Trigger loop stopped"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Never;

    impl fmt::Display for Never {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "never")
        }
    }

    impl std::error::Error for Never {}

    /// Runs scripted batch durations and records when each batch started.
    struct Scripted {
        origin: Instant,
        durations: Vec<Duration>,
        starts: Vec<Duration>,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl MicroBatchProcessor for Scripted {
        type Error = Never;

        async fn process_batch(&mut self) -> Result<BatchOutcome, Never> {
            let index = self.starts.len();
            self.starts.push(self.origin.elapsed());
            tokio::time::sleep(self.durations[index]).await;
            if index + 1 == self.durations.len() {
                self.shutdown.cancel();
            }
            Ok(if index % 2 == 0 {
                BatchOutcome::Processed
            } else {
                BatchOutcome::Idle
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_and_overrun() {
        let shutdown = CancellationToken::new();
        let mut processor = Scripted {
            origin: Instant::now(),
            durations: vec![
                Duration::from_secs(15),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ],
            starts: Vec::new(),
            shutdown: shutdown.clone(),
        };

        let stats = run_trigger_loop(&mut processor, Duration::from_secs(10), shutdown, "test")
            .await
            .unwrap();

        assert_eq!(
            processor.starts,
            [
                Duration::ZERO,
                Duration::from_secs(15),
                Duration::from_secs(25)
            ]
        );
        assert_eq!(
            stats,
            TriggerStats {
                processed: 2,
                idle: 1,
                overruns: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait_not_batch() {
        let shutdown = CancellationToken::new();
        let mut processor = Scripted {
            origin: Instant::now(),
            durations: vec![Duration::from_secs(3); 100],
            starts: Vec::new(),
            shutdown: CancellationToken::new(),
        };

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let stats = run_trigger_loop(&mut processor, Duration::from_secs(60), shutdown, "test")
            .await
            .unwrap();
        assert_eq!(processor.starts.len(), 1);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut processor = Scripted {
            origin: Instant::now(),
            durations: vec![Duration::ZERO],
            starts: Vec::new(),
            shutdown: CancellationToken::new(),
        };
        let stats = run_trigger_loop(&mut processor, Duration::from_secs(1), shutdown, "test")
            .await
            .unwrap();
        assert_eq!(stats, TriggerStats::default());
        assert!(processor.starts.is_empty());
    }
}
