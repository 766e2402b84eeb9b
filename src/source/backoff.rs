//! Capped exponential backoff for partition discovery.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Delay schedule between discovery attempts.
///
/// The Nth wait is `min(max, initial * factor^(N-1))`. Once the ceiling is
/// reached the delay stays constant. There is no retry limit.
///
/// ```
/// use aurora::source::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::default();
/// assert_eq!(backoff.next_delay(), Duration::from_secs(5));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(6));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: f64,
    factor: f64,
    max: f64,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial_secs: f64, factor: f64, max_secs: f64) -> Self {
        Self {
            initial: initial_secs,
            factor,
            max: max_secs,
            attempts: 0,
        }
    }

    /// Delay to wait after the next failed attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek();
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) returns.
    pub fn peek(&self) -> Duration {
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let secs = (self.initial * self.factor.powi(exponent)).min(self.max);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.initial_secs, config.factor, config.max_secs)
    }
}
