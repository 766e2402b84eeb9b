//! Job identifier used as the key of the `jobs` map.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a job in an aurora configuration.
///
/// ```
/// use aurora::config::JobKey;
///
/// let key = JobKey::new("raw2science");
/// assert_eq!(key.id(), "raw2science");
/// assert_eq!(key.to_string(), "raw2science");
/// ```
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    /// Create a job key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
