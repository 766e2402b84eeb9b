//! Resource conflict detection.
//!
//! A checkpoint location identifies exactly one producer. Jobs declare the
//! locations they own and validation refuses configs where two jobs claim
//! the same one.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A resource that cannot be shared between jobs.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Resource {
    /// A checkpoint directory.
    Checkpoint(String),
}

impl Resource {
    /// Create a checkpoint resource. Trailing slashes are ignored.
    ///
    /// ```
    /// use aurora::config::Resource;
    ///
    /// assert_eq!(
    ///     Resource::checkpoint("s3://bucket/ckpt/"),
    ///     Resource::checkpoint("s3://bucket/ckpt"),
    /// );
    /// ```
    pub fn checkpoint(path: &str) -> Self {
        Self::Checkpoint(path.trim_end_matches('/').to_string())
    }

    /// Map each resource claimed by more than one job to the claiming jobs.
    pub fn conflicts<'a>(
        claims: impl IntoIterator<Item = (&'a str, Vec<Resource>)>,
    ) -> BTreeMap<Resource, BTreeSet<&'a str>> {
        let mut owners: BTreeMap<Resource, BTreeSet<&'a str>> = BTreeMap::new();
        for (job, resources) in claims {
            for resource in resources {
                owners.entry(resource).or_default().insert(job);
            }
        }
        owners.retain(|_, jobs| jobs.len() > 1);
        owners
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkpoint(path) => write!(f, "checkpoint:{path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_conflicts_for_distinct_locations() {
        let conflicts = Resource::conflicts(vec![
            ("a", vec![Resource::checkpoint("/ckpt/a")]),
            ("b", vec![Resource::checkpoint("/ckpt/b")]),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_shared_location_is_reported_once() {
        let conflicts = Resource::conflicts(vec![
            ("a", vec![Resource::checkpoint("/ckpt/shared/")]),
            ("b", vec![Resource::checkpoint("/ckpt/other")]),
            ("c", vec![Resource::checkpoint("/ckpt/shared")]),
        ]);
        assert_eq!(conflicts.len(), 1);
        let jobs = &conflicts[&Resource::checkpoint("/ckpt/shared")];
        assert_eq!(jobs.iter().copied().collect::<Vec<_>>(), vec!["a", "c"]);
    }
}
