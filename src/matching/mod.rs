//! Caches of class matching decisions.
//!
//! Deciding whether a class matches an instrumenter may require walking its whole type
//! hierarchy. A [`ClassMatchingCache`] remembers the ids of the matching instrumenters per
//! class name and class-file location so forked processes can skip that work.

mod bitset;
mod parent;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use bitset::BitSet;
pub use parent::{JrtPolicy, ParentClassMatchingCache};

/// A class identified by its binary name and the URL of the class file it was loaded from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    pub class_name: String,
    pub class_file_url: String,
}

impl MatchKey {
    pub fn new(class_name: &str, class_file_url: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            class_file_url: class_file_url.to_string(),
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.class_name, self.class_file_url)
    }
}

pub trait ClassMatchingCache: Send + Sync {
    /// Ids recorded for the class in an earlier session, if any.
    fn get_recorded_matching_result(&self, class_name: &str, class_file_url: &str)
        -> Option<BitSet>;

    fn record_matching_result(&self, class_name: &str, class_file_url: &str, ids: &BitSet);

    /// Publishes what was recorded. Called once; later records are dropped. Nothing is sent
    /// when nothing was recorded.
    fn shutdown(&self);
}

/// Cache that remembers nothing, used when no coordinator is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoClassMatchingCache;

impl ClassMatchingCache for NoClassMatchingCache {
    fn get_recorded_matching_result(&self, _: &str, _: &str) -> Option<BitSet> {
        None
    }

    fn record_matching_result(&self, _: &str, _: &str, _: &BitSet) {}

    fn shutdown(&self) {}
}
