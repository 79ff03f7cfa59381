//! Graph configuration.

use serde::{Deserialize, Serialize};

/// Default maximum number of computed values kept by the compute cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default maximum number of memoized hashes.
pub const DEFAULT_HASH_CACHE_CAPACITY: usize = 100_000;

/// Tunable settings of a [`Graph`](crate::Graph).
///
/// Capacities of zero are treated as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum number of computed values kept by the compute cache.
    pub cache_capacity: usize,
    /// Maximum number of memoized plug hashes.
    pub hash_cache_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            hash_cache_capacity: DEFAULT_HASH_CACHE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.cache_capacity, 10_000);
        assert_eq!(config.hash_cache_capacity, 100_000);
    }
}
