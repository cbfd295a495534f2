//! Bundler tunables.

use serde::{Deserialize, Serialize};

/// Resource constraints steering the optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlerOptions {
    /// An asset must appear in strictly more than this many bundles to be
    /// a shared-bundle candidate.
    pub min_bundles: usize,
    /// Minimum total size of a shared bundle, in bytes.
    pub min_bundle_size: u64,
    /// Maximum number of bundles loaded in parallel per bundle-group.
    pub max_parallel_requests: usize,
}

impl Default for BundlerOptions {
    fn default() -> Self {
        Self {
            min_bundles: 1,
            min_bundle_size: 30_000,
            max_parallel_requests: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BundlerOptions::default();
        assert_eq!(options.min_bundles, 1);
        assert_eq!(options.min_bundle_size, 30_000);
        assert_eq!(options.max_parallel_requests, 5);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let options: BundlerOptions =
            serde_json::from_str(r#"{"max_parallel_requests": 3}"#).unwrap();
        assert_eq!(options.max_parallel_requests, 3);
        assert_eq!(options.min_bundle_size, 30_000);
    }
}
