use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Matcher tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Squared-distance threshold `dd`: two faces are "the same" when their
    /// squared Euclidean embedding distance is below this. Default: 0.6.
    pub distance_threshold: f32,

    /// Fraction of a record's stored faces that must be within
    /// `distance_threshold` for the record to count as a match (at least
    /// one face is always required). Default: 0.5.
    pub positive_threshold: f32,

    /// Per-organization block budget in faces. Used both as the page size
    /// when loading records from storage and as the oversize bound for a
    /// cached block. Default: 1000.
    pub org_cache_size: usize,

    /// Aggregate face-count budget of the process-wide block cache,
    /// across all organizations. Default: 10000.
    pub global_cache_size: u64,

    /// Worker teardown after this long without traffic. Default: 60000.
    pub idle_timeout_ms: u64,

    /// Capacity of each worker's input queue; a full queue blocks
    /// submitters (backpressure). Default: 1000.
    pub queue_capacity: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.6,
            positive_threshold: 0.5,
            org_cache_size: 1000,
            global_cache_size: 10_000,
            idle_timeout_ms: 60_000,
            queue_capacity: 1000,
        }
    }
}

impl MatcherConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
