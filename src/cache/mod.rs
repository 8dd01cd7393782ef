//! Calculation Cache
//!
//! Process-local TTL cache keyed by (operation, parameters). Cache failures
//! never surface to callers: every operation is infallible and a miss simply
//! means "recompute".

pub mod entry;
pub mod key;
pub mod metrics;
pub mod store;

pub use entry::CacheEntry;
pub use key::{CacheKey, SemesterScope};
pub use metrics::{CacheMetrics, CacheStats};
pub use store::{CalculationCache, Generation};

use std::time::Duration;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Serve and store entries
    pub enabled: bool,
    /// TTL applied by `set`
    pub default_ttl: Duration,
    /// Interval of the background expiry sweep
    pub purge_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: DEFAULT_TTL,
            purge_interval: Duration::from_secs(60),
        }
    }
}
