//! Calculation Orchestrator
//!
//! The public surface used by callers. It owns no long-lived state of its
//! own: the cache and queue are constructed once and injected.
//!
//! # Request lifecycle
//!
//! ```text
//! requested ──▶ cache hit ─────────────────────────────▶ done
//!     │
//!     └──▶ cache miss ──▶ computing ──▶ cached ──▶ done
//!                             │
//!                             └──▶ failed (fetch / validation)
//!
//! queued:  enqueued ──▶ dequeued ──▶ computing ──▶ invalidate + cache ──▶ done
//! ```

pub mod averages;
pub mod engine;
pub mod validation;

pub use averages::{BatchAverages, BatchFailure, CachedCalculation, StudentAverages};
pub use engine::{CalculationOrchestrator, QueuedRecalculation};

use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum concurrent grade-source fetches across all callers
    pub batch_concurrency: usize,
    /// Deadline for a single grade-source call
    pub fetch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 8,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}
