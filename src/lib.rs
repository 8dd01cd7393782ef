//! Gradebook Engine - Academic Grade Calculation Engine
//!
//! Computes weighted grade averages, semester aggregates and general
//! averages from raw assessment scores, caches the expensive aggregates
//! with time-based invalidation, and queues recalculation requests so that
//! overlapping requests for the same student/period run once with bounded
//! concurrency.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ Orchestrator ──▶ Cache (read) ──▶ [miss] ──▶ GradeSource ──▶ Algorithms
//!                 │                                                          │
//!                 │                 Cache (write) ◀──────────────────────────┘
//!                 │
//!                 └──▶ Queue ──▶ workers ──▶ same path + invalidation + audit
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - In-memory grade source and audit sinks implementing the domain ports
//! - [`cache`] - TTL calculation cache with hit/miss accounting and targeted invalidation
//! - [`config`] - Engine configuration and YAML loading
//! - [`domain`] - Value objects, ports and audit events
//! - [`error`] - Error types
//! - [`grading`] - Pure grading algorithms
//! - [`orchestrator`] - Public calculation surface
//! - [`queue`] - Coalescing calculation queue with a bounded worker pool

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod grading;
pub mod orchestrator;
pub mod queue;

// Re-export commonly used types
pub use cache::{CacheKey, CacheStats, CalculationCache};
pub use config::EngineConfig;
pub use domain::{AcademicYearId, AuditEvent, Semester, StudentId, SubjectId};
pub use error::{Error, Result};
pub use grading::{ClassStatistics, GradingConfig, Mention};
pub use orchestrator::{
    BatchAverages, CalculationOrchestrator, QueuedRecalculation, StudentAverages,
};
pub use queue::{CalculationQueue, CalculationRequest, CalculationResult, QueueStatus};
