//! Calculation Queue
//!
//! Background scheduler for recalculation requests. Workers pull pending
//! tasks in FIFO order; requests whose canonical key matches a pending or
//! running task attach to that task instead of running twice.

pub mod engine;
pub mod task;

pub use engine::{CalculationQueue, QueueStatus, TaskExecutor};
pub use task::{
    CalculationKind, CalculationRequest, CalculationResult, QueueTask, ResultStatus, TaskHandle,
    TaskId, TaskOptions, TaskStatus,
};

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Worker pool size
    pub workers: usize,
    /// Pending tasks accepted before `QueueFull`
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_pending: 10_000,
        }
    }
}

/// One worker per available execution thread.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
