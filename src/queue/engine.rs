//! Calculation Queue Engine
//!
//! FIFO task queue drained by a fixed pool of workers. The task table,
//! the pending list and the key index live under one mutex so that
//! enqueue, claim and coalesce are atomic with respect to each other:
//! a key maps to at most one pending-or-running task at any time.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::task::{CalculationRequest, CalculationResult, QueueTask, TaskHandle, TaskId, TaskStatus};
use super::QueueConfig;
use crate::cache::CacheKey;
use crate::error::{Error, Result};

/// Runs the computation behind a queued request.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Returns the number of affected entities.
    async fn execute(&self, task_id: TaskId, request: &CalculationRequest) -> Result<usize>;
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub running: usize,
    pub total: usize,
    pub completed_total: u64,
    pub failed_total: u64,
    pub coalesced_total: u64,
    pub cancelled_total: u64,
}

struct TaskSlot {
    task: QueueTask,
    key: CacheKey,
    sender: Option<oneshot::Sender<CalculationResult>>,
    future: Shared<BoxFuture<'static, CalculationResult>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TaskId>,
    tasks: HashMap<TaskId, TaskSlot>,
    by_key: HashMap<CacheKey, TaskId>,
    running: usize,
}

impl QueueState {
    /// Remove a task and its key index entry.
    fn remove(&mut self, task_id: &TaskId) -> Option<TaskSlot> {
        let slot = self.tasks.remove(task_id)?;
        if self.by_key.get(&slot.key) == Some(task_id) {
            self.by_key.remove(&slot.key);
        }
        Some(slot)
    }
}

/// Bounded worker pool with per-key coalescing.
pub struct CalculationQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    coalesced_total: AtomicU64,
    cancelled_total: AtomicU64,
}

impl CalculationQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            coalesced_total: AtomicU64::new(0),
            cancelled_total: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Spawn the worker pool. Calling it again while workers run is a no-op.
    pub fn start(self: &Arc<Self>, executor: Arc<dyn TaskExecutor>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("Calculation queue already started");
            return;
        }

        let count = self.config.workers.max(1);
        info!(workers = count, "Starting calculation queue");
        for worker_id in 0..count {
            let queue = Arc::clone(self);
            let executor = Arc::clone(&executor);
            workers.push(tokio::spawn(queue.worker_loop(worker_id, executor)));
        }
    }

    /// Submit a request.
    ///
    /// When a pending or running task already exists for the same canonical
    /// key, the returned handle attaches to it and no new task is created.
    /// `notify_on_completion` is merged into a pending task; the other
    /// options of the first request win.
    #[instrument(skip(self, request), fields(kind = request.kind.name()))]
    pub fn enqueue(&self, request: CalculationRequest) -> Result<TaskHandle> {
        if self.shutdown.is_cancelled() {
            return Err(Error::QueueShutdown);
        }

        let key = request.key();
        let mut state = self.state.lock();

        if let Some(existing) = state.by_key.get(&key).copied() {
            if let Some(slot) = state.tasks.get_mut(&existing) {
                slot.task.coalesced += 1;
                // A pending task picks up the notification request of any
                // caller attached to it; a running one keeps its own options.
                if slot.task.status == TaskStatus::Pending
                    && request.options.notify_on_completion
                {
                    slot.task.request.options.notify_on_completion = true;
                }
                self.coalesced_total.fetch_add(1, Ordering::Relaxed);
                debug!(
                    task_id = %existing,
                    key = %key,
                    status = %slot.task.status,
                    "Coalesced into in-flight task"
                );
                return Ok(TaskHandle {
                    task_id: existing,
                    coalesced: true,
                    future: slot.future.clone(),
                });
            }
        }

        if state.pending.len() >= self.config.max_pending {
            warn!(capacity = self.config.max_pending, "Calculation queue full");
            return Err(Error::QueueFull {
                capacity: self.config.max_pending,
            });
        }

        let task = QueueTask::new(request);
        let task_id = task.id;
        let (sender, receiver) = oneshot::channel();
        let future = receiver
            .map(|received| {
                received.unwrap_or_else(|_| {
                    CalculationResult::failure(&Error::Internal(
                        "task dropped before completion".to_string(),
                    ))
                })
            })
            .boxed()
            .shared();

        state.by_key.insert(key.clone(), task_id);
        state.pending.push_back(task_id);
        state.tasks.insert(
            task_id,
            TaskSlot {
                task,
                key,
                sender: Some(sender),
                future: future.clone(),
            },
        );
        drop(state);

        debug!(task_id = %task_id, "Task enqueued");
        self.notify.notify_one();

        Ok(TaskHandle {
            task_id,
            coalesced: false,
            future,
        })
    }

    /// Cancel a pending task. Returns `false` once the task is running.
    pub fn cancel(&self, task_id: TaskId) -> Result<bool> {
        let mut state = self.state.lock();
        let status = state
            .tasks
            .get(&task_id)
            .map(|slot| slot.task.status)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;

        if status != TaskStatus::Pending {
            return Ok(false);
        }

        state.pending.retain(|id| *id != task_id);
        let slot = state.remove(&task_id);
        drop(state);

        if let Some(sender) = slot.and_then(|mut s| s.sender.take()) {
            let _ = sender.send(CalculationResult::cancelled());
        }
        self.cancelled_total.fetch_add(1, Ordering::Relaxed);
        info!(task_id = %task_id, "Task cancelled");
        Ok(true)
    }

    /// Snapshot of a task still held by the queue.
    pub fn get_task(&self, task_id: TaskId) -> Option<QueueTask> {
        self.state
            .lock()
            .tasks
            .get(&task_id)
            .map(|slot| slot.task.clone())
    }

    pub fn queue_status(&self) -> QueueStatus {
        let (pending, running) = {
            let state = self.state.lock();
            (state.pending.len(), state.running)
        };

        QueueStatus {
            pending,
            running,
            total: pending + running,
            completed_total: self.completed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            coalesced_total: self.coalesced_total.load(Ordering::Relaxed),
            cancelled_total: self.cancelled_total.load(Ordering::Relaxed),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Workers are running. Tasks enqueued before [`start`](Self::start)
    /// stay pending until then.
    pub fn is_started(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    /// Stop accepting work, fail pending tasks and wait for running ones.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let drained: Vec<TaskSlot> = {
            let mut state = self.state.lock();
            let ids: Vec<TaskId> = state.pending.drain(..).collect();
            ids.iter().filter_map(|id| state.remove(id)).collect()
        };

        if !drained.is_empty() {
            warn!(count = drained.len(), "Failing pending tasks on shutdown");
        }
        for mut slot in drained {
            self.failed_total.fetch_add(1, Ordering::Relaxed);
            if let Some(sender) = slot.sender.take() {
                let _ = sender.send(CalculationResult::failure(&Error::QueueShutdown));
            }
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Queue worker terminated abnormally: {}", e);
            }
        }
        info!("Calculation queue shut down");
    }

    // =========================================================================
    // Workers
    // =========================================================================

    async fn worker_loop(self: Arc<Self>, worker_id: usize, executor: Arc<dyn TaskExecutor>) {
        debug!(worker_id, "Queue worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let (task_id, request) = match self.claim_next() {
                Some(next) => next,
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.notify.notified() => {}
                    }
                    continue;
                }
            };

            debug!(worker_id, task_id = %task_id, "Task running");
            let outcome = AssertUnwindSafe(executor.execute(task_id, &request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::Internal("task executor panicked".to_string())));

            self.finish(task_id, outcome);
        }

        debug!(worker_id, "Queue worker stopped");
    }

    /// Pop the oldest pending task and mark it running.
    fn claim_next(&self) -> Option<(TaskId, CalculationRequest)> {
        let mut state = self.state.lock();
        while let Some(task_id) = state.pending.pop_front() {
            let Some(slot) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            if slot.task.status != TaskStatus::Pending {
                continue;
            }
            slot.task.status = TaskStatus::Running;
            slot.task.started_at = Some(Utc::now());
            let request = slot.task.request.clone();
            state.running += 1;
            return Some((task_id, request));
        }
        None
    }

    /// Record a terminal outcome, release the key and resolve every handle.
    fn finish(&self, task_id: TaskId, outcome: Result<usize>) {
        let slot = {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
            state.remove(&task_id)
        };

        let Some(mut slot) = slot else {
            warn!(task_id = %task_id, "Finished task missing from task table");
            return;
        };

        let result = match outcome {
            Ok(affected) => {
                slot.task.status = TaskStatus::Succeeded;
                self.completed_total.fetch_add(1, Ordering::Relaxed);
                info!(task_id = %task_id, affected, "Task succeeded");
                CalculationResult::success(
                    affected,
                    format!(
                        "{} completed for {} entities",
                        slot.task.request.kind.name(),
                        affected
                    ),
                )
            }
            Err(e) => {
                slot.task.status = TaskStatus::Failed;
                self.failed_total.fetch_add(1, Ordering::Relaxed);
                warn!(task_id = %task_id, error = %e, "Task failed");
                CalculationResult::failure(&e)
            }
        };

        if let Some(sender) = slot.sender.take() {
            let _ = sender.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Semester;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts executions and tracks peak concurrency.
    #[derive(Default)]
    struct StubExecutor {
        calls: AtomicUsize,
        notify_requested: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        fail: bool,
        panic: bool,
    }

    impl StubExecutor {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for StubExecutor {
        async fn execute(&self, _task_id: TaskId, request: &CalculationRequest) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.options.notify_on_completion {
                self.notify_requested.fetch_add(1, Ordering::SeqCst);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic {
                panic!("boom");
            }
            if self.fail {
                return Err(Error::DataUnavailable("stub failure".into()));
            }
            Ok(3)
        }
    }

    fn config(workers: usize, max_pending: usize) -> QueueConfig {
        QueueConfig {
            workers,
            max_pending,
        }
    }

    fn student(id: &str) -> CalculationRequest {
        CalculationRequest::student_averages(id.into(), "2025".into(), None)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_executes_and_resolves() {
        let queue = CalculationQueue::new(config(2, 100));
        let executor = Arc::new(StubExecutor::default());
        queue.start(executor.clone());

        let handle = queue.enqueue(student("s1")).unwrap();
        assert!(!handle.coalesced);

        let result = handle.wait().await;
        assert!(result.is_success());
        assert_eq!(result.affected_count, 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let status = queue.queue_status();
        assert_eq!(status.total, 0);
        assert_eq!(status.completed_total, 1);

        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_executes_once() {
        let queue = CalculationQueue::new(config(4, 100));
        let executor = Arc::new(StubExecutor::with_delay(Duration::from_millis(100)));
        queue.start(executor.clone());

        let first = queue.enqueue(student("s1")).unwrap();
        let second = queue.enqueue(student("s1")).unwrap();
        assert!(second.coalesced);
        assert_eq!(first.task_id, second.task_id);

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert_eq!(a, b);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.queue_status().coalesced_total, 1);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_coalesced_notification_merged_into_pending_task() {
        let queue = CalculationQueue::new(config(1, 100));
        let first = queue.enqueue(student("s1")).unwrap();
        let second = queue
            .enqueue(student("s1").notify_on_completion(true))
            .unwrap();
        assert!(second.coalesced);
        assert!(!queue.is_started());

        let task = queue.get_task(first.task_id).unwrap();
        assert!(task.request.options.notify_on_completion);

        let executor = Arc::new(StubExecutor::default());
        queue.start(executor.clone());
        assert!(queue.is_started());

        assert!(first.wait().await.is_success());
        assert_eq!(executor.notify_requested.load(Ordering::SeqCst), 1);
        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_key_released_after_completion() {
        let queue = CalculationQueue::new(config(1, 100));
        let executor = Arc::new(StubExecutor::default());
        queue.start(executor.clone());

        queue.enqueue(student("s1")).unwrap().wait().await;
        let again = queue.enqueue(student("s1")).unwrap();
        assert!(!again.coalesced);
        again.wait().await;

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_bounds_concurrency() {
        let queue = CalculationQueue::new(config(2, 100));
        let executor = Arc::new(StubExecutor::with_delay(Duration::from_millis(30)));
        queue.start(executor.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| queue.enqueue(student(&format!("s{}", i))).unwrap())
            .collect();
        for handle in handles {
            assert!(handle.wait().await.is_success());
        }

        assert_eq!(executor.calls.load(Ordering::SeqCst), 8);
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_does_not_stop_pool() {
        let queue = CalculationQueue::new(config(1, 100));
        let executor = Arc::new(StubExecutor {
            fail: true,
            ..Default::default()
        });
        queue.start(executor.clone());

        let first = queue.enqueue(student("s1")).unwrap().wait().await;
        let second = queue.enqueue(student("s2")).unwrap().wait().await;
        assert!(!first.is_success());
        assert!(first.message.contains("DataUnavailable"));
        assert!(!second.is_success());
        assert_eq!(queue.queue_status().failed_total, 2);

        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_executor_fails_task() {
        let queue = CalculationQueue::new(config(1, 100));
        let executor = Arc::new(StubExecutor {
            panic: true,
            ..Default::default()
        });
        queue.start(executor.clone());

        let result = queue.enqueue(student("s1")).unwrap().wait().await;
        assert!(result.message.contains("Internal"));

        let result = queue.enqueue(student("s2")).unwrap().wait().await;
        assert!(!result.is_success());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let queue = CalculationQueue::new(config(1, 100));
        let handle = queue.enqueue(student("s1")).unwrap();
        assert_eq!(
            queue.get_task(handle.task_id).map(|t| t.status),
            Some(TaskStatus::Pending)
        );

        assert!(queue.cancel(handle.task_id).unwrap());
        let result = handle.clone().wait().await;
        assert!(result.message.starts_with("Cancelled"));
        assert!(queue.get_task(handle.task_id).is_none());

        let status = queue.queue_status();
        assert_eq!(status.pending, 0);
        assert_eq!(status.cancelled_total, 1);

        assert_matches!(queue.cancel(handle.task_id), Err(Error::TaskNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_running_is_noop() {
        let queue = CalculationQueue::new(config(1, 100));
        let executor = Arc::new(StubExecutor::with_delay(Duration::from_millis(100)));
        queue.start(executor.clone());

        let handle = queue.enqueue(student("s1")).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!queue.cancel(handle.task_id).unwrap());
        assert!(handle.wait().await.is_success());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue = CalculationQueue::new(config(1, 2));
        queue.enqueue(student("s1")).unwrap();
        queue.enqueue(student("s2")).unwrap();

        assert_matches!(
            queue.enqueue(student("s3")),
            Err(Error::QueueFull { capacity: 2 })
        );
        // Coalescing needs no new slot.
        assert!(queue.enqueue(student("s1")).unwrap().coalesced);
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending() {
        let queue = CalculationQueue::new(config(1, 100));
        let handle = queue
            .enqueue(CalculationRequest::program_averages("2025".into(), Some(Semester::First)))
            .unwrap();

        queue.shutdown().await;

        let result = handle.wait().await;
        assert!(result.message.starts_with("QueueShutdown"));
        assert!(queue.is_shutdown());
        assert_matches!(queue.enqueue(student("s1")), Err(Error::QueueShutdown));
        assert_eq!(queue.queue_status().pending, 0);
    }
}
