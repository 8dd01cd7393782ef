//! Queue task types

use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::domain::{AcademicYearId, Semester, StudentId, SubjectId};
use crate::error::Error;

/// Unique per enqueue
pub type TaskId = Uuid;

// =============================================================================
// Requests
// =============================================================================

/// What a queued task computes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculationKind {
    /// Recompute one student's averages
    StudentAverages {
        student_id: StudentId,
        academic_year_id: AcademicYearId,
        #[serde(default)]
        semester: Option<Semester>,
    },

    /// Recompute every member of the program for a period
    ProgramAverages {
        academic_year_id: AcademicYearId,
        #[serde(default)]
        semester: Option<Semester>,
    },

    /// Recompute one subject's grade distribution
    ClassStatistics {
        subject_id: SubjectId,
        academic_year_id: AcademicYearId,
        #[serde(default)]
        semester: Option<Semester>,
    },
}

impl CalculationKind {
    /// Canonical key, shared with the cache.
    pub fn key(&self) -> CacheKey {
        match self {
            CalculationKind::StudentAverages {
                student_id,
                academic_year_id,
                semester,
            } => CacheKey::student_averages(student_id, academic_year_id, *semester),
            CalculationKind::ProgramAverages {
                academic_year_id,
                semester,
            } => CacheKey::program_averages(academic_year_id, *semester),
            CalculationKind::ClassStatistics {
                subject_id,
                academic_year_id,
                semester,
            } => CacheKey::class_statistics(subject_id, academic_year_id, *semester),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CalculationKind::StudentAverages { .. } => "student_averages",
            CalculationKind::ProgramAverages { .. } => "program_averages",
            CalculationKind::ClassStatistics { .. } => "class_statistics",
        }
    }

    pub fn academic_year_id(&self) -> &AcademicYearId {
        match self {
            CalculationKind::StudentAverages {
                academic_year_id, ..
            }
            | CalculationKind::ProgramAverages {
                academic_year_id, ..
            }
            | CalculationKind::ClassStatistics {
                academic_year_id, ..
            } => academic_year_id,
        }
    }
}

/// Per-request flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Caller does not wait for the result
    #[serde(default, rename = "async")]
    pub run_async: bool,

    /// Emit a notification audit event when the task finishes
    #[serde(default)]
    pub notify_on_completion: bool,
}

/// A calculation request submitted to the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRequest {
    #[serde(flatten)]
    pub kind: CalculationKind,
    #[serde(default)]
    pub options: TaskOptions,
}

impl CalculationRequest {
    pub fn new(kind: CalculationKind) -> Self {
        Self {
            kind,
            options: TaskOptions::default(),
        }
    }

    pub fn student_averages(
        student_id: StudentId,
        academic_year_id: AcademicYearId,
        semester: Option<Semester>,
    ) -> Self {
        Self::new(CalculationKind::StudentAverages {
            student_id,
            academic_year_id,
            semester,
        })
    }

    pub fn program_averages(academic_year_id: AcademicYearId, semester: Option<Semester>) -> Self {
        Self::new(CalculationKind::ProgramAverages {
            academic_year_id,
            semester,
        })
    }

    pub fn class_statistics(
        subject_id: SubjectId,
        academic_year_id: AcademicYearId,
        semester: Option<Semester>,
    ) -> Self {
        Self::new(CalculationKind::ClassStatistics {
            subject_id,
            academic_year_id,
            semester,
        })
    }

    pub fn run_async(mut self, run_async: bool) -> Self {
        self.options.run_async = run_async;
        self
    }

    pub fn notify_on_completion(mut self, notify: bool) -> Self {
        self.options.notify_on_completion = notify;
        self
    }

    #[inline]
    pub fn key(&self) -> CacheKey {
        self.kind.key()
    }
}

// =============================================================================
// Task State
// =============================================================================

/// Status of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a task held by the queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueTask {
    pub id: TaskId,
    pub request: CalculationRequest,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Enqueues that attached to this task instead of creating a new one
    pub coalesced: usize,
}

impl QueueTask {
    pub fn new(request: CalculationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            coalesced: 0,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Terminal outcome delivered to every holder of a [`TaskHandle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub status: ResultStatus,
    pub message: String,
    pub affected_count: usize,
}

impl CalculationResult {
    pub fn success(affected_count: usize, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Success,
            message: message.into(),
            affected_count,
        }
    }

    /// Failure carrying the error kind in its message.
    pub fn failure(error: &Error) -> Self {
        Self {
            status: ResultStatus::Error,
            message: format!("{}: {}", error.kind(), error),
            affected_count: 0,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ResultStatus::Error,
            message: "Cancelled: task cancelled before execution".to_string(),
            affected_count: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Awaitable handle to a queued task.
///
/// Cloning is cheap and every clone resolves to the same result. Dropping
/// the handle does not cancel the task.
#[derive(Clone)]
pub struct TaskHandle {
    pub task_id: TaskId,
    /// True when this enqueue attached to an existing task
    pub coalesced: bool,
    pub(crate) future: Shared<BoxFuture<'static, CalculationResult>>,
}

impl TaskHandle {
    pub async fn wait(self) -> CalculationResult {
        self.future.await
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("coalesced", &self.coalesced)
            .finish()
    }
}
