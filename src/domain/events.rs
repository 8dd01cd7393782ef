//! Audit Events
//!
//! Immutable records of calculations the engine ran, published to the
//! audit/history sink. Every top-level calculation emits a start event
//! carrying a fresh correlation id and a complete event echoing it.
//!
//! # Example
//!
//! ```ignore
//! let (correlation_id, event) = AuditEvent::calculation_started(
//!     "student_averages",
//!     serde_json::json!({ "student_id": "s1", "academic_year_id": "2025-2026" }),
//! );
//! audit_sink.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit event representing a significant occurrence in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEvent {
    /// A top-level calculation started.
    CalculationStarted {
        correlation_id: Uuid,
        calculation_type: String,
        params: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// A top-level calculation finished.
    CalculationCompleted {
        correlation_id: Uuid,
        success: bool,
        affected_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Cache entries were dropped after a write or a recalculation.
    CacheInvalidated {
        scope: String,
        removed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A queued recalculation that asked for notification finished.
    RecalculationNotified {
        task_id: Uuid,
        operation: String,
        success: bool,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::CalculationStarted { .. } => "CalculationStarted",
            AuditEvent::CalculationCompleted { .. } => "CalculationCompleted",
            AuditEvent::CacheInvalidated { .. } => "CacheInvalidated",
            AuditEvent::RecalculationNotified { .. } => "RecalculationNotified",
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditEvent::CalculationStarted { timestamp, .. }
            | AuditEvent::CalculationCompleted { timestamp, .. }
            | AuditEvent::CacheInvalidated { timestamp, .. }
            | AuditEvent::RecalculationNotified { timestamp, .. } => *timestamp,
        }
    }

    /// Correlation id, for start/complete events.
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::CalculationStarted { correlation_id, .. }
            | AuditEvent::CalculationCompleted { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    /// Start event with a newly generated correlation id.
    pub fn calculation_started(
        calculation_type: impl Into<String>,
        params: serde_json::Value,
    ) -> (Uuid, Self) {
        let correlation_id = Uuid::new_v4();
        (
            correlation_id,
            AuditEvent::CalculationStarted {
                correlation_id,
                calculation_type: calculation_type.into(),
                params,
                timestamp: Utc::now(),
            },
        )
    }

    pub fn calculation_completed(
        correlation_id: Uuid,
        success: bool,
        affected_count: usize,
        duration_ms: u64,
    ) -> Self {
        AuditEvent::CalculationCompleted {
            correlation_id,
            success,
            affected_count,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn cache_invalidated(scope: impl Into<String>, removed: usize) -> Self {
        AuditEvent::CacheInvalidated {
            scope: scope.into(),
            removed,
            timestamp: Utc::now(),
        }
    }

    pub fn recalculation_notified(
        task_id: Uuid,
        operation: impl Into<String>,
        success: bool,
        message: impl Into<String>,
    ) -> Self {
        AuditEvent::RecalculationNotified {
            task_id,
            operation: operation.into(),
            success,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
