//! Domain Layer
//!
//! Value objects, port traits for the external collaborators and the audit
//! events the engine emits.
//!
//! - **Ports** (`ports.rs`) - `GradeSource` and `AuditSink` abstractions
//! - **Events** (`events.rs`) - audit events for calculation history
//!
//! # Usage
//!
//! ```ignore
//! use gradebook_engine::domain::{GradeSource, StudentId, AcademicYearId};
//!
//! async fn count_rows<S: GradeSource>(source: &S) -> Result<usize> {
//!     let rows = source
//!         .fetch_assessments(&StudentId::new("s1"), &AcademicYearId::new("2025-2026"), None)
//!         .await?;
//!     Ok(rows.len())
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::AuditEvent;
pub use ports::{
    AcademicYearId, AssessmentRecord, AuditSink, GradeSource, Semester, StudentId, SubjectId,
    SubjectNature,
};
