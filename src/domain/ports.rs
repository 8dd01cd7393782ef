//! Domain Ports (Port/Adapter Pattern)
//!
//! Value objects shared by every component, plus the traits for the two
//! external collaborators the engine talks to: the raw grade source and
//! the audit/history sink.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │           GradeSource      │      AuditSink          │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  InMemoryGradeSource │ LoggingAuditSink │ Collector  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::AuditEvent;
use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(pub String);

        impl $name {
            /// Surrounding whitespace is dropped so ids typed by hand and ids
            /// read from the store compare equal.
            pub fn new(id: impl Into<String>) -> Self {
                let id = id.into();
                let trimmed = id.trim();
                if trimmed.len() == id.len() {
                    Self(id)
                } else {
                    Self(trimmed.to_string())
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(
    /// Student identifier (value object).
    StudentId
);

string_id!(
    /// Academic period identifier, e.g. `"2025-2026"` (value object).
    AcademicYearId
);

string_id!(
    /// Subject (course unit) identifier (value object).
    SubjectId
);

/// Semester of an academic year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Semester {
    First,
    Second,
}

impl Semester {
    /// Both semesters, in order.
    pub const ALL: [Semester; 2] = [Semester::First, Semester::Second];

    /// Ordinal (1 or 2).
    pub fn ordinal(self) -> u8 {
        match self {
            Semester::First => 1,
            Semester::Second => 2,
        }
    }
}

impl TryFrom<u8> for Semester {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Semester::First),
            2 => Ok(Semester::Second),
            other => Err(Error::Config(format!(
                "semester must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<Semester> for u8 {
    fn from(semester: Semester) -> Self {
        semester.ordinal()
    }
}

impl std::fmt::Display for Semester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ordinal())
    }
}

/// Subject classification used by downstream compensation rules.
/// Carried through the engine untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectNature {
    #[default]
    Fondamentale,
    Complementaire,
}

impl std::fmt::Display for SubjectNature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectNature::Fondamentale => write!(f, "fondamentale"),
            SubjectNature::Complementaire => write!(f, "complementaire"),
        }
    }
}

/// One raw assessment row as returned by the grade source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub student_id: StudentId,
    pub academic_year_id: AcademicYearId,
    pub semester: Semester,
    pub subject_id: SubjectId,
    pub subject_name: String,
    /// Evaluation-type code as stored ("CC", "EF", "examen", ...)
    pub evaluation_type: String,
    pub score: f64,
    /// Credit weight; the configured default applies when absent
    #[serde(default)]
    pub coefficient: Option<f64>,
    #[serde(default)]
    pub nature: SubjectNature,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

// =============================================================================
// Grade Source Port
// =============================================================================

/// Port for the persistent grade store.
///
/// The engine only reads through this trait; it never writes grades back.
#[async_trait]
pub trait GradeSource: Send + Sync {
    /// Published assessment rows for a student in an academic year,
    /// optionally restricted to one semester.
    async fn fetch_assessments(
        &self,
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<Vec<AssessmentRecord>>;

    /// Published scores of every student for one subject and period.
    async fn fetch_published_scores(
        &self,
        subject_id: &SubjectId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<Vec<f64>>;

    /// Students enrolled in the program for an academic year.
    async fn fetch_program_members(&self, academic_year_id: &AcademicYearId)
        -> Result<Vec<StudentId>>;

    /// Check if the grade source is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Audit Sink Port
// =============================================================================

/// Port for the audit/history sink.
///
/// Publishing is fire-and-forget from the engine's point of view: callers
/// log a failed publish and carry on.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Publish an audit event.
    async fn publish(&self, event: AuditEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<AuditEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_trimmed() {
        let id = StudentId::new("  stu-42 ");
        assert_eq!(id.as_str(), "stu-42");
        assert_eq!(id, StudentId::from("stu-42"));
        assert_eq!(id.to_string(), "stu-42");
    }

    #[test]
    fn test_semester_conversion() {
        assert_eq!(Semester::try_from(1).unwrap(), Semester::First);
        assert_eq!(Semester::try_from(2).unwrap(), Semester::Second);
        assert!(Semester::try_from(3).is_err());
        assert_eq!(u8::from(Semester::Second), 2);
        assert_eq!(Semester::First.to_string(), "1");
    }

    #[test]
    fn test_assessment_record_deserializes_with_defaults() {
        let json = r#"{
            "student_id": "s1",
            "academic_year_id": "2025-2026",
            "semester": 2,
            "subject_id": "MATH101",
            "subject_name": "Analyse",
            "evaluation_type": "CC",
            "score": 14.5
        }"#;

        let record: AssessmentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.semester, Semester::Second);
        assert_eq!(record.coefficient, None);
        assert_eq!(record.nature, SubjectNature::Fondamentale);
        assert!(record.published);
    }

    #[test]
    fn test_ids_trimmed_when_deserialized() {
        let json = r#"{
            "student_id": " s1 ",
            "academic_year_id": "2025-2026\t",
            "semester": 1,
            "subject_id": " MATH101",
            "subject_name": "Analyse",
            "evaluation_type": "EF",
            "score": 12.0
        }"#;

        let record: AssessmentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.student_id, StudentId::new("s1"));
        assert_eq!(record.academic_year_id, AcademicYearId::new("2025-2026"));
        assert_eq!(record.subject_id, SubjectId::new("MATH101"));
        assert_eq!(serde_json::to_string(&record.student_id).unwrap(), r#""s1""#);
    }

    #[test]
    fn test_invalid_semester_rejected() {
        let json = r#"{
            "student_id": "s1",
            "academic_year_id": "y",
            "semester": 5,
            "subject_id": "X",
            "subject_name": "X",
            "evaluation_type": "CC",
            "score": 1.0
        }"#;
        assert!(serde_json::from_str::<AssessmentRecord>(json).is_err());
    }

    #[test]
    fn test_subject_nature_display() {
        assert_eq!(SubjectNature::Fondamentale.to_string(), "fondamentale");
        assert_eq!(SubjectNature::Complementaire.to_string(), "complementaire");
    }
}
