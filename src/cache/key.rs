//! Canonical cache keys
//!
//! A key is an operation name plus a normalized parameter tuple. Keys are
//! built field by field, so call-site argument order cannot change them,
//! and an absent semester is always the literal scope "all".

use crate::domain::{AcademicYearId, Semester, StudentId, SubjectId};

/// Operation name for per-student averages
pub const STUDENT_AVERAGES: &str = "student_averages";

/// Operation name for subject distribution statistics
pub const CLASS_STATISTICS: &str = "class_statistics";

/// Operation name for a whole-program recalculation
pub const PROGRAM_AVERAGES: &str = "program_averages";

/// Semester part of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemesterScope {
    All,
    Only(Semester),
}

impl From<Option<Semester>> for SemesterScope {
    fn from(semester: Option<Semester>) -> Self {
        match semester {
            Some(s) => SemesterScope::Only(s),
            None => SemesterScope::All,
        }
    }
}

impl SemesterScope {
    pub fn semester(self) -> Option<Semester> {
        match self {
            SemesterScope::All => None,
            SemesterScope::Only(s) => Some(s),
        }
    }
}

impl std::fmt::Display for SemesterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemesterScope::All => write!(f, "all"),
            SemesterScope::Only(s) => write!(f, "{}", s),
        }
    }
}

/// Canonical (operation, parameters) key shared by the cache and the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: String,
    student_id: Option<StudentId>,
    academic_year_id: Option<AcademicYearId>,
    subject_id: Option<SubjectId>,
    semester: SemesterScope,
}

impl CacheKey {
    /// Key for an operation with no parameters yet.
    pub fn new(operation: impl AsRef<str>) -> Self {
        Self {
            operation: operation.as_ref().trim().to_lowercase(),
            student_id: None,
            academic_year_id: None,
            subject_id: None,
            semester: SemesterScope::All,
        }
    }

    pub fn student_averages(
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Self {
        Self::new(STUDENT_AVERAGES)
            .with_student(student_id.clone())
            .with_academic_year(academic_year_id.clone())
            .with_semester(semester)
    }

    pub fn class_statistics(
        subject_id: &SubjectId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Self {
        Self::new(CLASS_STATISTICS)
            .with_subject(subject_id.clone())
            .with_academic_year(academic_year_id.clone())
            .with_semester(semester)
    }

    pub fn program_averages(academic_year_id: &AcademicYearId, semester: Option<Semester>) -> Self {
        Self::new(PROGRAM_AVERAGES)
            .with_academic_year(academic_year_id.clone())
            .with_semester(semester)
    }

    pub fn with_student(mut self, student_id: StudentId) -> Self {
        self.student_id = Some(student_id);
        self
    }

    pub fn with_academic_year(mut self, academic_year_id: AcademicYearId) -> Self {
        self.academic_year_id = Some(academic_year_id);
        self
    }

    pub fn with_subject(mut self, subject_id: SubjectId) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn with_semester(mut self, semester: Option<Semester>) -> Self {
        self.semester = semester.into();
        self
    }

    #[inline]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[inline]
    pub fn student_id(&self) -> Option<&StudentId> {
        self.student_id.as_ref()
    }

    #[inline]
    pub fn academic_year_id(&self) -> Option<&AcademicYearId> {
        self.academic_year_id.as_ref()
    }

    #[inline]
    pub fn subject_id(&self) -> Option<&SubjectId> {
        self.subject_id.as_ref()
    }

    #[inline]
    pub fn semester(&self) -> SemesterScope {
        self.semester
    }

    pub fn references_student(&self, student_id: &StudentId) -> bool {
        self.student_id.as_ref() == Some(student_id)
    }

    pub fn references_academic_year(&self, academic_year_id: &AcademicYearId) -> bool {
        self.academic_year_id.as_ref() == Some(academic_year_id)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn part<T: std::fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string())
        }

        write!(
            f,
            "{}|student={}|year={}|subject={}|semester={}",
            self.operation,
            part(&self.student_id),
            part(&self.academic_year_id),
            part(&self.subject_id),
            self.semester
        )
    }
}
