//! Student average results

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AcademicYearId, Semester, StudentId, SubjectId};
use crate::grading::{
    general_average, round2, semester_calculation, ClassStatistics, Mention, ResolvedAssessment,
    SemesterCalculation,
};

/// A student's averages for one semester or the whole academic year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAverages {
    pub student_id: StudentId,
    pub academic_year_id: AcademicYearId,
    /// `None` for the whole year
    pub semester: Option<Semester>,
    pub subject_averages: HashMap<SubjectId, f64>,
    pub overall_average: f64,
    /// Sum of the coefficients of counted subjects
    pub total_credits: f64,
    /// Computation time, for display only
    pub calculated_at: DateTime<Utc>,
    /// Semester aggregates the overall average was built from
    pub semesters: Vec<SemesterCalculation>,
}

impl StudentAverages {
    /// Aggregate resolved rows for one semester, or for both when
    /// `semester` is `None`.
    pub fn compute(
        student_id: StudentId,
        academic_year_id: AcademicYearId,
        semester: Option<Semester>,
        rows: &[ResolvedAssessment],
        default_coefficient: f64,
    ) -> Self {
        let semesters: Vec<SemesterCalculation> = match semester {
            Some(s) => vec![semester_calculation(s, rows, default_coefficient)],
            None => Semester::ALL
                .iter()
                .map(|s| semester_calculation(*s, rows, default_coefficient))
                .filter(|calc| !calc.is_empty())
                .collect(),
        };

        let overall_average = match semesters.as_slice() {
            [] => 0.0,
            [only] => general_average(Some(only), None),
            [first, second, ..] => general_average(Some(first), Some(second)),
        };

        Self {
            student_id,
            academic_year_id,
            semester,
            subject_averages: subject_averages(&semesters),
            overall_average,
            total_credits: semesters.iter().map(|s| s.total_coefficients).sum(),
            calculated_at: Utc::now(),
            semesters,
        }
    }

    /// Overall average rounded for display.
    pub fn display_average(&self) -> f64 {
        round2(self.overall_average)
    }

    pub fn mention(&self, scale_max: f64) -> Mention {
        Mention::from_average(self.overall_average, scale_max)
    }

    pub fn subject_count(&self) -> usize {
        self.subject_averages.len()
    }
}

/// Per-subject `Σ total / Σ coefficient` across the given semesters.
fn subject_averages(semesters: &[SemesterCalculation]) -> HashMap<SubjectId, f64> {
    let mut sums: HashMap<SubjectId, (f64, f64)> = HashMap::new();
    for course in semesters.iter().flat_map(|s| s.courses.iter()) {
        let entry = sums.entry(course.subject_id.clone()).or_insert((0.0, 0.0));
        entry.0 += course.total;
        entry.1 += course.coefficient;
    }

    // A lone zero-coefficient course still reports its own average.
    let single: HashMap<&SubjectId, f64> = semesters
        .iter()
        .flat_map(|s| s.courses.iter())
        .map(|c| (&c.subject_id, c.weighted_average))
        .collect();

    sums.iter()
        .map(|(subject, (points, coefficients))| {
            let average = if *coefficients == 0.0 {
                single.get(subject).copied().unwrap_or(0.0)
            } else {
                points / coefficients
            };
            (subject.clone(), average)
        })
        .collect()
}

/// Per-student failure inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub student_id: StudentId,
    pub error_kind: String,
    pub message: String,
}

/// Result of a batch lookup.
#[derive(Debug, Clone, Serialize)]
pub struct BatchAverages {
    pub academic_year_id: AcademicYearId,
    pub semester: Option<Semester>,
    /// In request order, duplicates removed
    pub results: Vec<Arc<StudentAverages>>,
    pub failures: Vec<BatchFailure>,
    /// Served from cache without computation
    pub cached_count: usize,
    pub computed_count: usize,
}

impl BatchAverages {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn get(&self, student_id: &StudentId) -> Option<&StudentAverages> {
        self.results
            .iter()
            .find(|r| &r.student_id == student_id)
            .map(|r| r.as_ref())
    }
}

/// Value type held by the calculation cache.
#[derive(Debug, Clone)]
pub enum CachedCalculation {
    StudentAverages(Arc<StudentAverages>),
    ClassStatistics(ClassStatistics),
}
