//! Semester aggregation and the general average across semesters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::evaluation::EvaluationRole;
use super::weighted::{ResolvedAssessment, WeightedGradeCalculation};
use crate::domain::{Semester, SubjectId, SubjectNature};

/// Aggregate of one semester's weighted subject grades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemesterCalculation {
    pub semester: Semester,
    /// Display order only; the aggregate does not depend on it.
    pub courses: Vec<WeightedGradeCalculation>,
    /// `Σ total / Σ coefficient`, 0 when the coefficient sum is 0
    pub semester_average: f64,
    pub total_coefficients: f64,
    pub total_points: f64,
}

impl SemesterCalculation {
    /// Aggregate already-weighted courses.
    pub fn from_courses(semester: Semester, courses: Vec<WeightedGradeCalculation>) -> Self {
        let total_points: f64 = courses.iter().map(|c| c.total).sum();
        let total_coefficients: f64 = courses.iter().map(|c| c.coefficient).sum();
        let semester_average = if total_coefficients == 0.0 {
            0.0
        } else {
            total_points / total_coefficients
        };

        Self {
            semester,
            courses,
            semester_average,
            total_coefficients,
            total_points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    /// Course for a subject, if it was graded this semester.
    pub fn course(&self, subject_id: &SubjectId) -> Option<&WeightedGradeCalculation> {
        self.courses.iter().find(|c| &c.subject_id == subject_id)
    }
}

#[derive(Debug)]
struct SubjectAccumulator {
    subject_id: SubjectId,
    subject_name: String,
    nature: SubjectNature,
    coefficient: Option<f64>,
    cc_sum: f64,
    cc_count: usize,
    exam_sum: f64,
    exam_count: usize,
}

impl SubjectAccumulator {
    fn new(row: &ResolvedAssessment) -> Self {
        Self {
            subject_id: row.subject_id.clone(),
            subject_name: row.subject_name.clone(),
            nature: row.nature,
            coefficient: None,
            cc_sum: 0.0,
            cc_count: 0,
            exam_sum: 0.0,
            exam_count: 0,
        }
    }

    fn add(&mut self, row: &ResolvedAssessment) {
        if self.coefficient.is_none() {
            self.coefficient = row.coefficient;
        }
        match row.role {
            EvaluationRole::ContinuousAssessment => {
                self.cc_sum += row.score;
                self.cc_count += 1;
            }
            EvaluationRole::FinalExam => {
                self.exam_sum += row.score;
                self.exam_count += 1;
            }
        }
    }

    fn mean(sum: f64, count: usize) -> f64 {
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    fn finish(self, default_coefficient: f64) -> WeightedGradeCalculation {
        WeightedGradeCalculation::new(
            self.subject_id,
            self.subject_name,
            Self::mean(self.cc_sum, self.cc_count),
            Self::mean(self.exam_sum, self.exam_count),
            self.coefficient.unwrap_or(default_coefficient),
            self.nature,
        )
    }
}

/// Group a semester's rows by subject and aggregate them.
///
/// Rows from other semesters are skipped. Several rows of the same role for
/// one subject are averaged; a missing component contributes 0. The first
/// explicit coefficient seen for a subject wins, otherwise
/// `default_coefficient` applies.
pub fn semester_calculation(
    semester: Semester,
    rows: &[ResolvedAssessment],
    default_coefficient: f64,
) -> SemesterCalculation {
    let mut order: Vec<SubjectAccumulator> = Vec::new();
    let mut index: HashMap<&SubjectId, usize> = HashMap::new();

    for row in rows.iter().filter(|r| r.semester == semester) {
        let slot = *index.entry(&row.subject_id).or_insert_with(|| {
            order.push(SubjectAccumulator::new(row));
            order.len() - 1
        });
        order[slot].add(row);
    }

    let courses = order
        .into_iter()
        .map(|acc| acc.finish(default_coefficient))
        .collect();

    SemesterCalculation::from_courses(semester, courses)
}

/// Combine up to two semesters.
///
/// One semester: its own average. Both: pooled points over pooled
/// coefficients (0 if that sum is 0). Neither: 0.
pub fn general_average(
    semester_1: Option<&SemesterCalculation>,
    semester_2: Option<&SemesterCalculation>,
) -> f64 {
    match (semester_1, semester_2) {
        (Some(s1), Some(s2)) => {
            let coefficients = s1.total_coefficients + s2.total_coefficients;
            if coefficients == 0.0 {
                0.0
            } else {
                (s1.total_points + s2.total_points) / coefficients
            }
        }
        (Some(only), None) | (None, Some(only)) => only.semester_average,
        (None, None) => 0.0,
    }
}
