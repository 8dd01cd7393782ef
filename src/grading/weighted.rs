//! Weighted subject grades
//!
//! Per-subject combination of the continuous-assessment and final-exam
//! components.

use serde::{Deserialize, Serialize};

use super::evaluation::EvaluationRole;
use crate::domain::{Semester, SubjectId, SubjectNature};

/// Weight of the continuous-assessment component.
pub const CC_WEIGHT: f64 = 0.4;

/// Weight of the final-exam component.
pub const EXAM_WEIGHT: f64 = 0.6;

/// Divisor applied after weighting. Halves the effective scale
/// (20/20 on both components gives 10); kept until the product owner
/// confirms the intended formula.
pub const WEIGHTED_DIVISOR: f64 = 2.0;

/// `((cc × 0.4) + (exam × 0.6)) / 2`
///
/// Inputs are expected in `[0, scale_max]`; range validation happens
/// before this is called.
#[inline]
pub fn weighted_average(cc: f64, exam: f64) -> f64 {
    ((cc * CC_WEIGHT) + (exam * EXAM_WEIGHT)) / WEIGHTED_DIVISOR
}

/// An assessment row after validation and role resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAssessment {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub semester: Semester,
    pub role: EvaluationRole,
    pub score: f64,
    pub coefficient: Option<f64>,
    pub nature: SubjectNature,
}

/// Weighted grade for one subject in one semester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedGradeCalculation {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub cc_grade: f64,
    pub exam_grade: f64,
    pub weighted_average: f64,
    pub coefficient: f64,
    /// `weighted_average × coefficient`
    pub total: f64,
    pub nature: SubjectNature,
}

impl WeightedGradeCalculation {
    /// Compute the weighted average and total from the two components.
    pub fn new(
        subject_id: SubjectId,
        subject_name: impl Into<String>,
        cc_grade: f64,
        exam_grade: f64,
        coefficient: f64,
        nature: SubjectNature,
    ) -> Self {
        let weighted = weighted_average(cc_grade, exam_grade);
        Self {
            subject_id,
            subject_name: subject_name.into(),
            cc_grade,
            exam_grade,
            weighted_average: weighted,
            coefficient,
            total: weighted * coefficient,
            nature,
        }
    }
}
