//! Grade Calculation Algorithms
//!
//! Pure, deterministic functions: no I/O, no caching, no concurrency.
//!
//! # Components
//!
//! - **Evaluation roles** (`evaluation.rs`): code → role table resolved at
//!   configuration time
//! - **Weighted grades** (`weighted.rs`): the per-subject CC/exam formula
//! - **Semester aggregation** (`semester.rs`): semester averages and the
//!   general average across semesters
//! - **Statistics** (`statistics.rs`): min/max/mean/median of a distribution
//! - **Mentions** (`mention.rs`): qualitative bands over an average
//!
//! Internal aggregation keeps full `f64` precision; [`round2`] is applied
//! only where averages are presented.

pub mod evaluation;
pub mod mention;
pub mod semester;
pub mod statistics;
pub mod weighted;

#[cfg(test)]
mod proptest;

pub use evaluation::{EvaluationRole, EvaluationRoles};
pub use mention::Mention;
pub use semester::{general_average, semester_calculation, SemesterCalculation};
pub use statistics::{class_statistics, ClassStatistics};
pub use weighted::{weighted_average, ResolvedAssessment, WeightedGradeCalculation};

use crate::error::{Error, Result};

/// Default grading scale maximum
pub const DEFAULT_SCALE_MAX: f64 = 20.0;

/// Coefficient applied when a subject has no credit weight
pub const DEFAULT_COEFFICIENT: f64 = 2.0;

/// Grading configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GradingConfig {
    /// Upper bound of a valid score
    pub scale_max: f64,
    /// Coefficient used when the source has none for a subject
    pub default_coefficient: f64,
    /// Evaluation-type code table
    pub evaluation_roles: EvaluationRoles,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            scale_max: DEFAULT_SCALE_MAX,
            default_coefficient: DEFAULT_COEFFICIENT,
            evaluation_roles: EvaluationRoles::default(),
        }
    }
}

impl GradingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.scale_max.is_finite() || self.scale_max <= 0.0 {
            return Err(Error::Config(format!(
                "scale_max must be a positive number, got {}",
                self.scale_max
            )));
        }
        if !self.default_coefficient.is_finite() || self.default_coefficient < 0.0 {
            return Err(Error::Config(format!(
                "default_coefficient must be non-negative, got {}",
                self.default_coefficient
            )));
        }
        self.evaluation_roles.validate()
    }
}

/// Round to 2 decimal places for display.
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
