//! Input validation
//!
//! Raw rows are checked and their evaluation codes resolved to roles before
//! any algorithm sees them.

use crate::domain::AssessmentRecord;
use crate::error::{Error, Result};
use crate::grading::{GradingConfig, ResolvedAssessment};

/// Reject scores outside `[0, scale_max]` (NaN included).
pub fn validate_score(subject: &str, score: f64, scale_max: f64) -> Result<()> {
    if score.is_finite() && (0.0..=scale_max).contains(&score) {
        Ok(())
    } else {
        Err(Error::InvalidGradeRange {
            subject: subject.to_string(),
            score,
            max: scale_max,
        })
    }
}

/// Reject negative or non-finite coefficients.
pub fn validate_coefficient(subject: &str, coefficient: f64) -> Result<()> {
    if coefficient.is_finite() && coefficient >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidCoefficient {
            subject: subject.to_string(),
            coefficient,
        })
    }
}

/// Validate published rows and resolve their evaluation roles.
///
/// Unpublished rows are skipped. The first invalid row fails the whole set.
pub fn resolve_assessments(
    rows: &[AssessmentRecord],
    grading: &GradingConfig,
) -> Result<Vec<ResolvedAssessment>> {
    rows.iter()
        .filter(|row| row.published)
        .map(|row| {
            let subject = row.subject_id.as_str();
            validate_score(subject, row.score, grading.scale_max)?;
            if let Some(coefficient) = row.coefficient {
                validate_coefficient(subject, coefficient)?;
            }
            let role = grading.evaluation_roles.resolve(&row.evaluation_type)?;

            Ok(ResolvedAssessment {
                subject_id: row.subject_id.clone(),
                subject_name: row.subject_name.clone(),
                semester: row.semester,
                role,
                score: row.score,
                coefficient: row.coefficient,
                nature: row.nature,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Semester, SubjectNature};
    use crate::grading::EvaluationRole;
    use assert_matches::assert_matches;

    fn row(code: &str, score: f64, coefficient: Option<f64>) -> AssessmentRecord {
        AssessmentRecord {
            student_id: "s1".into(),
            academic_year_id: "2025".into(),
            semester: Semester::First,
            subject_id: "MATH".into(),
            subject_name: "Maths".into(),
            evaluation_type: code.into(),
            score,
            coefficient,
            nature: SubjectNature::Fondamentale,
            published: true,
        }
    }

    #[test]
    fn test_score_bounds() {
        assert!(validate_score("MATH", 0.0, 20.0).is_ok());
        assert!(validate_score("MATH", 20.0, 20.0).is_ok());
        assert_matches!(
            validate_score("MATH", 20.5, 20.0),
            Err(Error::InvalidGradeRange { score, max, .. }) if score == 20.5 && max == 20.0
        );
        assert!(validate_score("MATH", -0.1, 20.0).is_err());
        assert!(validate_score("MATH", f64::NAN, 20.0).is_err());
    }

    #[test]
    fn test_resolves_roles() {
        let rows = vec![row("CC", 12.0, Some(3.0)), row(" Examen ", 15.0, None)];
        let resolved = resolve_assessments(&rows, &GradingConfig::default()).unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].role, EvaluationRole::ContinuousAssessment);
        assert_eq!(resolved[1].role, EvaluationRole::FinalExam);
        assert_eq!(resolved[1].coefficient, None);
    }

    #[test]
    fn test_rejects_unmapped_code() {
        let rows = vec![row("TP", 12.0, None)];
        assert_matches!(
            resolve_assessments(&rows, &GradingConfig::default()),
            Err(Error::ConfigurationMissing(_))
        );
    }

    #[test]
    fn test_rejects_bad_rows() {
        let grading = GradingConfig::default();
        assert_matches!(
            resolve_assessments(&[row("CC", 25.0, None)], &grading),
            Err(Error::InvalidGradeRange { .. })
        );
        assert_matches!(
            resolve_assessments(&[row("CC", 12.0, Some(-1.0))], &grading),
            Err(Error::InvalidCoefficient { .. })
        );
    }

    #[test]
    fn test_skips_unpublished() {
        let mut draft = row("CC", 99.0, None);
        draft.published = false;
        let resolved = resolve_assessments(&[draft], &GradingConfig::default()).unwrap();
        assert!(resolved.is_empty());
    }
}
