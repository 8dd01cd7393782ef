//! Property-Based Tests for the grading algorithms
//!
//! # Test Properties
//!
//! 1. **Bounds**: weighted averages stay within `[0, scale_max / 2]`
//! 2. **Convexity**: a semester average lies between its lowest and highest course average
//! 3. **Single semester**: the general average of one semester is that semester's average
//! 4. **Order statistics**: min ≤ median ≤ max, min ≤ average ≤ max

#![cfg(test)]

use proptest::prelude::*;

use super::semester::{general_average, SemesterCalculation};
use super::statistics::class_statistics;
use super::weighted::{weighted_average, WeightedGradeCalculation};
use crate::domain::{Semester, SubjectId, SubjectNature};

const SCALE_MAX: f64 = 20.0;
const EPSILON: f64 = 1e-9;

// =============================================================================
// Property Strategies
// =============================================================================

fn score_strategy() -> impl Strategy<Value = f64> {
    0.0..=SCALE_MAX
}

/// (cc, exam, coefficient) triples with strictly positive coefficients.
fn course_strategy() -> impl Strategy<Value = (f64, f64, f64)> {
    (score_strategy(), score_strategy(), 0.5f64..10.0)
}

fn courses_strategy() -> impl Strategy<Value = Vec<(f64, f64, f64)>> {
    prop::collection::vec(course_strategy(), 1..12)
}

fn build_courses(raw: &[(f64, f64, f64)]) -> Vec<WeightedGradeCalculation> {
    raw.iter()
        .enumerate()
        .map(|(i, (cc, exam, coefficient))| {
            WeightedGradeCalculation::new(
                SubjectId::new(format!("S{}", i)),
                format!("Subject {}", i),
                *cc,
                *exam,
                *coefficient,
                SubjectNature::Fondamentale,
            )
        })
        .collect()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: weighted average is within the halved scale.
    #[test]
    fn prop_weighted_average_bounds(cc in score_strategy(), exam in score_strategy()) {
        let avg = weighted_average(cc, exam);
        prop_assert!(avg >= 0.0);
        prop_assert!(avg <= SCALE_MAX / 2.0 + EPSILON);
    }

    /// Property: semester average is a weighted mean of course averages.
    #[test]
    fn prop_semester_average_between_course_extremes(raw in courses_strategy()) {
        let courses = build_courses(&raw);
        let lo = courses.iter().map(|c| c.weighted_average).fold(f64::INFINITY, f64::min);
        let hi = courses.iter().map(|c| c.weighted_average).fold(f64::NEG_INFINITY, f64::max);

        let calc = SemesterCalculation::from_courses(Semester::First, courses);
        prop_assert!(calc.semester_average >= lo - EPSILON);
        prop_assert!(calc.semester_average <= hi + EPSILON);
    }

    /// Property: one semester alone passes through unchanged.
    #[test]
    fn prop_general_average_single_semester(raw in courses_strategy()) {
        let calc = SemesterCalculation::from_courses(Semester::Second, build_courses(&raw));
        prop_assert_eq!(general_average(Some(&calc), None), calc.semester_average);
        prop_assert_eq!(general_average(None, Some(&calc)), calc.semester_average);
    }

    /// Property: general average of two semesters lies between their averages.
    #[test]
    fn prop_general_average_between_semesters(a in courses_strategy(), b in courses_strategy()) {
        let s1 = SemesterCalculation::from_courses(Semester::First, build_courses(&a));
        let s2 = SemesterCalculation::from_courses(Semester::Second, build_courses(&b));
        let general = general_average(Some(&s1), Some(&s2));

        let lo = s1.semester_average.min(s2.semester_average);
        let hi = s1.semester_average.max(s2.semester_average);
        prop_assert!(general >= lo - EPSILON && general <= hi + EPSILON);
    }

    /// Property: order statistics are consistent.
    #[test]
    fn prop_class_statistics_ordering(grades in prop::collection::vec(score_strategy(), 1..50)) {
        let stats = class_statistics(&grades).expect("non-empty input");
        prop_assert_eq!(stats.count, grades.len());
        prop_assert!(stats.min <= stats.median && stats.median <= stats.max);
        prop_assert!(stats.min <= stats.average + EPSILON && stats.average <= stats.max + EPSILON);
    }
}
