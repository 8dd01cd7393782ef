//! Descriptive statistics over a published-grade distribution.

use serde::{Deserialize, Serialize};

/// Summary of one subject/period distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub median: f64,
    pub count: usize,
}

/// `None` for an empty distribution: "no grades yet" is not a zero average.
///
/// The median of an even-sized sample is the mean of the two middle values.
pub fn class_statistics(grades: &[f64]) -> Option<ClassStatistics> {
    if grades.is_empty() {
        return None;
    }

    let mut sorted = grades.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len();
    let mid = count / 2;
    let median = if count % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    Some(ClassStatistics {
        min: sorted[0],
        max: sorted[count - 1],
        average: sorted.iter().sum::<f64>() / count as f64,
        median,
        count,
    })
}
