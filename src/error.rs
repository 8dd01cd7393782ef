//! Error types for the grade calculation engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the grade calculation engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Score outside [0, scale_max]
    #[error("Grade {score} for subject {subject} is outside the range [0, {max}]")]
    InvalidGradeRange {
        subject: String,
        score: f64,
        max: f64,
    },

    /// Negative or non-finite coefficient
    #[error("Invalid coefficient {coefficient} for subject {subject}")]
    InvalidCoefficient { subject: String, coefficient: f64 },

    /// Evaluation-type mapping absent for a code or a role
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// External raw-data fetch failed
    #[error("Grade data unavailable: {0}")]
    DataUnavailable(String),

    /// Statistics requested over zero grades
    #[error("No published grades for subject {subject}")]
    EmptyDistribution { subject: String },

    /// External fetch exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// Pending queue is at capacity
    #[error("Calculation queue is full ({capacity} pending tasks)")]
    QueueFull { capacity: usize },

    /// Queue no longer accepts or runs tasks
    #[error("Calculation queue is shut down")]
    QueueShutdown,

    /// A caller would wait on a queue whose workers were never started
    #[error("Calculation queue has no running workers")]
    QueueNotStarted,

    /// Unknown task id
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    // =========================================================================
    // Configuration / IO Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Validation failures are detected before any algorithm runs and are
    /// never cached or retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidGradeRange { .. }
                | Error::InvalidCoefficient { .. }
                | Error::ConfigurationMissing(_)
        )
    }

    /// Short machine-readable kind, used in task failure messages and audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidGradeRange { .. } => "InvalidGradeRange",
            Error::InvalidCoefficient { .. } => "InvalidCoefficient",
            Error::ConfigurationMissing(_) => "ConfigurationMissing",
            Error::DataUnavailable(_) => "DataUnavailable",
            Error::EmptyDistribution { .. } => "EmptyDistribution",
            Error::Timeout { .. } => "Timeout",
            Error::QueueFull { .. } => "QueueFull",
            Error::QueueShutdown => "QueueShutdown",
            Error::QueueNotStarted => "QueueNotStarted",
            Error::TaskNotFound(_) => "TaskNotFound",
            Error::Config(_) => "Config",
            Error::DurationParse(_) => "DurationParse",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
            Error::Yaml(_) => "Yaml",
            Error::Internal(_) => "Internal",
        }
    }
}
