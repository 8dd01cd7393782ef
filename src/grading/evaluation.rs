//! Evaluation roles
//!
//! Raw rows carry a free-form evaluation-type code. The code is mapped to a
//! role once, through the table configured here, instead of being matched
//! by substring at every aggregation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Semantic role of an assessment component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationRole {
    /// Continuous assessment ("CC")
    ContinuousAssessment,
    /// Final examination ("EF")
    FinalExam,
}

impl std::fmt::Display for EvaluationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationRole::ContinuousAssessment => write!(f, "continuous_assessment"),
            EvaluationRole::FinalExam => write!(f, "final_exam"),
        }
    }
}

/// Evaluation-type code to role table.
///
/// Codes are compared trimmed and case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRoles {
    codes: HashMap<String, EvaluationRole>,
}

impl Default for EvaluationRoles {
    fn default() -> Self {
        Self::empty()
            .with_code("cc", EvaluationRole::ContinuousAssessment)
            .with_code("continu", EvaluationRole::ContinuousAssessment)
            .with_code("controle continu", EvaluationRole::ContinuousAssessment)
            .with_code("ef", EvaluationRole::FinalExam)
            .with_code("ex", EvaluationRole::FinalExam)
            .with_code("examen", EvaluationRole::FinalExam)
            .with_code("final", EvaluationRole::FinalExam)
    }
}

impl EvaluationRoles {
    /// Table with no codes at all.
    pub fn empty() -> Self {
        Self {
            codes: HashMap::new(),
        }
    }

    /// Build a table from code lists, failing if either role ends up unmapped.
    pub fn from_codes<S: AsRef<str>>(continuous: &[S], final_exam: &[S]) -> Result<Self> {
        let mut roles = Self::empty();
        for code in continuous {
            roles.insert(code.as_ref(), EvaluationRole::ContinuousAssessment);
        }
        for code in final_exam {
            roles.insert(code.as_ref(), EvaluationRole::FinalExam);
        }
        roles.validate()?;
        Ok(roles)
    }

    /// Add a code mapping (builder style).
    pub fn with_code(mut self, code: &str, role: EvaluationRole) -> Self {
        self.insert(code, role);
        self
    }

    /// Add or replace a code mapping.
    pub fn insert(&mut self, code: &str, role: EvaluationRole) {
        self.codes.insert(normalize(code), role);
    }

    /// Resolve a raw code to its role.
    pub fn resolve(&self, code: &str) -> Result<EvaluationRole> {
        self.codes.get(&normalize(code)).copied().ok_or_else(|| {
            Error::ConfigurationMissing(format!(
                "no evaluation role mapped for evaluation type '{}'",
                code.trim()
            ))
        })
    }

    /// Both roles must have at least one code.
    pub fn validate(&self) -> Result<()> {
        for role in [EvaluationRole::ContinuousAssessment, EvaluationRole::FinalExam] {
            if !self.codes.values().any(|r| *r == role) {
                return Err(Error::ConfigurationMissing(format!(
                    "no evaluation type code mapped to role {}",
                    role
                )));
            }
        }
        Ok(())
    }

    /// Codes mapped to a role, sorted.
    pub fn codes_for(&self, role: EvaluationRole) -> Vec<&str> {
        let mut codes: Vec<&str> = self
            .codes
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(code, _)| code.as_str())
            .collect();
        codes.sort_unstable();
        codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_lowercase()
}
