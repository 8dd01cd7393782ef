//! In-Memory Grade Source Adapter
//!
//! Implements the `GradeSource` port over a dataset held in memory, loaded
//! from JSON. Used by the operator binary and by tests, which can also
//! inject latency or outages.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::ports::{AssessmentRecord, GradeSource};
use crate::domain::{AcademicYearId, Semester, StudentId, SubjectId};
use crate::error::{Error, Result};

/// Serialized dataset layout.
///
/// ```json
/// {
///   "programs": { "2025-2026": ["s1", "s2"] },
///   "assessments": [
///     { "student_id": "s1", "academic_year_id": "2025-2026", "semester": 1,
///       "subject_id": "MATH101", "subject_name": "Analyse", "evaluation_type": "CC",
///       "score": 14.0, "coefficient": 3.0 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradeDataset {
    #[serde(default)]
    pub programs: HashMap<AcademicYearId, Vec<StudentId>>,
    #[serde(default)]
    pub assessments: Vec<AssessmentRecord>,
}

/// Grade source backed by an in-memory dataset.
#[derive(Debug, Default)]
pub struct InMemoryGradeSource {
    data: RwLock<GradeDataset>,
    latency: RwLock<Option<Duration>>,
    unavailable: AtomicBool,
    assessment_fetches: AtomicU64,
    score_fetches: AtomicU64,
    member_fetches: AtomicU64,
}

impl InMemoryGradeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: GradeDataset) -> Self {
        Self {
            data: RwLock::new(dataset),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let dataset: GradeDataset = serde_json::from_str(json)?;
        Ok(Self::from_dataset(dataset))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let source = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            assessments = source.assessment_count(),
            "Loaded grade dataset"
        );
        Ok(source)
    }

    // =========================================================================
    // Data
    // =========================================================================

    pub fn add_assessment(&self, record: AssessmentRecord) {
        self.data.write().assessments.push(record);
    }

    /// Replace a student's rows for one academic year.
    pub fn replace_student_assessments(
        &self,
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
        records: Vec<AssessmentRecord>,
    ) {
        let mut data = self.data.write();
        data.assessments.retain(|r| {
            !(r.student_id == *student_id && r.academic_year_id == *academic_year_id)
        });
        data.assessments.extend(records);
    }

    pub fn set_program_members(&self, academic_year_id: AcademicYearId, members: Vec<StudentId>) {
        self.data.write().programs.insert(academic_year_id, members);
    }

    pub fn assessment_count(&self) -> usize {
        self.data.read().assessments.len()
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Make every fetch fail with `DataUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every fetch.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    // =========================================================================
    // Counters
    // =========================================================================

    pub fn assessment_fetches(&self) -> u64 {
        self.assessment_fetches.load(Ordering::SeqCst)
    }

    pub fn score_fetches(&self) -> u64 {
        self.score_fetches.load(Ordering::SeqCst)
    }

    pub fn member_fetches(&self) -> u64 {
        self.member_fetches.load(Ordering::SeqCst)
    }

    async fn simulate_io(&self) -> Result<()> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::DataUnavailable(
                "grade store is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

fn in_scope(
    record: &AssessmentRecord,
    academic_year_id: &AcademicYearId,
    semester: Option<Semester>,
) -> bool {
    record.published
        && record.academic_year_id == *academic_year_id
        && semester.map_or(true, |s| record.semester == s)
}

#[async_trait]
impl GradeSource for InMemoryGradeSource {
    async fn fetch_assessments(
        &self,
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<Vec<AssessmentRecord>> {
        self.assessment_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;

        let rows: Vec<AssessmentRecord> = self
            .data
            .read()
            .assessments
            .iter()
            .filter(|r| r.student_id == *student_id && in_scope(r, academic_year_id, semester))
            .cloned()
            .collect();

        debug!(student_id = %student_id, rows = rows.len(), "Fetched assessments");
        Ok(rows)
    }

    async fn fetch_published_scores(
        &self,
        subject_id: &SubjectId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<Vec<f64>> {
        self.score_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;

        Ok(self
            .data
            .read()
            .assessments
            .iter()
            .filter(|r| r.subject_id == *subject_id && in_scope(r, academic_year_id, semester))
            .map(|r| r.score)
            .collect())
    }

    async fn fetch_program_members(
        &self,
        academic_year_id: &AcademicYearId,
    ) -> Result<Vec<StudentId>> {
        self.member_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;

        let data = self.data.read();
        if let Some(members) = data.programs.get(academic_year_id) {
            return Ok(members.clone());
        }

        // Without an explicit roster, members are the students with rows that year.
        let mut members: Vec<StudentId> = data
            .assessments
            .iter()
            .filter(|r| r.academic_year_id == *academic_year_id)
            .map(|r| r.student_id.clone())
            .collect();
        members.sort();
        members.dedup();
        Ok(members)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }
}
