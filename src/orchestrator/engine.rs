//! Calculation Orchestrator
//!
//! Composes the cache, the grading algorithms and the queue behind the
//! operations callers use. Every raw-data fetch goes through one semaphore
//! and one timeout, so single, batch and queued work together never exceed
//! `batch_concurrency` concurrent requests against the grade source.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use super::averages::{BatchAverages, BatchFailure, CachedCalculation, StudentAverages};
use super::validation::{resolve_assessments, validate_score};
use super::OrchestratorConfig;
use crate::cache::{CacheKey, CacheStats, CalculationCache};
use crate::config::EngineConfig;
use crate::domain::{
    AcademicYearId, AuditEvent, AuditSink, GradeSource, Semester, StudentId, SubjectId,
};
use crate::error::{Error, Result};
use crate::grading::{class_statistics, ClassStatistics, GradingConfig};
use crate::queue::{
    CalculationKind, CalculationQueue, CalculationRequest, CalculationResult, QueueStatus,
    TaskExecutor, TaskHandle, TaskId,
};

/// Computations retried when a concurrent invalidation supersedes their inputs
const REFRESH_ATTEMPTS: u32 = 3;

/// Outcome of [`CalculationOrchestrator::queue_recalculation`].
#[derive(Debug)]
pub enum QueuedRecalculation {
    /// The caller waited for the task
    Completed(CalculationResult),
    /// The task runs in the background; await the handle or drop it
    Background(TaskHandle),
}

/// Public surface of the engine.
pub struct CalculationOrchestrator {
    config: OrchestratorConfig,
    grading: GradingConfig,
    source: Arc<dyn GradeSource>,
    audit: Arc<dyn AuditSink>,
    cache: Arc<CalculationCache<CachedCalculation>>,
    queue: Arc<CalculationQueue>,
    fetch_permits: Semaphore,
}

impl CalculationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        grading: GradingConfig,
        source: Arc<dyn GradeSource>,
        audit: Arc<dyn AuditSink>,
        cache: Arc<CalculationCache<CachedCalculation>>,
        queue: Arc<CalculationQueue>,
    ) -> Arc<Self> {
        let permits = config.batch_concurrency.max(1);
        Arc::new(Self {
            config,
            grading,
            source,
            audit,
            cache,
            queue,
            fetch_permits: Semaphore::new(permits),
        })
    }

    /// Build the cache and queue from `config` and wire them in.
    pub fn from_config(
        config: &EngineConfig,
        source: Arc<dyn GradeSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        Self::new(
            config.orchestrator.clone(),
            config.grading.clone(),
            source,
            audit,
            Arc::new(CalculationCache::new(config.cache.clone())),
            CalculationQueue::new(config.queue.clone()),
        )
    }

    /// Start the queue workers with this orchestrator as executor.
    pub fn start(self: &Arc<Self>) {
        let executor: Arc<dyn TaskExecutor> = self.clone();
        self.queue.start(executor);
    }

    /// Stop the queue; pending tasks fail, running ones finish.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    pub fn cache(&self) -> &Arc<CalculationCache<CachedCalculation>> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<CalculationQueue> {
        &self.queue
    }

    pub fn grading(&self) -> &GradingConfig {
        &self.grading
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.queue_status()
    }

    pub async fn source_healthy(&self) -> bool {
        self.source.health_check().await.unwrap_or(false)
    }

    // =========================================================================
    // Student averages
    // =========================================================================

    /// Cache-first lookup of one student's averages.
    #[instrument(skip(self))]
    pub async fn get_student_averages(
        &self,
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<Arc<StudentAverages>> {
        let key = CacheKey::student_averages(student_id, academic_year_id, semester);
        if let Some(CachedCalculation::StudentAverages(hit)) = self.cache.get(&key) {
            return Ok(hit);
        }

        let (correlation_id, started) = AuditEvent::calculation_started(
            key.operation(),
            json!({
                "student_id": student_id,
                "academic_year_id": academic_year_id,
                "semester": semester,
            }),
        );
        self.emit(started).await;
        let timer = Instant::now();

        let outcome = self
            .compute_and_cache(student_id, academic_year_id, semester)
            .await;

        self.emit(AuditEvent::calculation_completed(
            correlation_id,
            outcome.is_ok(),
            usize::from(outcome.is_ok()),
            timer.elapsed().as_millis() as u64,
        ))
        .await;

        outcome
    }

    /// Averages for many students: cached ones are served directly, the rest
    /// are computed in parallel under the fetch bound. Individual failures
    /// are reported in the result rather than failing the batch.
    #[instrument(skip(self, student_ids), fields(count = student_ids.len()))]
    pub async fn get_batch_averages(
        &self,
        student_ids: &[StudentId],
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> BatchAverages {
        let mut seen = HashSet::new();
        let unique: Vec<&StudentId> = student_ids.iter().filter(|id| seen.insert(*id)).collect();

        let mut slots: Vec<Option<Arc<StudentAverages>>> = Vec::with_capacity(unique.len());
        let mut uncached: Vec<(usize, &StudentId)> = Vec::new();
        for (index, student_id) in unique.iter().enumerate() {
            let key = CacheKey::student_averages(student_id, academic_year_id, semester);
            match self.cache.get(&key) {
                Some(CachedCalculation::StudentAverages(hit)) => slots.push(Some(hit)),
                _ => {
                    slots.push(None);
                    uncached.push((index, *student_id));
                }
            }
        }
        let cached_count = unique.len() - uncached.len();

        let (correlation_id, started) = AuditEvent::calculation_started(
            "batch_averages",
            json!({
                "academic_year_id": academic_year_id,
                "semester": semester,
                "requested": unique.len(),
                "cached": cached_count,
            }),
        );
        self.emit(started).await;
        let timer = Instant::now();

        let computed = join_all(uncached.iter().map(|(index, student_id)| async move {
            let outcome = self
                .compute_and_cache(student_id, academic_year_id, semester)
                .await;
            (*index, *student_id, outcome)
        }))
        .await;

        let computed_count = computed.len();
        let mut failures = Vec::new();
        for (index, student_id, outcome) in computed {
            match outcome {
                Ok(averages) => slots[index] = Some(averages),
                Err(e) => {
                    warn!(student_id = %student_id, error = %e, "Batch member failed");
                    failures.push(BatchFailure {
                        student_id: student_id.clone(),
                        error_kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let results: Vec<Arc<StudentAverages>> = slots.into_iter().flatten().collect();
        self.emit(AuditEvent::calculation_completed(
            correlation_id,
            failures.is_empty(),
            results.len(),
            timer.elapsed().as_millis() as u64,
        ))
        .await;

        info!(
            requested = unique.len(),
            cached = cached_count,
            computed = computed_count,
            failed = failures.len(),
            "Batch averages complete"
        );

        BatchAverages {
            academic_year_id: academic_year_id.clone(),
            semester,
            results,
            failures,
            cached_count,
            computed_count,
        }
    }

    /// Fetch, validate and aggregate without touching the cache.
    async fn compute_student_averages(
        &self,
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<StudentAverages> {
        let rows = self
            .fetch(
                "fetch_assessments",
                self.source
                    .fetch_assessments(student_id, academic_year_id, semester),
            )
            .await?;

        let resolved = resolve_assessments(&rows, &self.grading).map_err(|e| {
            warn!(student_id = %student_id, error = %e, "Rejected assessment data");
            e
        })?;

        Ok(StudentAverages::compute(
            student_id.clone(),
            academic_year_id.clone(),
            semester,
            &resolved,
            self.grading.default_coefficient,
        ))
    }

    async fn compute_and_cache(
        &self,
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<Arc<StudentAverages>> {
        let key = CacheKey::student_averages(student_id, academic_year_id, semester);
        let generation = self.cache.generation(&key);
        let averages = Arc::new(
            self.compute_student_averages(student_id, academic_year_id, semester)
                .await?,
        );
        let cached = self.cache.set_if_current(
            key,
            CachedCalculation::StudentAverages(averages.clone()),
            generation,
        );
        debug!(
            student_id = %student_id,
            average = averages.overall_average,
            cached,
            "Computed student averages"
        );
        Ok(averages)
    }

    // =========================================================================
    // Class statistics
    // =========================================================================

    /// Cache-first statistics over a subject's published grades.
    #[instrument(skip(self))]
    pub async fn get_class_statistics(
        &self,
        subject_id: &SubjectId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<ClassStatistics> {
        let key = CacheKey::class_statistics(subject_id, academic_year_id, semester);
        if let Some(CachedCalculation::ClassStatistics(hit)) = self.cache.get(&key) {
            return Ok(hit);
        }

        let (correlation_id, started) = AuditEvent::calculation_started(
            key.operation(),
            json!({
                "subject_id": subject_id,
                "academic_year_id": academic_year_id,
                "semester": semester,
            }),
        );
        self.emit(started).await;
        let timer = Instant::now();

        let generation = self.cache.generation(&key);
        let outcome = self
            .compute_class_statistics(subject_id, academic_year_id, semester)
            .await;
        if let Ok(stats) = &outcome {
            self.cache.set_if_current(
                key,
                CachedCalculation::ClassStatistics(stats.clone()),
                generation,
            );
        }

        self.emit(AuditEvent::calculation_completed(
            correlation_id,
            outcome.is_ok(),
            outcome.as_ref().map(|s| s.count).unwrap_or(0),
            timer.elapsed().as_millis() as u64,
        ))
        .await;

        outcome
    }

    async fn compute_class_statistics(
        &self,
        subject_id: &SubjectId,
        academic_year_id: &AcademicYearId,
        semester: Option<Semester>,
    ) -> Result<ClassStatistics> {
        let scores = self
            .fetch(
                "fetch_published_scores",
                self.source
                    .fetch_published_scores(subject_id, academic_year_id, semester),
            )
            .await?;

        for score in &scores {
            validate_score(subject_id.as_str(), *score, self.grading.scale_max)?;
        }

        class_statistics(&scores).ok_or_else(|| Error::EmptyDistribution {
            subject: subject_id.to_string(),
        })
    }

    // =========================================================================
    // Queue and invalidation
    // =========================================================================

    /// Route a recalculation through the queue. Waits for the result unless
    /// the request asks to run asynchronously.
    #[instrument(skip(self, request), fields(kind = request.kind.name()))]
    pub async fn queue_recalculation(
        &self,
        request: CalculationRequest,
    ) -> Result<QueuedRecalculation> {
        let run_async = request.options.run_async;
        if !run_async && !self.queue.is_shutdown() && !self.queue.is_started() {
            return Err(Error::QueueNotStarted);
        }
        let handle = self.queue.enqueue(request)?;

        if run_async {
            debug!(task_id = %handle.task_id, "Recalculation queued in background");
            Ok(QueuedRecalculation::Background(handle))
        } else {
            Ok(QueuedRecalculation::Completed(handle.wait().await))
        }
    }

    /// Drop everything a grade write for this student may have staled: all
    /// of the student's entries plus the period's aggregate entries.
    #[instrument(skip(self))]
    pub async fn invalidate_after_write(
        &self,
        student_id: &StudentId,
        academic_year_id: &AcademicYearId,
    ) -> usize {
        let removed = self.cache.invalidate_student(student_id)
            + self.cache.invalidate_where(|key| {
                key.student_id().is_none() && key.references_academic_year(academic_year_id)
            });

        self.emit(AuditEvent::cache_invalidated(
            format!("student:{}|year:{}", student_id, academic_year_id),
            removed,
        ))
        .await;
        removed
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Run a grade-source call under the fetch bound and timeout. Source
    /// failures surface as `DataUnavailable`.
    async fn fetch<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self
            .fetch_permits
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("Failed to acquire fetch permit: {}", e)))?;

        match tokio::time::timeout(self.config.fetch_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::DataUnavailable(message))) => Err(Error::DataUnavailable(message)),
            Ok(Err(e)) => Err(Error::DataUnavailable(format!("{}: {}", operation, e))),
            Err(_) => {
                error!(operation, after = ?self.config.fetch_timeout, "Grade source timed out");
                Err(Error::Timeout {
                    operation: operation.to_string(),
                    after: self.config.fetch_timeout,
                })
            }
        }
    }

    /// Audit publishing never fails a calculation.
    async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.audit.publish(event).await {
            warn!(event_type, error = %e, "Failed to publish audit event");
        }
    }

    /// Compute and store a fresh value for `key`. When an invalidation
    /// covering the key lands while the inputs are being read, the result is
    /// discarded and computed again. Returns whether a value was cached.
    async fn refresh<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<bool>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<CachedCalculation>>,
    {
        for attempt in 1..=REFRESH_ATTEMPTS {
            let generation = self.cache.generation(key);
            let value = compute().await?;
            if self.cache.set_if_current(key.clone(), value, generation) {
                return Ok(true);
            }
            debug!(key = %key, attempt, "Inputs changed during recalculation");
        }

        warn!(key = %key, "Recalculation kept racing grade writes; result not cached");
        Ok(false)
    }

    /// Queued recalculations drop the affected entries first, then compute
    /// and store fresh values.
    async fn run_request(&self, request: &CalculationRequest) -> Result<usize> {
        match &request.kind {
            CalculationKind::StudentAverages {
                student_id,
                academic_year_id,
                semester,
            } => {
                let removed = self.cache.invalidate_student(student_id);
                self.emit(AuditEvent::cache_invalidated(
                    format!("student:{}", student_id),
                    removed,
                ))
                .await;

                self.refresh(&request.key(), move || async move {
                    let fresh = self
                        .compute_student_averages(student_id, academic_year_id, *semester)
                        .await?;
                    Ok(CachedCalculation::StudentAverages(Arc::new(fresh)))
                })
                .await?;
                Ok(1)
            }

            CalculationKind::ProgramAverages {
                academic_year_id,
                semester,
            } => {
                let members = self
                    .fetch(
                        "fetch_program_members",
                        self.source.fetch_program_members(academic_year_id),
                    )
                    .await?;

                let removed = self.cache.invalidate_academic_year(academic_year_id);
                self.emit(AuditEvent::cache_invalidated(
                    format!("year:{}", academic_year_id),
                    removed,
                ))
                .await;

                let outcomes = join_all(members.iter().map(|student_id| async move {
                    let key = CacheKey::student_averages(student_id, academic_year_id, *semester);
                    let outcome = self
                        .refresh(&key, move || async move {
                            let fresh = self
                                .compute_student_averages(student_id, academic_year_id, *semester)
                                .await?;
                            Ok(CachedCalculation::StudentAverages(Arc::new(fresh)))
                        })
                        .await;
                    (student_id, outcome)
                }))
                .await;

                let mut recalculated = 0usize;
                let mut first_error = None;
                for (student_id, outcome) in outcomes {
                    match outcome {
                        Ok(_) => recalculated += 1,
                        Err(e) => {
                            warn!(
                                student_id = %student_id,
                                error = %e,
                                "Program member recalculation failed"
                            );
                            first_error.get_or_insert(e);
                        }
                    }
                }

                match first_error {
                    Some(e) if recalculated == 0 => Err(e),
                    _ => Ok(recalculated),
                }
            }

            CalculationKind::ClassStatistics {
                subject_id,
                academic_year_id,
                semester,
            } => {
                let key = request.key();
                self.cache.invalidate_key(&key);

                self.refresh(&key, move || async move {
                    let fresh = self
                        .compute_class_statistics(subject_id, academic_year_id, *semester)
                        .await?;
                    Ok(CachedCalculation::ClassStatistics(fresh))
                })
                .await?;
                Ok(1)
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for CalculationOrchestrator {
    async fn execute(&self, task_id: TaskId, request: &CalculationRequest) -> Result<usize> {
        let params = serde_json::to_value(&request.kind)?;
        let (correlation_id, started) =
            AuditEvent::calculation_started(request.kind.name(), params);
        self.emit(started).await;
        let timer = Instant::now();

        let outcome = self.run_request(request).await;

        self.emit(AuditEvent::calculation_completed(
            correlation_id,
            outcome.is_ok(),
            *outcome.as_ref().unwrap_or(&0),
            timer.elapsed().as_millis() as u64,
        ))
        .await;

        if request.options.notify_on_completion {
            let message = match &outcome {
                Ok(affected) => {
                    format!("{} recalculated {} entities", request.kind.name(), affected)
                }
                Err(e) => e.to_string(),
            };
            self.emit(AuditEvent::recalculation_notified(
                task_id,
                request.kind.name(),
                outcome.is_ok(),
                message,
            ))
            .await;
        }

        outcome
    }
}
