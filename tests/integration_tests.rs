//! Gradebook Engine Integration Tests
//!
//! Exercises the public surface end to end:
//! - Grading algorithms on reference values
//! - Cache-first lookups, TTL expiry and targeted invalidation
//! - Coalescing recalculation queue
//! - Audit trail correlation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use gradebook_engine::adapters::{InMemoryAuditCollector, InMemoryGradeSource};
use gradebook_engine::cache::CacheConfig;
use gradebook_engine::domain::{AssessmentRecord, SubjectNature};
use gradebook_engine::orchestrator::OrchestratorConfig;
use gradebook_engine::queue::QueueConfig;
use gradebook_engine::{
    AuditEvent, CalculationOrchestrator, CalculationRequest, EngineConfig, Error, Semester,
    StudentId,
};

fn record(student: &str, subject: &str, code: &str, score: f64) -> AssessmentRecord {
    AssessmentRecord {
        student_id: student.into(),
        academic_year_id: "2025-2026".into(),
        semester: Semester::First,
        subject_id: subject.into(),
        subject_name: subject.to_string(),
        evaluation_type: code.to_string(),
        score,
        coefficient: Some(3.0),
        nature: SubjectNature::Fondamentale,
        published: true,
    }
}

fn seeded_source(students: usize) -> Arc<InMemoryGradeSource> {
    let source = Arc::new(InMemoryGradeSource::new());
    for i in 0..students {
        let student = format!("s{}", i);
        source.add_assessment(record(&student, "MATH", "CC", 16.0));
        source.add_assessment(record(&student, "MATH", "EF", 12.0));
    }
    source
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        queue: QueueConfig {
            workers: 2,
            max_pending: 100,
        },
        orchestrator: OrchestratorConfig {
            batch_concurrency: 4,
            fetch_timeout: Duration::from_millis(250),
        },
        ..Default::default()
    }
}

fn build(
    config: &EngineConfig,
    source: Arc<InMemoryGradeSource>,
) -> (Arc<CalculationOrchestrator>, Arc<InMemoryAuditCollector>) {
    let audit = Arc::new(InMemoryAuditCollector::new());
    let orchestrator = CalculationOrchestrator::from_config(config, source, audit.clone());
    orchestrator.start();
    (orchestrator, audit)
}

// =============================================================================
// Grading algorithms
// =============================================================================

mod grading_tests {
    use gradebook_engine::domain::SubjectNature;
    use gradebook_engine::grading::{
        class_statistics, general_average, weighted_average, SemesterCalculation,
        WeightedGradeCalculation,
    };
    use gradebook_engine::{Mention, Semester};

    fn course(subject: &str, weighted: f64, coefficient: f64) -> WeightedGradeCalculation {
        WeightedGradeCalculation {
            subject_id: subject.into(),
            subject_name: subject.to_string(),
            cc_grade: weighted,
            exam_grade: weighted,
            weighted_average: weighted,
            coefficient,
            total: weighted * coefficient,
            nature: SubjectNature::Fondamentale,
        }
    }

    #[test]
    fn test_weighted_average_reference_value() {
        assert!((weighted_average(16.0, 12.0) - 6.8).abs() < 1e-9);
    }

    #[test]
    fn test_semester_average_reference_value() {
        let semester = SemesterCalculation::from_courses(
            Semester::First,
            vec![course("A", 10.0, 3.0), course("B", 14.0, 2.0)],
        );
        assert!((semester.semester_average - 11.6).abs() < 1e-9);
        assert_eq!(semester.total_coefficients, 5.0);
    }

    #[test]
    fn test_general_average_pools_points() {
        let first =
            SemesterCalculation::from_courses(Semester::First, vec![course("A", 10.0, 3.0)]);
        let second =
            SemesterCalculation::from_courses(Semester::Second, vec![course("B", 14.0, 2.0)]);
        assert!((general_average(Some(&first), Some(&second)) - 11.6).abs() < 1e-9);
        assert_eq!(general_average(None, None), 0.0);
    }

    #[test]
    fn test_class_statistics_even_median() {
        let stats = class_statistics(&[10.0, 12.0, 14.0, 16.0]).unwrap();
        assert_eq!(stats.median, 13.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 16.0);
        assert_eq!(stats.average, 13.0);
        assert_eq!(stats.count, 4);
    }

    #[test]
    fn test_class_statistics_empty() {
        assert!(class_statistics(&[]).is_none());
    }

    #[test]
    fn test_mention_thresholds() {
        assert_eq!(Mention::from_average(16.0, 20.0), Mention::TresBien);
        assert_eq!(Mention::from_average(9.99, 20.0), Mention::Ajourne);
    }
}

// =============================================================================
// Orchestrator: cache behaviour
// =============================================================================

mod orchestrator_cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_computes_only_uncached_students() {
        let source = seeded_source(10);
        let (orchestrator, _) = build(&engine_config(), source.clone());
        let year = "2025-2026".into();

        for i in 0..4 {
            orchestrator
                .get_student_averages(&StudentId::new(format!("s{}", i)), &year, None)
                .await
                .unwrap();
        }
        let fetches_before = source.assessment_fetches();

        let ids: Vec<StudentId> = (0..10).map(|i| StudentId::new(format!("s{}", i))).collect();
        let batch = orchestrator.get_batch_averages(&ids, &year, None).await;

        assert_eq!(source.assessment_fetches() - fetches_before, 6);
        assert_eq!(batch.results.len(), 10);
        assert_eq!(batch.cached_count, 4);
        assert_eq!(batch.computed_count, 6);
        assert_eq!(batch.failure_count(), 0);
        // Request order is preserved
        assert_eq!(batch.results[7].student_id, StudentId::new("s7"));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let source = seeded_source(1);
        let config = EngineConfig {
            cache: CacheConfig {
                default_ttl: Duration::from_millis(50),
                ..Default::default()
            },
            ..engine_config()
        };
        let (orchestrator, _) = build(&config, source.clone());
        let (student, year) = ("s0".into(), "2025-2026".into());

        orchestrator.get_student_averages(&student, &year, None).await.unwrap();
        orchestrator.get_student_averages(&student, &year, None).await.unwrap();
        assert_eq!(source.assessment_fetches(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        orchestrator.get_student_averages(&student, &year, None).await.unwrap();
        assert_eq!(source.assessment_fetches(), 2);

        let stats = orchestrator.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalidation_after_write_is_scoped_to_student() {
        let source = seeded_source(2);
        let (orchestrator, audit) = build(&engine_config(), source.clone());
        let year = "2025-2026".into();

        orchestrator.get_student_averages(&"s0".into(), &year, None).await.unwrap();
        orchestrator
            .get_student_averages(&"s0".into(), &year, Some(Semester::First))
            .await
            .unwrap();
        orchestrator.get_student_averages(&"s1".into(), &year, None).await.unwrap();
        orchestrator
            .get_class_statistics(&"MATH".into(), &year, None)
            .await
            .unwrap();
        assert_eq!(orchestrator.cache().len(), 4);

        source.replace_student_assessments(
            &"s0".into(),
            &year,
            vec![
                record("s0", "MATH", "CC", 20.0),
                record("s0", "MATH", "EF", 20.0),
            ],
        );
        let removed = orchestrator.invalidate_after_write(&"s0".into(), &year).await;

        // Both s0 entries and the class aggregate go; s1 survives
        assert_eq!(removed, 3);
        assert_eq!(orchestrator.cache().len(), 1);
        assert_eq!(audit.events_of_type("CacheInvalidated").len(), 1);

        let refreshed = orchestrator.get_student_averages(&"s0".into(), &year, None).await.unwrap();
        assert_eq!(refreshed.overall_average, 10.0);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unavailable_source_is_not_cached() {
        let source = seeded_source(1);
        let (orchestrator, _) = build(&engine_config(), source.clone());
        let (student, year) = ("s0".into(), "2025-2026".into());

        source.set_unavailable(true);
        assert_matches!(
            orchestrator.get_student_averages(&student, &year, None).await,
            Err(Error::DataUnavailable(_))
        );
        assert!(orchestrator.cache().is_empty());

        source.set_unavailable(false);
        assert!(orchestrator.get_student_averages(&student, &year, None).await.is_ok());
        assert_eq!(orchestrator.cache().len(), 1);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let source = seeded_source(1);
        source.set_latency(Some(Duration::from_millis(600)));
        let (orchestrator, _) = build(&engine_config(), source);

        assert_matches!(
            orchestrator
                .get_student_averages(&"s0".into(), &"2025-2026".into(), None)
                .await,
            Err(Error::Timeout { .. })
        );
        assert!(orchestrator.cache().is_empty());

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_class_statistics_without_grades() {
        let source = seeded_source(1);
        let (orchestrator, _) = build(&engine_config(), source);

        assert_matches!(
            orchestrator
                .get_class_statistics(&"HIST".into(), &"2025-2026".into(), None)
                .await,
            Err(Error::EmptyDistribution { .. })
        );

        orchestrator.shutdown().await;
    }
}

// =============================================================================
// Audit trail
// =============================================================================

mod audit_tests {
    use super::*;

    #[tokio::test]
    async fn test_started_and_completed_share_correlation_id() {
        let source = seeded_source(1);
        let (orchestrator, audit) = build(&engine_config(), source);

        orchestrator
            .get_student_averages(&"s0".into(), &"2025-2026".into(), None)
            .await
            .unwrap();

        let events = audit.events();
        assert_eq!(events.len(), 2);
        assert_matches!(events[0], AuditEvent::CalculationStarted { .. });
        assert_matches!(
            events[1],
            AuditEvent::CalculationCompleted {
                success: true,
                affected_count: 1,
                ..
            }
        );
        assert!(events[0].correlation_id().is_some());
        assert_eq!(events[0].correlation_id(), events[1].correlation_id());

        orchestrator.shutdown().await;
    }
}

// =============================================================================
// Recalculation queue
// =============================================================================

mod queue_tests {
    use super::*;
    use async_trait::async_trait;
    use gradebook_engine::queue::{CalculationQueue, TaskExecutor, TaskId};
    use gradebook_engine::{CalculationResult, QueuedRecalculation};

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(
            &self,
            _task_id: TaskId,
            _request: &CalculationRequest,
        ) -> gradebook_engine::Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_same_key_requests_run_once() {
        let queue = CalculationQueue::new(QueueConfig {
            workers: 1,
            max_pending: 10,
        });
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        queue.start(executor.clone());

        let request =
            || CalculationRequest::student_averages("s1".into(), "2025-2026".into(), None);
        let first = queue.enqueue(request()).unwrap();
        let second = queue.enqueue(request()).unwrap();

        assert!(!first.coalesced);
        assert!(second.coalesced);
        assert_eq!(first.task_id, second.task_id);

        let (a, b): (CalculationResult, CalculationResult) =
            tokio::join!(first.wait(), second.wait());
        assert!(a.is_success());
        assert_eq!(a, b);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.queue_status().coalesced_total, 1);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_recalculation_refreshes_cache() {
        let source = seeded_source(1);
        let (orchestrator, _) = build(&engine_config(), source.clone());
        let (student, year) = ("s0".into(), "2025-2026".into());

        let stale = orchestrator.get_student_averages(&student, &year, None).await.unwrap();
        source.replace_student_assessments(
            &student,
            &year,
            vec![
                record("s0", "MATH", "CC", 20.0),
                record("s0", "MATH", "EF", 20.0),
            ],
        );

        let outcome = orchestrator
            .queue_recalculation(CalculationRequest::student_averages(
                student.clone(),
                year.clone(),
                None,
            ))
            .await
            .unwrap();
        assert_matches!(outcome, QueuedRecalculation::Completed(ref r) if r.is_success());

        let fresh = orchestrator.get_student_averages(&student, &year, None).await.unwrap();
        assert!((stale.overall_average - 6.8).abs() < 1e-9);
        assert_eq!(fresh.overall_average, 10.0);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_recalculations_coalesce() {
        let source = seeded_source(1);
        source.set_latency(Some(Duration::from_millis(80)));
        let (orchestrator, _) = build(&engine_config(), source.clone());

        let request = || {
            CalculationRequest::student_averages("s0".into(), "2025-2026".into(), None)
                .run_async(true)
        };
        let first = orchestrator.queue_recalculation(request()).await.unwrap();
        let second = orchestrator.queue_recalculation(request()).await.unwrap();

        let (QueuedRecalculation::Background(first), QueuedRecalculation::Background(second)) =
            (first, second)
        else {
            panic!("async requests should return handles");
        };
        assert!(second.coalesced);

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert!(a.is_success());
        assert!(b.is_success());
        assert_eq!(source.assessment_fetches(), 1);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_rejected() {
        let source = seeded_source(1);
        let (orchestrator, _) = build(&engine_config(), source);
        orchestrator.shutdown().await;

        assert_matches!(
            orchestrator
                .queue_recalculation(CalculationRequest::program_averages("2025-2026".into(), None))
                .await,
            Err(Error::QueueShutdown)
        );
    }
}
