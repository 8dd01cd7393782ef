//! Gradebook Engine operator binary
//!
//! Loads a JSON grade dataset, recalculates a whole program through the
//! queue, prints the resulting averages as JSON and optionally keeps
//! serving health and Prometheus endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Gradebook Engine                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ Grade Source │───▶│ Orchestrator │───▶│    Queue     │       │
//! │  │  (dataset)   │    │ + TTL cache  │    │  (workers)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gradebook_engine::adapters::{InMemoryGradeSource, LoggingAuditSink};
use gradebook_engine::cache::CacheStats;
use gradebook_engine::config::parse_duration;
use gradebook_engine::domain::{GradeSource, Semester};
use gradebook_engine::orchestrator::BatchFailure;
use gradebook_engine::{
    AcademicYearId, CalculationOrchestrator, CalculationRequest, EngineConfig,
    QueuedRecalculation, QueueStatus,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Gradebook Engine - weighted averages with a TTL cache and a coalescing queue
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "GRADEBOOK_CONFIG")]
    config: Option<PathBuf>,

    /// JSON grade dataset
    #[arg(long, env = "GRADES_FILE")]
    grades_file: PathBuf,

    /// Academic year to recalculate
    #[arg(long, env = "ACADEMIC_YEAR")]
    academic_year: String,

    /// Restrict to one semester (1 or 2)
    #[arg(long, env = "SEMESTER")]
    semester: Option<u8>,

    /// Queue worker count
    #[arg(long, env = "QUEUE_WORKERS")]
    queue_workers: Option<usize>,

    /// Maximum concurrent grade-source fetches
    #[arg(long, env = "BATCH_CONCURRENCY")]
    batch_concurrency: Option<usize>,

    /// Cache TTL (e.g. "5m")
    #[arg(long, env = "CACHE_TTL")]
    cache_ttl: Option<String>,

    /// Grade-source fetch timeout (e.g. "10s")
    #[arg(long, env = "FETCH_TIMEOUT")]
    fetch_timeout: Option<String>,

    /// Keep serving health and metrics endpoints after the report
    #[arg(long, env = "SERVE")]
    serve: bool,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;
    let semester = args.semester.map(Semester::try_from).transpose()?;
    let academic_year = AcademicYearId::new(args.academic_year.clone());

    info!("Starting Gradebook Engine");
    info!("  Grades file: {}", args.grades_file.display());
    info!("  Academic year: {}", academic_year);
    info!("  Queue workers: {}", config.queue.workers);
    info!("  Batch concurrency: {}", config.orchestrator.batch_concurrency);
    info!("  Cache TTL: {:?}", config.cache.default_ttl);

    let source = Arc::new(
        InMemoryGradeSource::from_json_file(&args.grades_file)
            .with_context(|| format!("loading {}", args.grades_file.display()))?,
    );
    let orchestrator = CalculationOrchestrator::from_config(
        &config,
        source.clone(),
        Arc::new(LoggingAuditSink::info_level()),
    );
    orchestrator.start();

    // Program-wide recalculation through the queue
    let request = CalculationRequest::program_averages(academic_year.clone(), semester)
        .notify_on_completion(true);
    match orchestrator.queue_recalculation(request).await? {
        QueuedRecalculation::Completed(result) if result.is_success() => {
            info!(affected = result.affected_count, "{}", result.message);
        }
        QueuedRecalculation::Completed(result) => {
            warn!("Program recalculation failed: {}", result.message);
        }
        QueuedRecalculation::Background(handle) => {
            info!(task_id = %handle.task_id, "Program recalculation running in background");
        }
    }

    let members = source
        .fetch_program_members(&academic_year)
        .await
        .context("listing program members")?;
    let batch = orchestrator
        .get_batch_averages(&members, &academic_year, semester)
        .await;

    let report = Report::build(&orchestrator, &batch);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.serve {
        serve(&args, orchestrator.clone()).await?;
    }

    orchestrator.shutdown().await;
    info!("Gradebook Engine shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(workers) = args.queue_workers {
        config.queue.workers = workers;
    }
    if let Some(concurrency) = args.batch_concurrency {
        config.orchestrator.batch_concurrency = concurrency;
    }
    if let Some(ttl) = &args.cache_ttl {
        config.cache.default_ttl = parse_duration(ttl)?;
    }
    if let Some(timeout) = &args.fetch_timeout {
        config.orchestrator.fetch_timeout = parse_duration(timeout)?;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Serialize)]
struct Report {
    academic_year_id: AcademicYearId,
    semester: Option<Semester>,
    students: Vec<StudentRow>,
    failures: Vec<BatchFailure>,
    cached_count: usize,
    computed_count: usize,
    cache: CacheStats,
    queue: QueueStatus,
}

#[derive(Debug, Serialize)]
struct StudentRow {
    student_id: String,
    overall_average: f64,
    mention: &'static str,
    total_credits: f64,
    subject_averages: BTreeMap<String, f64>,
}

impl Report {
    fn build(
        orchestrator: &CalculationOrchestrator,
        batch: &gradebook_engine::BatchAverages,
    ) -> Self {
        let scale_max = orchestrator.grading().scale_max;
        let students = batch
            .results
            .iter()
            .map(|averages| StudentRow {
                student_id: averages.student_id.to_string(),
                overall_average: averages.display_average(),
                mention: averages.mention(scale_max).label(),
                total_credits: averages.total_credits,
                subject_averages: averages
                    .subject_averages
                    .iter()
                    .map(|(subject, avg)| {
                        (subject.to_string(), gradebook_engine::grading::round2(*avg))
                    })
                    .collect(),
            })
            .collect();

        Self {
            academic_year_id: batch.academic_year_id.clone(),
            semester: batch.semester,
            students,
            failures: batch.failures.clone(),
            cached_count: batch.cached_count,
            computed_count: batch.computed_count,
            cache: orchestrator.cache_stats(),
            queue: orchestrator.queue_status(),
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level: Level = args.log_level.parse().unwrap_or(Level::INFO);

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

// =============================================================================
// Serve Mode
// =============================================================================

async fn serve(args: &Args, orchestrator: Arc<CalculationOrchestrator>) -> Result<()> {
    let metrics = Arc::new(EngineMetrics::register()?);
    let purge_interval = orchestrator.cache().config().purge_interval;

    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .with_context(|| format!("invalid health server address {}", args.health_addr))?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", args.metrics_addr))?;

    let health_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_orchestrator).await {
            error!("Health server error: {}", e);
        }
    });

    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Expiry sweep and gauge refresh
    let sweeper_orchestrator = orchestrator.clone();
    let sweeper_metrics = metrics.clone();
    let sweeper = tokio::spawn(async move {
        let mut tick = tokio::time::interval(purge_interval.min(Duration::from_secs(15)));
        loop {
            tick.tick().await;
            sweeper_orchestrator.cache().purge_expired();
            sweeper_metrics.update(
                &sweeper_orchestrator.cache_stats(),
                &sweeper_orchestrator.queue_status(),
            );
        }
    });

    info!("Serving until Ctrl-C");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    sweeper.abort();
    Ok(())
}

/// Prometheus gauges mirroring cache and queue statistics.
struct EngineMetrics {
    cache_hit_rate: prometheus::Gauge,
    cache_entries: prometheus::IntGauge,
    cache_expired_entries: prometheus::IntGauge,
    queue_pending: prometheus::IntGauge,
    queue_running: prometheus::IntGauge,
    queue_completed: prometheus::IntGauge,
    queue_failed: prometheus::IntGauge,
    queue_coalesced: prometheus::IntGauge,
}

impl EngineMetrics {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            cache_hit_rate: prometheus::register_gauge!(
                "gradebook_cache_hit_rate",
                "Calculation cache hit rate since last reset"
            )?,
            cache_entries: prometheus::register_int_gauge!(
                "gradebook_cache_entries",
                "Live calculation cache entries"
            )?,
            cache_expired_entries: prometheus::register_int_gauge!(
                "gradebook_cache_expired_entries",
                "Expired calculation cache entries awaiting eviction"
            )?,
            queue_pending: prometheus::register_int_gauge!(
                "gradebook_queue_pending",
                "Pending calculation tasks"
            )?,
            queue_running: prometheus::register_int_gauge!(
                "gradebook_queue_running",
                "Running calculation tasks"
            )?,
            queue_completed: prometheus::register_int_gauge!(
                "gradebook_queue_completed_total",
                "Calculation tasks completed successfully"
            )?,
            queue_failed: prometheus::register_int_gauge!(
                "gradebook_queue_failed_total",
                "Calculation tasks failed"
            )?,
            queue_coalesced: prometheus::register_int_gauge!(
                "gradebook_queue_coalesced_total",
                "Enqueues attached to an in-flight task"
            )?,
        })
    }

    fn update(&self, cache: &CacheStats, queue: &QueueStatus) {
        self.cache_hit_rate.set(cache.hit_rate);
        self.cache_entries.set(cache.entry_count as i64);
        self.cache_expired_entries.set(cache.expired_entries as i64);
        self.queue_pending.set(queue.pending as i64);
        self.queue_running.set(queue.running as i64);
        self.queue_completed.set(queue.completed_total as i64);
        self.queue_failed.set(queue.failed_total as i64);
        self.queue_coalesced.set(queue.coalesced_total as i64);
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::body::Bytes>,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn run_health_server(
    addr: SocketAddr,
    orchestrator: Arc<CalculationOrchestrator>,
) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding health server on {}", addr))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("health server accept")?;
        let io = TokioIo::new(stream);
        let orchestrator = orchestrator.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" => {
                            if orchestrator.queue().is_shutdown() {
                                text_response(StatusCode::SERVICE_UNAVAILABLE, "queue stopped")
                            } else if orchestrator.source_healthy().await {
                                text_response(StatusCode::OK, "ok")
                            } else {
                                text_response(
                                    StatusCode::SERVICE_UNAVAILABLE,
                                    "grade source unavailable",
                                )
                            }
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<
        Response<http_body_util::Full<hyper::body::Bytes>>,
        std::convert::Infallible,
    > {
        if req.uri().path() != "/metrics" {
            return Ok(text_response(StatusCode::NOT_FOUND, "not found"));
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding error"));
        }

        let mut response = text_response(StatusCode::OK, buffer);
        if let Ok(content_type) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
            response
                .headers_mut()
                .insert(hyper::header::CONTENT_TYPE, content_type);
        }
        Ok(response)
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics server on {}", addr))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("metrics server accept")?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
