//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters, gauges, and histograms the compression pipeline reports.

use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Buckets for engine wall-clock duration, in seconds.
const ENGINE_DURATION_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 180.0, 600.0];

/// Terminal outcome label recorded for each pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcomeLabel {
    /// Output was produced and streamed.
    Succeeded,
    /// The engine exited unsuccessfully.
    EngineFailed,
    /// The engine exceeded its wall-clock budget.
    Timeout,
    /// The upload was rejected before the engine ran.
    Rejected,
    /// The staging store could not write or read the payload.
    StagingFailed,
    /// The run was abandoned before reaching a terminal state.
    Cancelled,
}

impl RunOutcomeLabel {
    /// Label value used in Prometheus output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::EngineFailed => "engine_failed",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::StagingFailed => "staging_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    pipeline_runs_total: IntCounterVec,
    engine_invocations_active: IntGauge,
    engine_duration_seconds: HistogramVec,
    staged_bytes_total: IntCounter,
    upload_rejections_total: IntCounterVec,
    staging_cleanup_failures_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Engine subprocesses currently running.
    pub engine_invocations_active: i64,
    /// Runs that produced output.
    pub runs_succeeded_total: u64,
    /// Runs that ended in an engine failure or timeout.
    pub runs_failed_total: u64,
    /// Payload bytes written to staging.
    pub staged_bytes_total: u64,
    /// Staged files that could not be removed.
    pub staging_cleanup_failures_total: u64,
}

fn collector<T>(name: &'static str, built: prometheus::Result<T>) -> Result<T> {
    built.map_err(|source| TelemetryError::Metric {
        name,
        step: "build",
        source,
    })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Metric {
            name,
            step: "register",
            source,
        })
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = collector(
            "http_requests_total",
            IntCounterVec::new(
                Opts::new("http_requests_total", "Total HTTP requests received"),
                &["route", "code"],
            ),
        )?;
        let events_emitted_total = collector(
            "events_emitted_total",
            IntCounterVec::new(
                Opts::new("events_emitted_total", "Domain events emitted by type"),
                &["type"],
            ),
        )?;
        let pipeline_runs_total = collector(
            "pipeline_runs_total",
            IntCounterVec::new(
                Opts::new("pipeline_runs_total", "Pipeline runs by terminal outcome"),
                &["outcome"],
            ),
        )?;
        let engine_invocations_active = collector(
            "engine_invocations_active",
            IntGauge::with_opts(Opts::new(
                "engine_invocations_active",
                "Engine subprocesses currently running",
            )),
        )?;
        let engine_duration_seconds = collector(
            "engine_duration_seconds",
            HistogramVec::new(
                HistogramOpts::new(
                    "engine_duration_seconds",
                    "Wall-clock duration of engine invocations",
                )
                .buckets(ENGINE_DURATION_BUCKETS.to_vec()),
                &["preset"],
            ),
        )?;
        let staged_bytes_total = collector(
            "staged_bytes_total",
            IntCounter::with_opts(Opts::new(
                "staged_bytes_total",
                "Payload bytes written to the staging store",
            )),
        )?;
        let upload_rejections_total = collector(
            "upload_rejections_total",
            IntCounterVec::new(
                Opts::new(
                    "upload_rejections_total",
                    "Uploads rejected before the engine ran",
                ),
                &["reason"],
            ),
        )?;
        let staging_cleanup_failures_total = collector(
            "staging_cleanup_failures_total",
            IntCounter::with_opts(Opts::new(
                "staging_cleanup_failures_total",
                "Staged files that could not be deleted",
            )),
        )?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "events_emitted_total", &events_emitted_total)?;
        register(&registry, "pipeline_runs_total", &pipeline_runs_total)?;
        register(
            &registry,
            "engine_invocations_active",
            &engine_invocations_active,
        )?;
        register(&registry, "engine_duration_seconds", &engine_duration_seconds)?;
        register(&registry, "staged_bytes_total", &staged_bytes_total)?;
        register(&registry, "upload_rejections_total", &upload_rejections_total)?;
        register(
            &registry,
            "staging_cleanup_failures_total",
            &staging_cleanup_failures_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                events_emitted_total,
                pipeline_runs_total,
                engine_invocations_active,
                engine_duration_seconds,
                staged_bytes_total,
                upload_rejections_total,
                staging_cleanup_failures_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Record a terminal pipeline outcome.
    pub fn inc_pipeline_run(&self, outcome: RunOutcomeLabel) {
        self.inner
            .pipeline_runs_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Mark an engine subprocess as started.
    pub fn engine_started(&self) {
        self.inner.engine_invocations_active.inc();
    }

    /// Mark an engine subprocess as finished and record its duration.
    pub fn engine_finished(&self, preset: &str, elapsed: Duration) {
        self.inner.engine_invocations_active.dec();
        self.inner
            .engine_duration_seconds
            .with_label_values(&[preset])
            .observe(elapsed.as_secs_f64());
    }

    /// Add bytes written to the staging store.
    pub fn add_staged_bytes(&self, bytes: u64) {
        self.inner.staged_bytes_total.inc_by(bytes);
    }

    /// Count an upload rejected before the engine ran.
    pub fn inc_upload_rejection(&self, reason: &str) {
        self.inner
            .upload_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Count a staged file that could not be deleted.
    pub fn inc_staging_cleanup_failure(&self) {
        self.inner.staging_cleanup_failures_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Render`] if the registry cannot be encoded.
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.inner.registry.gather())
            .map_err(|source| TelemetryError::Render { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let runs = &self.inner.pipeline_runs_total;
        let count = |label: RunOutcomeLabel| runs.with_label_values(&[label.as_str()]).get();
        MetricsSnapshot {
            engine_invocations_active: self.inner.engine_invocations_active.get(),
            runs_succeeded_total: count(RunOutcomeLabel::Succeeded),
            runs_failed_total: count(RunOutcomeLabel::EngineFailed)
                + count(RunOutcomeLabel::Timeout),
            staged_bytes_total: self.inner.staged_bytes_total.get(),
            staging_cleanup_failures_total: self.inner.staging_cleanup_failures_total.get(),
        }
    }
}
