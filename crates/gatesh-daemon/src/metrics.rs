//! Prometheus metrics for gate evaluation.
//!
//! # Metrics Families
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `gatesh_evaluations_total` | Counter | `gate`, `result` |
//! | `gatesh_evaluations_skipped_total` | Counter | `gate` |
//! | `gatesh_gate_open` | Gauge | `gate` |
//! | `gatesh_target_fetch_errors_total` | Counter | `gate`, `target` |
//! | `gatesh_evaluation_duration_seconds` | Histogram | `gate` |
//! | `gatesh_status_conflicts_total` | Counter | |
//!
//! The `gate` label is the gate's scope path (`Gate/<namespace>/<name>` or
//! `ClusterGate/<name>`). These are process counters for scraping, not a
//! history of verdicts.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use gatesh_core::{EvaluationResult, GateKey, TargetReason};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TEXT_FORMAT, TextEncoder,
};
use thiserror::Error;
use tracing::warn;

/// Longest name segment kept in a label, in characters. Names are user input.
pub const MAX_LABEL_NAME_CHARS: usize = 63;

/// Histogram buckets for cycle duration (in seconds).
pub const EVALUATION_DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Gate evaluation metrics.
///
/// All metrics use interior mutability; the struct is cheap to clone and
/// safe to share across workers.
#[derive(Clone)]
pub struct GateMetrics {
    evaluations_total: CounterVec,
    evaluations_skipped_total: CounterVec,
    gate_open: GaugeVec,
    target_fetch_errors_total: CounterVec,
    evaluation_duration: HistogramVec,
    status_conflicts_total: IntCounter,
}

impl GateMetrics {
    /// Creates gate metrics and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate name).
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let evaluations_total = CounterVec::new(
            Opts::new("gatesh_evaluations_total", "Completed evaluation cycles"),
            &["gate", "result"],
        )?;
        registry.register(Box::new(evaluations_total.clone()))?;

        let evaluations_skipped_total = CounterVec::new(
            Opts::new(
                "gatesh_evaluations_skipped_total",
                "Cycles skipped because the cooldown had not elapsed",
            ),
            &["gate"],
        )?;
        registry.register(Box::new(evaluations_skipped_total.clone()))?;

        let gate_open = GaugeVec::new(
            Opts::new("gatesh_gate_open", "1 when the gate is opened, 0 when closed"),
            &["gate"],
        )?;
        registry.register(Box::new(gate_open.clone()))?;

        let target_fetch_errors_total = CounterVec::new(
            Opts::new(
                "gatesh_target_fetch_errors_total",
                "Targets that could not be resolved",
            ),
            &["gate", "target"],
        )?;
        registry.register(Box::new(target_fetch_errors_total.clone()))?;

        let evaluation_duration = HistogramVec::new(
            HistogramOpts::new(
                "gatesh_evaluation_duration_seconds",
                "Wall time of one evaluation cycle",
            )
            .buckets(EVALUATION_DURATION_BUCKETS.to_vec()),
            &["gate"],
        )?;
        registry.register(Box::new(evaluation_duration.clone()))?;

        let status_conflicts_total = IntCounter::new(
            "gatesh_status_conflicts_total",
            "Status writes rejected because the gate changed mid-cycle",
        )?;
        registry.register(Box::new(status_conflicts_total.clone()))?;

        Ok(Self {
            evaluations_total,
            evaluations_skipped_total,
            gate_open,
            target_fetch_errors_total,
            evaluation_duration,
            status_conflicts_total,
        })
    }

    /// Records a completed cycle.
    pub fn evaluation_completed(&self, key: &GateKey, result: &EvaluationResult, duration_secs: f64) {
        let gate = gate_label(key);
        let gate = gate.as_str();
        let outcome = if result.satisfied { "satisfied" } else { "unsatisfied" };
        self.evaluations_total
            .with_label_values(&[gate, outcome])
            .inc();
        self.gate_open
            .with_label_values(&[gate])
            .set(if result.state().is_opened() { 1.0 } else { 0.0 });
        self.evaluation_duration
            .with_label_values(&[gate])
            .observe(duration_secs);

        for target in &result.targets {
            if target.reason == TargetReason::ErrorWhileFetching {
                self.target_fetch_errors_total
                    .with_label_values(&[gate, name_label(&target.name)])
                    .inc();
            }
        }
    }

    /// Records a cycle skipped by the cooldown.
    pub fn evaluation_skipped(&self, key: &GateKey) {
        self.evaluations_skipped_total
            .with_label_values(&[gate_label(key).as_str()])
            .inc();
    }

    /// Records a rejected conditional status write.
    pub fn status_conflict(&self) {
        self.status_conflicts_total.inc();
    }

    /// Drops the open gauge of a deleted gate.
    pub fn gate_removed(&self, key: &GateKey) {
        let _ = self.gate_open.remove_label_values(&[gate_label(key).as_str()]);
    }

    /// Returns the completed cycle count for testing purposes.
    #[must_use]
    pub fn evaluation_count(&self, key: &GateKey, result: &str) -> f64 {
        self.evaluations_total
            .with_label_values(&[gate_label(key).as_str(), result])
            .get()
    }

    /// Returns the skipped cycle count for testing purposes.
    #[must_use]
    pub fn skipped_count(&self, key: &GateKey) -> f64 {
        self.evaluations_skipped_total
            .with_label_values(&[gate_label(key).as_str()])
            .get()
    }

    /// Returns the open gauge for testing purposes.
    #[must_use]
    pub fn gate_open_value(&self, key: &GateKey) -> f64 {
        self.gate_open
            .with_label_values(&[gate_label(key).as_str()])
            .get()
    }

    /// Returns the fetch error count for testing purposes.
    #[must_use]
    pub fn fetch_error_count(&self, key: &GateKey, target: &str) -> f64 {
        self.target_fetch_errors_total
            .with_label_values(&[gate_label(key).as_str(), name_label(target)])
            .get()
    }

    /// Returns the conflict count for testing purposes.
    #[must_use]
    pub fn conflict_count(&self) -> u64 {
        self.status_conflicts_total.get()
    }
}

/// Metrics registry wrapper that holds the Prometheus registry and gate
/// metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    gate_metrics: GateMetrics,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all gate metrics registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let gate_metrics = GateMetrics::new(&registry)?;
        Ok(Self {
            registry,
            gate_metrics,
        })
    }

    /// Returns the gate metrics.
    #[must_use]
    pub const fn gate_metrics(&self) -> &GateMetrics {
        &self.gate_metrics
    }

    /// Encodes all metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

/// Shared metrics registry for use across the daemon.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Creates a new shared metrics registry.
///
/// # Errors
///
/// Returns an error if metric registration fails.
pub fn new_shared_registry() -> MetricsResult<SharedMetricsRegistry> {
    Ok(Arc::new(MetricsRegistry::new()?))
}

/// Routes served by the daemon's metrics listener.
pub fn router(registry: SharedMetricsRegistry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(scrape))
        .with_state(registry)
}

async fn index() -> &'static str {
    "gatesh-daemon\n\nGET /metrics  gate verdicts and evaluation timings\n"
}

async fn scrape(State(registry): State<SharedMetricsRegistry>) -> Response {
    match registry.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        },
    }
}

/// Renders `key` as a `gate` label, shortening each name segment.
///
/// The kind prefix is kept whole so namespaced and cluster gates never
/// collide.
fn gate_label(key: &GateKey) -> String {
    let name = name_label(&key.name);
    match &key.namespace {
        Some(ns) => format!("{}/{}/{name}", key.kind, name_label(ns)),
        None => format!("{}/{name}", key.kind),
    }
}

/// First [`MAX_LABEL_NAME_CHARS`] characters of a gate, namespace or target name.
fn name_label(name: &str) -> &str {
    name.char_indices()
        .nth(MAX_LABEL_NAME_CHARS)
        .map_or(name, |(end, _)| &name[..end])
}
