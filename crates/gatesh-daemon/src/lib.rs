//! gatesh-daemon - gate evaluation daemon library
//!
//! Wires the `gatesh-core` engine into a long-running process: gates and
//! cluster objects come from manifest files, cycles run on a bounded worker
//! pool, and verdicts are exposed through Prometheus metrics.
//!
//! # Modules
//!
//! - [`manifest`]: YAML/JSON manifest loading
//! - [`registry`]: gate store and conditional status writer
//! - [`worker`]: bounded, non-overlapping evaluation scheduling
//! - [`metrics`]: Prometheus metrics for gate evaluation

#![warn(missing_docs)]

pub mod manifest;
pub mod metrics;
pub mod registry;
pub mod worker;

pub use manifest::{ManifestError, Manifests};
pub use metrics::{GateMetrics, MetricsRegistry, SharedMetricsRegistry, new_shared_registry};
pub use registry::GateRegistry;
pub use worker::{CycleReport, RegistryReconciler, WorkerPool};
