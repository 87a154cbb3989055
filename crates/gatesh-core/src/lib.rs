//! # gatesh-core
//!
//! Evaluation engine for declarative release gates.
//!
//! A gate names one or more *targets* (sets of cluster objects picked by name
//! or label selector) and the checks those objects must pass. Each cycle the
//! engine samples live state from an [`ObjectStore`], reduces it to a single
//! open/closed verdict and writes that verdict back with per-target detail.
//!
//! ## Pipeline
//!
//! - [`TargetResolver`]: selector to concrete, possibly empty, object set
//! - [`validation::evaluate`]: object set plus validators to verdict and trail
//! - [`combinator::combine`]: per-target verdicts to one raw boolean
//! - [`Consolidator`]: raw boolean to debounced [`GateState`]
//! - [`GateReconciler`]: one full cycle, cooldown and conditional write-back
//!
//! ## Example
//!
//! ```rust
//! use gatesh_core::policy::{GateSpec, PolicyDefaults, Target, TargetSelector};
//!
//! let spec = GateSpec {
//!     targets: vec![Target {
//!         name: None,
//!         selector: TargetSelector {
//!             kind: "ConfigMap".to_string(),
//!             api_version: "v1".to_string(),
//!             namespace: None,
//!             name: Some("release-notes".to_string()),
//!             label_selector: None,
//!         },
//!         validators: vec![],
//!     }],
//!     ..GateSpec::default()
//! };
//!
//! let effective = spec.resolve(&PolicyDefaults::default()).unwrap();
//! assert_eq!(effective.targets[0].name, "Target1");
//! assert_eq!(effective.consolidation_count, 1);
//! ```
//!
//! ## Failure planes
//!
//! Target failures (bad selector, store outage, timeout) never abort a cycle;
//! they fail the target with reason `ErrorWhileFetching`. Only an invalid
//! policy or a failed status write is a cycle error.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod combinator;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod object;
pub mod policy;
pub mod resolver;
pub mod resource;
pub mod scheduler;
pub mod selector;
pub mod status;
pub mod store;
pub mod validation;

pub use config::{ConfigError, DaemonConfig, GateshConfig};
pub use consolidation::{ConsolidationState, Consolidator};
pub use error::{PolicyError, ReconcileError, ResolveError, StatusWriteError, StoreError};
pub use object::{Object, ObjectKey};
pub use policy::{EffectiveSpec, GateSpec, Operator, PolicyDefaults, Validator};
pub use resolver::TargetResolver;
pub use resource::{GateKey, GateKind, GateResource};
pub use scheduler::{
    Clock, GateReconciler, ManualClock, ReconcileOutcome, StatusWriter, SystemClock,
};
pub use status::{EvaluationResult, GateState, GateStatus, TargetReason, TargetResult};
pub use store::{InMemoryObjectStore, ObjectStore};
