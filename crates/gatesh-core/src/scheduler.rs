//! Reconciliation scheduler: one evaluation cycle per call.
//!
//! [`GateReconciler::reconcile`] is the whole cycle:
//!
//! 1. resolve the policy into its effective form,
//! 2. honour the cooldown (`lastEvaluation + evaluationPeriod`),
//! 3. resolve and validate every target concurrently,
//! 4. combine, consolidate, and write the status back conditionally.
//!
//! The scheduler never loops on its own. It reports how long the caller
//! should wait before the next call through [`ReconcileOutcome`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::combinator::combine;
use crate::consolidation::Consolidator;
use crate::error::{ReconcileError, ResolveError, StatusWriteError};
use crate::policy::{EffectiveTarget, PolicyDefaults};
use crate::resolver::TargetResolver;
use crate::resource::{GateKey, GateResource};
use crate::status::{EvaluationResult, GateStatus, TargetReason, TargetResult};
use crate::store::ObjectStore;
use crate::validation::evaluate;

/// Source of wall-clock time for cycle timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = shift(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Conditional write-back of a gate's status.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replaces the status of `key` if its resource version still equals
    /// `resource_version`, returning the new resource version.
    ///
    /// Writes are all-or-nothing: on error nothing was stored.
    async fn write_status(
        &self,
        key: &GateKey,
        resource_version: u64,
        status: GateStatus,
    ) -> Result<u64, StatusWriteError>;
}

#[async_trait]
impl<W: StatusWriter + ?Sized> StatusWriter for Arc<W> {
    async fn write_status(
        &self,
        key: &GateKey,
        resource_version: u64,
        status: GateStatus,
    ) -> Result<u64, StatusWriteError> {
        (**self).write_status(key, resource_version, status).await
    }
}

/// What a reconcile call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A cycle ran and its status was written.
    Evaluated {
        /// The cycle's result.
        result: Box<EvaluationResult>,
        /// Wait before the next call.
        requeue_after: Duration,
    },
    /// The gate is cooling down; nothing was read or written.
    Skipped {
        /// Remaining cooldown.
        requeue_after: Duration,
    },
}

impl ReconcileOutcome {
    /// Wait before the next call.
    #[must_use]
    pub const fn requeue_after(&self) -> Duration {
        match self {
            Self::Evaluated { requeue_after, .. } | Self::Skipped { requeue_after } => *requeue_after,
        }
    }
}

/// Runs evaluation cycles for gates.
#[derive(Debug)]
pub struct GateReconciler<S, W> {
    resolver: TargetResolver<S>,
    writer: W,
    clock: Arc<dyn Clock>,
    defaults: PolicyDefaults,
    target_timeout: Option<Duration>,
}

impl<S: ObjectStore, W: StatusWriter> GateReconciler<S, W> {
    /// Creates a reconciler using the system clock and built-in defaults.
    pub fn new(store: S, writer: W) -> Self {
        Self {
            resolver: TargetResolver::new(store),
            writer,
            clock: Arc::new(SystemClock),
            defaults: PolicyDefaults::default(),
            target_timeout: None,
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the policy defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: PolicyDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Bounds each target resolution; expiry fails only that target.
    #[must_use]
    pub const fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.target_timeout = Some(timeout);
        self
    }

    /// The status writer.
    pub const fn writer(&self) -> &W {
        &self.writer
    }

    /// Runs one cycle for `gate`.
    ///
    /// The cooldown is bypassed when the policy generation differs from the
    /// one the status was computed from.
    #[instrument(skip_all, fields(gate = %gate.key()))]
    pub async fn reconcile(&self, gate: &GateResource) -> Result<ReconcileOutcome, ReconcileError> {
        let spec = gate.spec.resolve(&self.defaults)?;
        let period = spec.evaluation_period;
        let now = self.clock.now();
        let previous = gate.status.clone().unwrap_or_default();

        let policy_changed = gate.metadata.generation.is_some()
            && previous.observed_generation != gate.metadata.generation;
        if let Some(last) = previous.last_evaluation {
            let due = shift(last, period);
            if due > now && !policy_changed {
                let requeue_after = (due - now).to_std().unwrap_or(Duration::ZERO);
                debug!(?requeue_after, "cooldown not elapsed, skipping");
                return Ok(ReconcileOutcome::Skipped { requeue_after });
            }
        }

        let namespace = gate.default_namespace();
        let targets = join_all(
            spec.targets
                .iter()
                .map(|target| self.evaluate_target(target, namespace)),
        )
        .await;

        let satisfied = combine(targets.iter().map(|t| t.satisfied), spec.operator, spec.invert);
        let consolidation = Consolidator::new(spec.consolidation_count, spec.consolidation_delay)
            .observe(previous.consolidation(), satisfied, now);

        let result = EvaluationResult {
            targets,
            satisfied,
            consolidation,
            evaluated_at: now,
            next_evaluation_at: shift(now, period),
        };

        let mut status = previous;
        status.record(&result, gate.metadata.generation);
        self.writer
            .write_status(&gate.key(), gate.metadata.resource_version, status)
            .await?;

        info!(
            satisfied,
            state = %result.state(),
            consecutive_valid_cycles = result.consolidation.consecutive_valid_cycles,
            "gate evaluated"
        );
        Ok(ReconcileOutcome::Evaluated {
            result: Box::new(result),
            requeue_after: period,
        })
    }

    async fn evaluate_target(&self, target: &EffectiveTarget, namespace: Option<&str>) -> TargetResult {
        let resolution = self.resolver.resolve(&target.selector, namespace);
        let objects = match self.target_timeout {
            Some(after) => tokio::time::timeout(after, resolution)
                .await
                .unwrap_or(Err(ResolveError::Timeout { after })),
            None => resolution.await,
        };

        match objects {
            Err(err) => {
                warn!(target = %target.name, error = %err, "unable to fetch target objects");
                TargetResult {
                    name: target.name.clone(),
                    satisfied: false,
                    reason: TargetReason::ErrorWhileFetching,
                    trail: vec![format!("not able to fetch target objects: {err}")],
                    objects_found: 0,
                }
            },
            Ok(objects) => {
                let verdict = evaluate(&objects, &target.validators);
                debug!(
                    target = %target.name,
                    satisfied = verdict.satisfied,
                    passing = verdict.passing,
                    threshold = verdict.threshold,
                    "target evaluated"
                );
                TargetResult {
                    name: target.name.clone(),
                    satisfied: verdict.satisfied,
                    reason: if verdict.satisfied {
                        TargetReason::ConditionMet
                    } else {
                        TargetReason::ConditionNotMet
                    },
                    trail: verdict.trail,
                    objects_found: verdict.objects_found,
                }
            },
        }
    }
}

/// `at + by`, saturating at the end of representable time.
fn shift(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
