//! Bounded worker pool driving gate evaluation.
//!
//! Every tick the pool asks the registry which gates are due and spawns one
//! task per gate that is not already being evaluated. A semaphore bounds the
//! number of cycles running at once; the in-flight set guarantees a gate never
//! has two overlapping cycles.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use gatesh_core::{
    Clock, GateKey, GateReconciler, ObjectStore, ReconcileError, ReconcileOutcome,
    StatusWriteError, SystemClock,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::GateMetrics;
use crate::registry::GateRegistry;

/// Reconciler specialised to the daemon's registry.
pub type RegistryReconciler<S> = GateReconciler<S, Arc<GateRegistry>>;

/// Result of one dispatched cycle.
pub type CycleReport = (GateKey, Result<ReconcileOutcome, ReconcileError>);

struct PoolInner<S> {
    reconciler: RegistryReconciler<S>,
    registry: Arc<GateRegistry>,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<GateKey>>,
}

/// Removes a gate from the in-flight set when its task ends, however it ends.
struct InFlightGuard<S> {
    pool: Arc<PoolInner<S>>,
    key: GateKey,
}

impl<S> Drop for InFlightGuard<S> {
    fn drop(&mut self) {
        self.pool
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Evaluates due gates concurrently.
pub struct WorkerPool<S> {
    inner: Arc<PoolInner<S>>,
    clock: Arc<dyn Clock>,
    metrics: Option<GateMetrics>,
    tick_interval: Duration,
}

impl<S: ObjectStore + 'static> WorkerPool<S> {
    /// Creates a pool running at most `workers` cycles at once.
    #[must_use]
    pub fn new(
        reconciler: RegistryReconciler<S>,
        registry: Arc<GateRegistry>,
        workers: usize,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                reconciler,
                registry,
                semaphore: Arc::new(Semaphore::new(workers.max(1))),
                in_flight: Mutex::new(HashSet::new()),
            }),
            clock: Arc::new(SystemClock),
            metrics: None,
            tick_interval,
        }
    }

    /// Records outcomes of cycles dispatched from now on in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: GateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replaces the clock used to find due gates.
    ///
    /// Use the same clock as the reconciler.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of gates currently being evaluated.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Dispatches every due gate that is not already in flight.
    pub async fn tick(&self) -> Vec<JoinHandle<Option<CycleReport>>> {
        let due = self.inner.registry.due(self.clock.now()).await;
        self.dispatch(due)
    }

    /// Evaluates every registered gate once and waits for the results.
    pub async fn run_once(&self) -> Vec<CycleReport> {
        let keys = self.inner.registry.keys().await;
        let mut reports = Vec::with_capacity(keys.len());
        for handle in self.dispatch(keys) {
            match handle.await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {},
                Err(e) => error!("evaluation task failed: {e}"),
            }
        }
        reports
    }

    /// Ticks until `shutdown` resolves, then waits for in-flight cycles.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        let mut pending: Vec<JoinHandle<Option<CycleReport>>> = Vec::new();

        info!(tick_interval = ?self.tick_interval, "worker pool started");
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {
                    pending.retain(|handle| !handle.is_finished());
                    pending.extend(self.tick().await);
                }
            }
        }

        info!(in_flight = self.in_flight(), "worker pool stopping");
        for handle in pending {
            if let Err(e) = handle.await {
                error!("evaluation task failed: {e}");
            }
        }
    }

    fn dispatch(&self, keys: Vec<GateKey>) -> Vec<JoinHandle<Option<CycleReport>>> {
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            let fresh = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.clone());
            if !fresh {
                debug!(gate = %key, "cycle already in flight");
                continue;
            }
            let guard = InFlightGuard {
                pool: Arc::clone(&self.inner),
                key,
            };
            handles.push(tokio::spawn(run_cycle(guard, self.metrics.clone())));
        }
        handles
    }
}

async fn run_cycle<S: ObjectStore + 'static>(
    guard: InFlightGuard<S>,
    metrics: Option<GateMetrics>,
) -> Option<CycleReport> {
    let pool = Arc::clone(&guard.pool);
    let key = guard.key.clone();
    let _permit = pool.semaphore.clone().acquire_owned().await.ok()?;

    // Deleted while queued.
    let gate = pool.registry.get(&key).await?;

    let started = Instant::now();
    let outcome = pool.reconciler.reconcile(&gate).await;

    match &outcome {
        Ok(ReconcileOutcome::Evaluated { result, .. }) => {
            if let Some(metrics) = &metrics {
                metrics.evaluation_completed(&key, result, started.elapsed().as_secs_f64());
            }
        },
        Ok(ReconcileOutcome::Skipped { requeue_after }) => {
            debug!(gate = %key, ?requeue_after, "cycle skipped");
            if let Some(metrics) = &metrics {
                metrics.evaluation_skipped(&key);
            }
        },
        Err(ReconcileError::StatusWrite(StatusWriteError::Conflict { expected, actual })) => {
            warn!(gate = %key, expected, actual, "status conflict, retrying next tick");
            if let Some(metrics) = &metrics {
                metrics.status_conflict();
            }
        },
        Err(ReconcileError::StatusWrite(StatusWriteError::NotFound)) => {
            debug!(gate = %key, "gate deleted mid-cycle");
            if let Some(metrics) = &metrics {
                metrics.gate_removed(&key);
            }
        },
        Err(e) => error!(gate = %key, error = %e, "cycle failed"),
    }

    drop(guard);
    Some((key, outcome))
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use gatesh_core::policy::{Target, TargetSelector};
    use gatesh_core::{GateResource, GateSpec, GateState, InMemoryObjectStore, ManualClock, Object};
    use serde_json::json;

    use super::*;
    use crate::metrics::MetricsRegistry;

    fn spec() -> GateSpec {
        GateSpec {
            targets: vec![Target {
                name: None,
                selector: TargetSelector {
                    kind: "ConfigMap".to_string(),
                    api_version: "v1".to_string(),
                    namespace: None,
                    name: Some("cm1".to_string()),
                    label_selector: None,
                },
                validators: vec![],
            }],
            ..GateSpec::default()
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
    }

    async fn pool(
        gates: usize,
    ) -> (
        WorkerPool<Arc<InMemoryObjectStore>>,
        Arc<GateRegistry>,
        Arc<ManualClock>,
        MetricsRegistry,
    ) {
        let store = Arc::new(InMemoryObjectStore::with_objects([Object::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm1", "namespace": "prod"}
        }))]));
        let registry = Arc::new(GateRegistry::new());
        for i in 0..gates {
            registry
                .apply(GateResource::namespaced("prod", format!("gate-{i}"), spec()))
                .await
                .unwrap();
        }
        let clock = Arc::new(ManualClock::new(start()));
        let metrics = MetricsRegistry::new().unwrap();
        let reconciler = GateReconciler::new(store, Arc::clone(&registry)).with_clock(clock.clone());
        let pool = WorkerPool::new(reconciler, Arc::clone(&registry), 2, Duration::from_millis(10))
            .with_clock(clock.clone())
            .with_metrics(metrics.gate_metrics().clone());
        (pool, registry, clock, metrics)
    }

    #[tokio::test]
    async fn run_once_evaluates_every_gate() {
        let (pool, registry, _clock, metrics) = pool(5).await;
        let reports = pool.run_once().await;
        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(|(_, r)| matches!(r, Ok(ReconcileOutcome::Evaluated { .. }))));
        assert_eq!(pool.in_flight(), 0);

        for gate in registry.list().await {
            assert_eq!(gate.status.unwrap().state, GateState::Opened);
            assert_eq!(gate.metadata.resource_version, 1);
        }
        let keys = registry.keys().await;
        let first = &keys[0];
        assert_eq!(metrics.gate_metrics().evaluation_count(first, "satisfied"), 1.0);
        assert_eq!(metrics.gate_metrics().gate_open_value(first), 1.0);
    }

    #[tokio::test]
    async fn metrics_attach_while_pool_state_is_shared() {
        let (pool, registry, _clock, _metrics) = pool(1).await;
        let pool = WorkerPool {
            metrics: None,
            ..pool
        };
        let shared = Arc::clone(&pool.inner);

        let later = MetricsRegistry::new().unwrap();
        let pool = pool.with_metrics(later.gate_metrics().clone());
        pool.run_once().await;

        let keys = registry.keys().await;
        let key = &keys[0];
        assert_eq!(later.gate_metrics().evaluation_count(key, "satisfied"), 1.0);
        drop(shared);
    }

    #[tokio::test]
    async fn tick_only_dispatches_due_gates() {
        let (pool, _registry, clock, _metrics) = pool(3).await;
        for handle in pool.tick().await {
            handle.await.unwrap();
        }
        assert!(pool.tick().await.is_empty());

        clock.advance(Duration::from_secs(60));
        assert_eq!(pool.tick().await.len(), 3);
    }

    #[tokio::test]
    async fn gate_in_flight_is_not_dispatched_twice() {
        let (pool, registry, _clock, _metrics) = pool(1).await;
        let keys = registry.keys().await;
        pool.inner
            .in_flight
            .lock()
            .unwrap()
            .insert(keys[0].clone());
        assert!(pool.tick().await.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (pool, registry, _clock, _metrics) = pool(2).await;
        pool.run(tokio::time::sleep(Duration::from_millis(50))).await;
        assert_eq!(pool.in_flight(), 0);
        assert!(registry.list().await.iter().all(|g| g.status.is_some()));
    }
}
