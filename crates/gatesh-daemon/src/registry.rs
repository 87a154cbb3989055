//! Gate registry: the daemon's store of gate resources.
//!
//! The registry is the only writer of gate statuses. Writes are conditional
//! on the resource version the cycle started from, so a gate edited or
//! deleted mid-cycle never receives a stale verdict.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatesh_core::{GateKey, GateResource, GateStatus, PolicyError, StatusWriteError, StatusWriter};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory gate store with optimistic concurrency.
#[derive(Debug, Default)]
pub struct GateRegistry {
    gates: RwLock<BTreeMap<GateKey, GateResource>>,
}

impl GateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates a gate after admission.
    ///
    /// An update keeps the stored status and counters, bumps the resource
    /// version, and bumps the generation when the spec changed.
    pub async fn apply(&self, mut gate: GateResource) -> Result<GateKey, PolicyError> {
        gate.spec.validate()?;
        let key = gate.key();
        let mut gates = self.gates.write().await;

        if let Some(existing) = gates.get(&key) {
            let generation = existing.metadata.generation.unwrap_or(1);
            gate.metadata.generation = Some(if existing.spec == gate.spec {
                generation
            } else {
                generation + 1
            });
            gate.metadata.resource_version = existing.metadata.resource_version + 1;
            gate.status = existing.status.clone();
            debug!(gate = %key, generation = ?gate.metadata.generation, "gate updated");
        } else {
            gate.metadata.generation.get_or_insert(1);
            info!(gate = %key, "gate registered");
        }

        gates.insert(key.clone(), gate);
        Ok(key)
    }

    /// Deletes a gate together with its status and counters.
    pub async fn remove(&self, key: &GateKey) -> Option<GateResource> {
        let removed = self.gates.write().await.remove(key);
        if removed.is_some() {
            info!(gate = %key, "gate removed");
        }
        removed
    }

    /// Snapshot of one gate.
    pub async fn get(&self, key: &GateKey) -> Option<GateResource> {
        self.gates.read().await.get(key).cloned()
    }

    /// Snapshot of every gate, in key order.
    pub async fn list(&self) -> Vec<GateResource> {
        self.gates.read().await.values().cloned().collect()
    }

    /// Keys of every gate, in key order.
    pub async fn keys(&self) -> Vec<GateKey> {
        self.gates.read().await.keys().cloned().collect()
    }

    /// Gates whose next evaluation is due at `now`.
    ///
    /// A gate is due when it was never evaluated, when its scheduled time
    /// has passed, or when its spec changed since the last status.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<GateKey> {
        self.gates
            .read()
            .await
            .iter()
            .filter(|(_, gate)| match &gate.status {
                None => true,
                Some(status) => {
                    status.next_evaluation.is_none_or(|next| next <= now)
                        || status.observed_generation != gate.metadata.generation
                },
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of registered gates.
    pub async fn len(&self) -> usize {
        self.gates.read().await.len()
    }

    /// Returns `true` when no gate is registered.
    pub async fn is_empty(&self) -> bool {
        self.gates.read().await.is_empty()
    }
}

#[async_trait]
impl StatusWriter for GateRegistry {
    async fn write_status(
        &self,
        key: &GateKey,
        resource_version: u64,
        status: GateStatus,
    ) -> Result<u64, StatusWriteError> {
        let mut gates = self.gates.write().await;
        let gate = gates.get_mut(key).ok_or(StatusWriteError::NotFound)?;
        if gate.metadata.resource_version != resource_version {
            return Err(StatusWriteError::Conflict {
                expected: resource_version,
                actual: gate.metadata.resource_version,
            });
        }
        gate.status = Some(status);
        gate.metadata.resource_version += 1;
        Ok(gate.metadata.resource_version)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use gatesh_core::policy::{Target, TargetSelector};
    use gatesh_core::{GateSpec, GateState};

    use super::*;

    fn spec(name: &str) -> GateSpec {
        GateSpec {
            targets: vec![Target {
                name: None,
                selector: TargetSelector {
                    kind: "ConfigMap".to_string(),
                    api_version: "v1".to_string(),
                    namespace: None,
                    name: Some(name.to_string()),
                    label_selector: None,
                },
                validators: vec![],
            }],
            ..GateSpec::default()
        }
    }

    #[tokio::test]
    async fn conditional_write_bumps_resource_version() {
        let registry = GateRegistry::new();
        let key = registry
            .apply(GateResource::namespaced("prod", "release", spec("cm1")))
            .await
            .unwrap();

        let status = GateStatus {
            state: GateState::Opened,
            ..GateStatus::default()
        };
        assert_eq!(registry.write_status(&key, 0, status.clone()).await, Ok(1));
        assert_eq!(
            registry.write_status(&key, 0, status).await,
            Err(StatusWriteError::Conflict {
                expected: 0,
                actual: 1
            })
        );
        let gate = registry.get(&key).await.unwrap();
        assert_eq!(gate.status.unwrap().state, GateState::Opened);
    }

    #[tokio::test]
    async fn spec_change_bumps_generation_and_keeps_status() {
        let registry = GateRegistry::new();
        let key = registry
            .apply(GateResource::namespaced("prod", "release", spec("cm1")))
            .await
            .unwrap();
        registry
            .write_status(&key, 0, GateStatus::default())
            .await
            .unwrap();

        registry
            .apply(GateResource::namespaced("prod", "release", spec("cm1")))
            .await
            .unwrap();
        let same = registry.get(&key).await.unwrap();
        assert_eq!(same.metadata.generation, Some(1));
        assert_eq!(same.metadata.resource_version, 2);
        assert!(same.status.is_some());

        registry
            .apply(GateResource::namespaced("prod", "release", spec("cm2")))
            .await
            .unwrap();
        let changed = registry.get(&key).await.unwrap();
        assert_eq!(changed.metadata.generation, Some(2));
        assert_eq!(changed.metadata.resource_version, 3);
    }

    #[tokio::test]
    async fn removal_discards_status_and_fails_writes() {
        let registry = GateRegistry::new();
        let key = registry
            .apply(GateResource::cluster("release", spec("cm1")))
            .await
            .unwrap();
        assert!(registry.remove(&key).await.is_some());
        assert!(registry.is_empty().await);
        assert_eq!(
            registry.write_status(&key, 0, GateStatus::default()).await,
            Err(StatusWriteError::NotFound)
        );
    }

    #[tokio::test]
    async fn due_gates_follow_next_evaluation() {
        let registry = GateRegistry::new();
        let key = registry
            .apply(GateResource::namespaced("prod", "release", spec("cm1")))
            .await
            .unwrap();
        let now = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000);
        assert_eq!(registry.due(now).await, vec![key.clone()]);

        let status = GateStatus {
            next_evaluation: Some(now + TimeDelta::seconds(60)),
            observed_generation: Some(1),
            ..GateStatus::default()
        };
        registry.write_status(&key, 0, status).await.unwrap();
        assert!(registry.due(now).await.is_empty());
        assert_eq!(registry.due(now + TimeDelta::seconds(60)).await, vec![key]);
    }

    #[tokio::test]
    async fn rejects_invalid_policies() {
        let registry = GateRegistry::new();
        let err = registry
            .apply(GateResource::namespaced("prod", "empty", GateSpec::default()))
            .await
            .unwrap_err();
        assert_eq!(err, PolicyError::NoTargets);
        assert_eq!(registry.len().await, 0);
    }
}
