//! `Gate` and `ClusterGate` resources.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::GateSpec;
use crate::status::GateStatus;

/// API group/version of gate resources.
pub const GATE_API_VERSION: &str = "gate.sh/v1alpha1";

/// Gate scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GateKind {
    /// Namespaced gate; targets default to the gate's namespace.
    Gate,
    /// Cluster-scoped gate; targets default to cluster-wide.
    ClusterGate,
}

impl GateKind {
    /// Parses a manifest `kind`.
    #[must_use]
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Gate" => Some(Self::Gate),
            "ClusterGate" => Some(Self::ClusterGate),
            _ => None,
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gate => "Gate",
            Self::ClusterGate => "ClusterGate",
        })
    }
}

/// Identity of a gate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GateKey {
    /// Scope.
    pub kind: GateKind,
    /// Namespace; always `None` for cluster gates.
    pub namespace: Option<String>,
    /// Name.
    pub name: String,
}

impl fmt::Display for GateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{ns}/{}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Gate metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateMetadata {
    /// Gate name.
    pub name: String,

    /// Namespace of a `Gate`; ignored for `ClusterGate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Bumped on every write; used for conditional status updates.
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped on every spec change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// A gate resource: policy plus last observed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResource {
    /// Always [`GATE_API_VERSION`].
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Scope.
    pub kind: GateKind,

    /// Identity and versioning.
    pub metadata: GateMetadata,

    /// Desired policy.
    #[serde(default)]
    pub spec: GateSpec,

    /// Last written verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GateStatus>,
}

fn default_api_version() -> String {
    GATE_API_VERSION.to_string()
}

impl GateResource {
    /// Creates a namespaced gate.
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>, spec: GateSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: GateKind::Gate,
            metadata: GateMetadata {
                name: name.into(),
                namespace: Some(namespace.into()),
                resource_version: 0,
                generation: Some(1),
            },
            spec,
            status: None,
        }
    }

    /// Creates a cluster-scoped gate.
    #[must_use]
    pub fn cluster(name: impl Into<String>, spec: GateSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: GateKind::ClusterGate,
            metadata: GateMetadata {
                name: name.into(),
                namespace: None,
                resource_version: 0,
                generation: Some(1),
            },
            spec,
            status: None,
        }
    }

    /// Namespace targets default to: the gate's own for `Gate`, none for
    /// `ClusterGate`.
    #[must_use]
    pub fn default_namespace(&self) -> Option<&str> {
        match self.kind {
            GateKind::Gate => self.metadata.namespace.as_deref().filter(|ns| !ns.is_empty()),
            GateKind::ClusterGate => None,
        }
    }

    /// Identity of this gate.
    #[must_use]
    pub fn key(&self) -> GateKey {
        GateKey {
            kind: self.kind,
            namespace: self.default_namespace().map(str::to_string),
            name: self.metadata.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_gates_have_no_namespace() {
        let mut gate = GateResource::cluster("release", GateSpec::default());
        gate.metadata.namespace = Some("ignored".to_string());
        assert_eq!(gate.default_namespace(), None);
        assert_eq!(gate.key().to_string(), "ClusterGate/release");

        let gate = GateResource::namespaced("prod", "release", GateSpec::default());
        assert_eq!(gate.default_namespace(), Some("prod"));
        assert_eq!(gate.key().to_string(), "Gate/prod/release");
    }

    #[test]
    fn parses_manifest_shape() {
        let gate: GateResource = serde_json::from_value(serde_json::json!({
            "apiVersion": "gate.sh/v1alpha1",
            "kind": "Gate",
            "metadata": {"name": "release", "namespace": "prod"},
            "spec": {
                "targets": [{
                    "selector": {"kind": "ConfigMap", "apiVersion": "v1", "name": "cm1"}
                }]
            }
        }))
        .unwrap();
        assert_eq!(gate.kind, GateKind::Gate);
        assert_eq!(gate.metadata.resource_version, 0);
        assert!(gate.status.is_none());
        assert_eq!(gate.spec.targets.len(), 1);
    }
}
