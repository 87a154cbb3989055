//! Manifest loading.
//!
//! Manifests are YAML (multi-document) or JSON files. Documents whose kind is
//! `Gate` or `ClusterGate` become gate resources; every other document is a
//! cluster object served by the in-memory store. `kind: List` documents are
//! flattened into their `items`.

use std::path::{Path, PathBuf};

use gatesh_core::{GateKind, GateResource, Object, PolicyError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A file or directory could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A YAML document could not be parsed.
    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A JSON document could not be parsed, or a gate did not match the
    /// gate schema.
    #[error("failed to decode {path}: {source}")]
    Json {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A document is not a usable object.
    #[error("invalid manifest in {path}: {reason}")]
    InvalidDocument {
        /// Offending file.
        path: PathBuf,
        /// What is missing.
        reason: String,
    },

    /// A gate failed admission.
    #[error("gate {name} in {path} rejected: {source}")]
    Rejected {
        /// Offending file.
        path: PathBuf,
        /// Gate name.
        name: String,
        /// Admission error.
        #[source]
        source: PolicyError,
    },
}

/// Everything loaded from a set of manifest paths.
#[derive(Debug, Default)]
pub struct Manifests {
    /// Gate resources, in load order.
    pub gates: Vec<GateResource>,
    /// Cluster objects, in load order.
    pub objects: Vec<Object>,
}

impl Manifests {
    /// Loads every manifest under `paths`.
    ///
    /// Directories are walked recursively in file name order; only `.yaml`,
    /// `.yml` and `.json` files are read.
    pub fn load(paths: &[PathBuf]) -> Result<Self, ManifestError> {
        let mut manifests = Self::default();
        for path in paths {
            for file in manifest_files(path)? {
                manifests.load_file(&file)?;
            }
        }
        debug!(
            gates = manifests.gates.len(),
            objects = manifests.objects.len(),
            "manifests loaded"
        );
        Ok(manifests)
    }

    /// Loads one manifest file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        for document in parse_documents(path, &content, is_json)? {
            self.add_document(path, document)?;
        }
        Ok(())
    }

    fn add_document(&mut self, path: &Path, document: Value) -> Result<(), ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidDocument {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let Some(kind) = document.get("kind").and_then(Value::as_str) else {
            return Err(invalid("missing kind"));
        };

        if kind == "List" {
            let items = match document.get("items") {
                Some(Value::Array(items)) => items.clone(),
                None | Some(Value::Null) => Vec::new(),
                Some(_) => return Err(invalid("List items is not a list")),
            };
            for item in items {
                self.add_document(path, item)?;
            }
            return Ok(());
        }

        let is_gate_api = document
            .get("apiVersion")
            .and_then(Value::as_str)
            .is_some_and(|v| v.starts_with("gate.sh/"));
        if is_gate_api && GateKind::from_kind(kind).is_some() {
            let gate: GateResource =
                serde_json::from_value(document).map_err(|source| ManifestError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
            gate.spec
                .validate()
                .map_err(|source| ManifestError::Rejected {
                    path: path.to_path_buf(),
                    name: gate.metadata.name.clone(),
                    source,
                })?;
            self.gates.push(gate);
            return Ok(());
        }

        if document.get("apiVersion").and_then(Value::as_str).is_none() {
            return Err(invalid("missing apiVersion"));
        }
        if document.pointer("/metadata/name").and_then(Value::as_str).is_none() {
            return Err(invalid("missing metadata.name"));
        }
        self.objects.push(Object::from_value(document));
        Ok(())
    }
}

fn parse_documents(path: &Path, content: &str, is_json: bool) -> Result<Vec<Value>, ManifestError> {
    if is_json {
        let value: Value = serde_json::from_str(content).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(vec![value]);
    }

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document).map_err(|source| ManifestError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

fn manifest_files(path: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let io = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let metadata = std::fs::metadata(path).map_err(io)?;
    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut entries = std::fs::read_dir(path)
        .map_err(io)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io)?;
    entries.sort();

    let mut files = Vec::new();
    for entry in entries {
        if entry.is_dir() {
            files.extend(manifest_files(&entry)?);
        } else if entry
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"))
        {
            files.push(entry);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_gates_from_objects() {
        let yaml = r"
apiVersion: gate.sh/v1alpha1
kind: Gate
metadata:
  name: release
  namespace: prod
spec:
  targets:
    - selector:
        kind: ConfigMap
        apiVersion: v1
        name: cm1
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: prod
---
";
        let docs = parse_documents(Path::new("inline.yaml"), yaml, false).unwrap();
        assert_eq!(docs.len(), 2);

        let mut manifests = Manifests::default();
        for doc in docs {
            manifests.add_document(Path::new("inline.yaml"), doc).unwrap();
        }
        assert_eq!(manifests.gates.len(), 1);
        assert_eq!(manifests.objects.len(), 1);
        assert_eq!(manifests.objects[0].name(), "cm1");
    }

    #[test]
    fn flattens_lists() {
        let json = r#"{"apiVersion": "v1", "kind": "List", "items": [
            {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "a"}},
            {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "b"}}
        ]}"#;
        let mut manifests = Manifests::default();
        for doc in parse_documents(Path::new("pods.json"), json, true).unwrap() {
            manifests.add_document(Path::new("pods.json"), doc).unwrap();
        }
        assert_eq!(manifests.objects.len(), 2);
    }

    #[test]
    fn rejects_gates_failing_admission() {
        let yaml = "
apiVersion: gate.sh/v1alpha1
kind: ClusterGate
metadata:
  name: empty
spec:
  targets: []
";
        let doc = parse_documents(Path::new("g.yaml"), yaml, false)
            .unwrap()
            .remove(0);
        let err = Manifests::default()
            .add_document(Path::new("g.yaml"), doc)
            .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::Rejected {
                source: PolicyError::NoTargets,
                ..
            }
        ));
    }

    #[test]
    fn rejects_anonymous_objects() {
        let doc = serde_json::json!({"apiVersion": "v1", "kind": "Pod", "metadata": {}});
        let err = Manifests::default()
            .add_document(Path::new("x.yaml"), doc)
            .unwrap_err();
        assert!(err.to_string().contains("missing metadata.name"));
    }
}
