//! Schema-less cluster objects.
//!
//! Targets may select any kind of object, so the engine never binds to
//! per-kind types. An [`Object`] wraps the raw structured document (an
//! insertion-ordered `serde_json::Value` tree) and exposes typed accessors for
//! the handful of fields the engine reads:
//!
//! - identity (`apiVersion`, `kind`, `metadata.namespace`, `metadata.name`),
//! - `metadata.labels` for label predicates,
//! - `status.conditions` for condition matching,
//! - arbitrary RFC 6901 pointers for structured-field matching.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Unique address of an object in the store.
///
/// Ordering is `(apiVersion, kind, namespace, name)`, which gives listings a
/// deterministic order independent of insertion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Group/version string, e.g. `apps/v1`.
    pub api_version: String,
    /// Object kind, e.g. `Deployment`.
    pub kind: String,
    /// Namespace; `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Creates a key. An empty namespace is normalised to `None`.
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {} {ns}/{}", self.api_version, self.kind, self.name),
            None => write!(f, "{} {} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// One entry of an object's `status.conditions` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCondition {
    /// Condition type, e.g. `Available`.
    pub type_: String,
    /// Condition status, usually `True`, `False` or `Unknown`.
    pub status: String,
    /// Machine-readable reason, if any.
    pub reason: Option<String>,
    /// Human-readable message, if any.
    pub message: Option<String>,
}

/// Malformed `status` or `status.conditions` shapes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    /// `status` exists but is not a map.
    #[error("status is not an object")]
    StatusNotAnObject,

    /// `status.conditions` exists but is not a list.
    #[error("status.conditions is not a list")]
    ConditionsNotAList,
}

/// Failures resolving an RFC 6901 pointer against an object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    /// The pointer is not RFC 6901 shaped.
    #[error("invalid pointer {pointer:?}")]
    InvalidPointer {
        /// The offending pointer.
        pointer: String,
    },

    /// A reference token addresses a member or index that does not exist.
    #[error("no value at {pointer:?} (token {token:?} not found)")]
    NotFound {
        /// The pointer being resolved.
        pointer: String,
        /// The first token that could not be resolved.
        token: String,
    },

    /// A reference token traverses into a scalar.
    #[error("cannot descend into a scalar at token {token:?} of {pointer:?}")]
    NotAContainer {
        /// The pointer being resolved.
        pointer: String,
        /// The token applied to the scalar.
        token: String,
    },

    /// An array was indexed with something that is not an RFC 6901 index.
    #[error("invalid array index {token:?} in {pointer:?}")]
    BadIndex {
        /// The pointer being resolved.
        pointer: String,
        /// The non-numeric token.
        token: String,
    },
}

/// A cluster object as a generic structured document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(Value);

impl Object {
    /// Wraps a raw document.
    #[must_use]
    pub const fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Returns the raw document.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the object and returns the raw document.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        let mut cursor = &self.0;
        for segment in path {
            cursor = cursor.get(segment)?;
        }
        cursor.as_str()
    }

    /// `apiVersion`, or an empty string when absent.
    #[must_use]
    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"]).unwrap_or_default()
    }

    /// `kind`, or an empty string when absent.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.str_at(&["kind"]).unwrap_or_default()
    }

    /// `metadata.name`, or an empty string when absent.
    #[must_use]
    pub fn name(&self) -> &str {
        self.str_at(&["metadata", "name"]).unwrap_or_default()
    }

    /// `metadata.namespace`; `None` when absent or empty.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.str_at(&["metadata", "namespace"])
            .filter(|ns| !ns.is_empty())
    }

    /// The store key of this object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.api_version(), self.kind(), self.namespace(), self.name())
    }

    /// `<namespace>/<name>`, or just `<name>` for cluster-scoped objects.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{ns}/{}", self.name()),
            None => self.name().to_string(),
        }
    }

    /// `metadata.labels`, keeping only string-valued entries.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.0
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reads `status.conditions`.
    ///
    /// A missing `status` or `status.conditions` yields an empty list. List
    /// entries that are not maps or carry no string `type` are skipped.
    pub fn conditions(&self) -> Result<Vec<ObjectCondition>, ConditionError> {
        let Some(status) = self.0.get("status") else {
            return Ok(Vec::new());
        };
        let status = status.as_object().ok_or(ConditionError::StatusNotAnObject)?;
        let Some(conditions) = status.get("conditions") else {
            return Ok(Vec::new());
        };
        let conditions = conditions
            .as_array()
            .ok_or(ConditionError::ConditionsNotAList)?;

        Ok(conditions
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|entry| {
                let type_ = entry.get("type")?.as_str()?.to_string();
                let text = |field: &str| entry.get(field).and_then(Value::as_str).map(str::to_string);
                Some(ObjectCondition {
                    type_,
                    status: text("status").unwrap_or_default(),
                    reason: text("reason"),
                    message: text("message"),
                })
            })
            .collect())
    }

    /// Resolves an RFC 6901 pointer against the raw document.
    ///
    /// Resolution is `serde_json`'s; on a miss the pointer is walked again
    /// prefix by prefix to name the first token that failed.
    pub fn field(&self, pointer: &str) -> Result<&Value, FieldError> {
        if !is_valid_pointer(pointer) {
            return Err(FieldError::InvalidPointer {
                pointer: pointer.to_string(),
            });
        }
        self.0
            .pointer(pointer)
            .ok_or_else(|| self.missing_field(pointer))
    }

    fn missing_field(&self, pointer: &str) -> FieldError {
        let mut parent = &self.0;
        let mut end = 0;
        for raw in pointer[1..].split('/') {
            end += raw.len() + 1;
            let Some(next) = self.0.pointer(&pointer[..end]) else {
                let token = raw.replace("~1", "/").replace("~0", "~");
                let pointer = pointer.to_string();
                return match parent {
                    Value::Object(_) => FieldError::NotFound { pointer, token },
                    Value::Array(_) if is_array_index(&token) => {
                        FieldError::NotFound { pointer, token }
                    },
                    Value::Array(_) => FieldError::BadIndex { pointer, token },
                    _ => FieldError::NotAContainer { pointer, token },
                };
            };
            parent = next;
        }
        FieldError::NotFound {
            pointer: pointer.to_string(),
            token: String::new(),
        }
    }
}

impl From<Value> for Object {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Returns `true` when `pointer` is RFC 6901 shaped: empty, or `/`-prefixed
/// with every `~` escaped as `~0` or `~1`.
#[must_use]
pub fn is_valid_pointer(pointer: &str) -> bool {
    if pointer.is_empty() {
        return true;
    }
    pointer.starts_with('/')
        && pointer
            .split('~')
            .skip(1)
            .all(|rest| rest.starts_with('0') || rest.starts_with('1'))
}

/// Array indices are base-10 without leading zeros; `-` never resolves.
fn is_array_index(token: &str) -> bool {
    !token.is_empty()
        && !(token.len() > 1 && token.starts_with('0'))
        && token.bytes().all(|b| b.is_ascii_digit())
}

/// Canonical text of a field value for comparison against a literal.
///
/// Strings compare by content (no quotes), numbers and booleans by their JSON
/// text (`3`, `1.5`, `true`), `null` as `null`, and lists or maps by their
/// compact JSON encoding.
#[must_use]
pub fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
