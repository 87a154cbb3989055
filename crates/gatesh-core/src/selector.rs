//! Selector primitives: group/version parsing and label predicates.
//!
//! Label selectors arrive in their declarative form ([`LabelSelector`]:
//! `matchLabels` plus `matchExpressions`) and are compiled once into a
//! [`LabelPredicate`] that store adapters evaluate against object labels.
//! Compilation is where malformed selectors are rejected.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// A parsed `apiVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    /// API group; empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
}

impl GroupVersion {
    /// Parses `v1` or `group/version`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidSelector`] for an empty string, empty
    /// group or version segments, or more than one `/`.
    pub fn parse(api_version: &str) -> Result<Self, ResolveError> {
        let invalid = |why: &str| {
            ResolveError::invalid_selector(format!("invalid apiVersion {api_version:?}: {why}"))
        };
        if api_version.trim().is_empty() {
            return Err(invalid("empty"));
        }
        if api_version.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }
        match api_version.split_once('/') {
            None => Ok(Self {
                group: String::new(),
                version: api_version.to_string(),
            }),
            Some((group, version)) => {
                if version.contains('/') {
                    return Err(invalid("unexpected '/'"));
                }
                if group.is_empty() || version.is_empty() {
                    return Err(invalid("empty group or version"));
                }
                Ok(Self {
                    group: group.to_string(),
                    version: version.to_string(),
                })
            },
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// Declarative label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches, ANDed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements, ANDed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// One `matchExpressions` entry in its declarative form.
///
/// `operator` stays a plain string here so that an unknown operator is a
/// selector error surfaced per target, not a policy parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    /// Label key.
    pub key: String,
    /// `In`, `NotIn`, `Exists` or `DoesNotExist`.
    pub operator: String,
    /// Operand values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelector {
    /// Returns `true` when the selector has neither labels nor expressions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Compiles the selector into a predicate.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidSelector`] for empty keys, unknown
    /// operators, `In`/`NotIn` without values, or `Exists`/`DoesNotExist`
    /// with values.
    pub fn to_predicate(&self) -> Result<LabelPredicate, ResolveError> {
        let mut requirements = Vec::with_capacity(self.match_labels.len() + self.match_expressions.len());

        for (key, value) in &self.match_labels {
            validate_key(key)?;
            requirements.push(Requirement {
                key: key.clone(),
                operator: SelectorOperator::In,
                values: vec![value.clone()],
            });
        }

        for expr in &self.match_expressions {
            validate_key(&expr.key)?;
            let operator = SelectorOperator::parse(&expr.operator)?;
            match operator {
                SelectorOperator::In | SelectorOperator::NotIn if expr.values.is_empty() => {
                    return Err(ResolveError::invalid_selector(format!(
                        "operator {} on key {:?} requires at least one value",
                        expr.operator, expr.key
                    )));
                },
                SelectorOperator::Exists | SelectorOperator::DoesNotExist
                    if !expr.values.is_empty() =>
                {
                    return Err(ResolveError::invalid_selector(format!(
                        "operator {} on key {:?} takes no values",
                        expr.operator, expr.key
                    )));
                },
                _ => {},
            }
            requirements.push(Requirement {
                key: expr.key.clone(),
                operator,
                values: expr.values.clone(),
            });
        }

        Ok(LabelPredicate { requirements })
    }
}

fn validate_key(key: &str) -> Result<(), ResolveError> {
    if key.is_empty() {
        return Err(ResolveError::invalid_selector("label key must not be empty"));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ResolveError::invalid_selector(format!(
            "label key {key:?} contains whitespace"
        )));
    }
    Ok(())
}

/// Set-based selector operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorOperator {
    /// Label present with one of the values.
    In,
    /// Label absent, or present with none of the values.
    NotIn,
    /// Label present.
    Exists,
    /// Label absent.
    DoesNotExist,
}

impl SelectorOperator {
    fn parse(raw: &str) -> Result<Self, ResolveError> {
        match raw {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            other => Err(ResolveError::invalid_selector(format!(
                "unknown label selector operator {other:?}"
            ))),
        }
    }
}

/// A compiled requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Label key.
    pub key: String,
    /// Operator.
    pub operator: SelectorOperator,
    /// Operand values.
    pub values: Vec<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// A compiled label selector: the conjunction of its requirements.
///
/// An empty predicate matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPredicate {
    requirements: Vec<Requirement>,
}

impl LabelPredicate {
    /// The predicate that matches every object.
    #[must_use]
    pub const fn everything() -> Self {
        Self {
            requirements: Vec::new(),
        }
    }

    /// The compiled requirements.
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Evaluates the predicate against a label set.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_core_and_grouped_versions() {
        assert_eq!(
            GroupVersion::parse("v1").unwrap(),
            GroupVersion {
                group: String::new(),
                version: "v1".to_string()
            }
        );
        let gv = GroupVersion::parse("apps/v1").unwrap();
        assert_eq!(gv.group, "apps");
        assert_eq!(gv.version, "v1");
        assert_eq!(gv.to_string(), "apps/v1");
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", " ", "a/b/c", "/v1", "apps/", "apps /v1"] {
            assert!(
                matches!(
                    GroupVersion::parse(bad),
                    Err(ResolveError::InvalidSelector { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn match_labels_and_expressions_are_anded() {
        let selector = LabelSelector {
            match_labels: labels(&[("app", "web")]),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "In".to_string(),
                    values: vec!["frontend".to_string(), "edge".to_string()],
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: vec![],
                },
            ],
        };
        let predicate = selector.to_predicate().unwrap();
        assert_eq!(predicate.requirements().len(), 3);
        assert!(predicate.matches(&labels(&[("app", "web"), ("tier", "edge")])));
        assert!(!predicate.matches(&labels(&[("app", "web"), ("tier", "backend")])));
        assert!(!predicate.matches(&labels(&[
            ("app", "web"),
            ("tier", "edge"),
            ("canary", "yes")
        ])));
        assert!(!predicate.matches(&labels(&[("tier", "edge")])));
    }

    #[test]
    fn not_in_matches_absent_labels() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "NotIn".to_string(),
                values: vec!["prod".to_string()],
            }],
        };
        let predicate = selector.to_predicate().unwrap();
        assert!(predicate.matches(&labels(&[])));
        assert!(predicate.matches(&labels(&[("env", "dev")])));
        assert!(!predicate.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn rejects_unknown_operator() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: "Matches".to_string(),
                values: vec!["web".to_string()],
            }],
        };
        let err = selector.to_predicate().unwrap_err();
        assert!(err.to_string().contains("unknown label selector operator"));
    }

    #[test]
    fn rejects_operand_arity_mismatches() {
        let with = |operator: &str, values: Vec<String>| LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: operator.to_string(),
                values,
            }],
        };
        assert!(with("In", vec![]).to_predicate().is_err());
        assert!(with("Exists", vec!["x".to_string()]).to_predicate().is_err());
        assert!(with("Exists", vec![]).to_predicate().is_ok());
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector.is_empty());
        assert!(selector.to_predicate().unwrap().matches(&labels(&[("a", "b")])));
        assert!(LabelPredicate::everything().matches(&BTreeMap::new()));
    }
}
