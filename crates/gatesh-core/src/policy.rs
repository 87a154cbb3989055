//! Gate policy: the declarative spec, its defaults and admission checks.
//!
//! A [`GateSpec`] is what users write. Absent fields stay absent until
//! [`GateSpec::resolve`] runs the single defaulting step and the admission
//! checks, producing an [`EffectiveSpec`] in which every field is concrete.
//! The evaluation engine only ever consumes an [`EffectiveSpec`].

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PolicyError;
use crate::object::{field_text, is_valid_pointer};
use crate::selector::LabelSelector;

/// Default spacing between two evaluation cycles.
pub const DEFAULT_EVALUATION_PERIOD: Duration = Duration::from_secs(60);

/// Default number of consecutive valid cycles required to open.
pub const DEFAULT_CONSOLIDATION_COUNT: u32 = 1;

/// Default minimum spacing between two counted cycles.
pub const DEFAULT_CONSOLIDATION_DELAY: Duration = Duration::from_secs(5);

/// Default expected status of a `matchCondition` validator.
pub const DEFAULT_MATCH_CONDITION_STATUS: &str = "True";

static PASCAL_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Z][A-Za-z0-9]*$").expect("pascal case regex is valid"));

/// Desired state of a gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSpec {
    /// Targets to evaluate.
    #[serde(default)]
    pub targets: Vec<Target>,

    /// How target verdicts combine.
    #[serde(default)]
    pub operation: Operation,

    /// Minimum spacing between cycles.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub evaluation_period: Option<Duration>,

    /// Opening hysteresis.
    #[serde(default)]
    pub consolidation: Consolidation,
}

/// Boolean combination of target verdicts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// `And` or `Or`; defaults to `And`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,

    /// Flip the combined result.
    #[serde(default)]
    pub invert: bool,
}

/// Combination operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Every target must be satisfied.
    #[default]
    #[serde(alias = "AND", alias = "and")]
    And,
    /// At least one target must be satisfied.
    #[serde(alias = "OR", alias = "or")]
    Or,
}

/// Opening hysteresis settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consolidation {
    /// Consecutive valid cycles required before opening.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Minimum spacing between two counted cycles.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
}

/// One named object set and its validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// PascalCase identifier; `Target<n>` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// What to fetch.
    pub selector: TargetSelector,

    /// What the fetched objects must satisfy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
}

/// Declarative object selector.
///
/// Exactly one of `name` and `label_selector` must be set. The invariant is
/// checked by the resolver, so a violation fails only the owning target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelector {
    /// Object kind.
    pub kind: String,

    /// Object group/version.
    pub api_version: String,

    /// Namespace; defaults to the gate's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Single object name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Label selector for object sets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

/// A check applied to a target's object set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Validator {
    /// Quorum threshold over the object set.
    AtLeast(AtLeast),
    /// Named status condition on every object.
    MatchCondition(MatchCondition),
    /// Structured field equality on every object.
    JsonPointer(JsonPointerMatch),
}

/// Quorum threshold; the larger of the absolute and relative forms wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtLeast {
    /// Absolute number of passing objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Percentage (0-100) of found objects that must pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u32>,
}

/// Condition requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCondition {
    /// Condition type, e.g. `Available`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Expected condition status.
    #[serde(default = "default_match_condition_status")]
    pub status: String,
}

fn default_match_condition_status() -> String {
    DEFAULT_MATCH_CONDITION_STATUS.to_string()
}

/// Structured field requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonPointerMatch {
    /// RFC 6901 pointer into the object document.
    pub pointer: String,

    /// Expected value, compared against the field's canonical text.
    ///
    /// Non-string scalars in the policy (`value: 3`) are accepted and turned
    /// into their canonical text so that both sides use the same rule.
    #[serde(deserialize_with = "deserialize_literal")]
    pub value: String,
}

fn deserialize_literal<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(field_text(&value))
}

/// Engine-wide defaults applied to absent policy fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Evaluation period when the policy omits it.
    #[serde(default = "default_evaluation_period", with = "humantime_serde")]
    pub evaluation_period: Duration,

    /// Consolidation count when the policy omits it.
    #[serde(default = "default_consolidation_count")]
    pub consolidation_count: u32,

    /// Consolidation delay when the policy omits it.
    #[serde(default = "default_consolidation_delay", with = "humantime_serde")]
    pub consolidation_delay: Duration,
}

const fn default_evaluation_period() -> Duration {
    DEFAULT_EVALUATION_PERIOD
}

const fn default_consolidation_count() -> u32 {
    DEFAULT_CONSOLIDATION_COUNT
}

const fn default_consolidation_delay() -> Duration {
    DEFAULT_CONSOLIDATION_DELAY
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            evaluation_period: DEFAULT_EVALUATION_PERIOD,
            consolidation_count: DEFAULT_CONSOLIDATION_COUNT,
            consolidation_delay: DEFAULT_CONSOLIDATION_DELAY,
        }
    }
}

/// Fully defaulted, validated policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSpec {
    /// Targets, in declaration order.
    pub targets: Vec<EffectiveTarget>,
    /// Combination operator.
    pub operator: Operator,
    /// Whether the combined result is flipped.
    pub invert: bool,
    /// Minimum spacing between cycles.
    pub evaluation_period: Duration,
    /// Consecutive valid cycles required to open.
    pub consolidation_count: u32,
    /// Minimum spacing between counted cycles.
    pub consolidation_delay: Duration,
}

/// A named target with at least one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveTarget {
    /// Target name.
    pub name: String,
    /// Object selector.
    pub selector: TargetSelector,
    /// Validators, never empty.
    pub validators: Vec<Validator>,
}

impl GateSpec {
    /// Fills every absent field with its default, in place.
    ///
    /// Idempotent: applying defaults twice changes nothing.
    pub fn apply_defaults(&mut self, defaults: &PolicyDefaults) {
        self.evaluation_period.get_or_insert(defaults.evaluation_period);
        self.consolidation
            .count
            .get_or_insert(defaults.consolidation_count);
        self.consolidation
            .delay
            .get_or_insert(defaults.consolidation_delay);
        self.operation.operator.get_or_insert(Operator::And);

        for (idx, target) in self.targets.iter_mut().enumerate() {
            if target.name.as_deref().is_none_or(str::is_empty) {
                target.name = Some(format!("Target{}", idx + 1));
            }
            if target.validators.is_empty() {
                target.validators = vec![Validator::AtLeast(AtLeast {
                    count: Some(1),
                    percent: None,
                })];
            }
        }
    }

    /// Admission checks.
    ///
    /// Target names are only checked when present, so this can run before
    /// or after [`Self::apply_defaults`].
    ///
    /// # Errors
    ///
    /// Returns the first [`PolicyError`] found.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.targets.is_empty() {
            return Err(PolicyError::NoTargets);
        }
        if self.consolidation.count == Some(0) {
            return Err(PolicyError::ZeroConsolidationCount);
        }
        if self.evaluation_period == Some(Duration::ZERO) {
            return Err(PolicyError::ZeroEvaluationPeriod);
        }

        let mut seen = HashSet::new();
        for (idx, target) in self.targets.iter().enumerate() {
            let label = target
                .name
                .clone()
                .unwrap_or_else(|| format!("Target{}", idx + 1));
            if let Some(name) = &target.name {
                if !PASCAL_CASE.is_match(name) {
                    return Err(PolicyError::InvalidTargetName(name.clone()));
                }
            }
            if !seen.insert(label.clone()) {
                return Err(PolicyError::DuplicateTargetName(label));
            }

            for validator in &target.validators {
                match validator {
                    Validator::AtLeast(AtLeast {
                        count: None,
                        percent: None,
                    }) => {
                        return Err(PolicyError::EmptyQuorum { target: label });
                    },
                    Validator::AtLeast(AtLeast {
                        percent: Some(percent),
                        ..
                    }) if *percent > 100 => {
                        return Err(PolicyError::PercentOutOfRange {
                            target: label,
                            percent: *percent,
                        });
                    },
                    Validator::MatchCondition(cond) if !PASCAL_CASE.is_match(&cond.type_) => {
                        return Err(PolicyError::InvalidConditionType(cond.type_.clone()));
                    },
                    Validator::JsonPointer(jp) if !is_valid_pointer(&jp.pointer) => {
                        return Err(PolicyError::InvalidPointer {
                            target: label,
                            pointer: jp.pointer.clone(),
                        });
                    },
                    _ => {},
                }
            }
        }
        Ok(())
    }

    /// Applies defaults to a copy, validates it and returns the effective
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns the first [`PolicyError`] found after defaulting.
    pub fn resolve(&self, defaults: &PolicyDefaults) -> Result<EffectiveSpec, PolicyError> {
        let mut spec = self.clone();
        spec.apply_defaults(defaults);
        spec.validate()?;

        Ok(EffectiveSpec {
            targets: spec
                .targets
                .into_iter()
                .enumerate()
                .map(|(idx, target)| EffectiveTarget {
                    name: target.name.unwrap_or_else(|| format!("Target{}", idx + 1)),
                    selector: target.selector,
                    validators: target.validators,
                })
                .collect(),
            operator: spec.operation.operator.unwrap_or_default(),
            invert: spec.operation.invert,
            evaluation_period: spec
                .evaluation_period
                .unwrap_or(defaults.evaluation_period),
            consolidation_count: spec
                .consolidation
                .count
                .unwrap_or(defaults.consolidation_count),
            consolidation_delay: spec
                .consolidation
                .delay
                .unwrap_or(defaults.consolidation_delay),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> TargetSelector {
        TargetSelector {
            kind: "ConfigMap".to_string(),
            api_version: "v1".to_string(),
            namespace: None,
            name: Some("cm1".to_string()),
            label_selector: None,
        }
    }

    fn target(name: Option<&str>, validators: Vec<Validator>) -> Target {
        Target {
            name: name.map(str::to_string),
            selector: selector(),
            validators,
        }
    }

    #[test]
    fn parses_yaml_shaped_json_policy() {
        let spec: GateSpec = serde_json::from_value(serde_json::json!({
            "targets": [{
                "name": "Deployments",
                "selector": {
                    "kind": "Deployment",
                    "apiVersion": "apps/v1",
                    "labelSelector": {"matchLabels": {"app": "web"}}
                },
                "validators": [
                    {"atLeast": {"percent": 50}},
                    {"matchCondition": {"type": "Available"}},
                    {"jsonPointer": {"pointer": "/spec/replicas", "value": 3}}
                ]
            }],
            "operation": {"operator": "Or", "invert": true},
            "evaluationPeriod": "30s",
            "consolidation": {"count": 3, "delay": "10s"}
        }))
        .unwrap();

        assert_eq!(spec.operation.operator, Some(Operator::Or));
        assert!(spec.operation.invert);
        assert_eq!(spec.evaluation_period, Some(Duration::from_secs(30)));
        assert_eq!(spec.consolidation.delay, Some(Duration::from_secs(10)));
        let validators = &spec.targets[0].validators;
        assert_eq!(
            validators[1],
            Validator::MatchCondition(MatchCondition {
                type_: "Available".to_string(),
                status: "True".to_string(),
            })
        );
        assert_eq!(
            validators[2],
            Validator::JsonPointer(JsonPointerMatch {
                pointer: "/spec/replicas".to_string(),
                value: "3".to_string(),
            })
        );
    }

    #[test]
    fn validator_with_two_arms_is_rejected_by_the_parser() {
        let parsed: Result<Validator, _> = serde_json::from_value(serde_json::json!({
            "atLeast": {"count": 1},
            "matchCondition": {"type": "Ready"}
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn defaults_fill_every_absent_field() {
        let mut spec = GateSpec {
            targets: vec![target(None, vec![]), target(Some("Named"), vec![])],
            ..GateSpec::default()
        };
        spec.apply_defaults(&PolicyDefaults::default());

        assert_eq!(spec.evaluation_period, Some(DEFAULT_EVALUATION_PERIOD));
        assert_eq!(spec.consolidation.count, Some(1));
        assert_eq!(spec.consolidation.delay, Some(Duration::from_secs(5)));
        assert_eq!(spec.operation.operator, Some(Operator::And));
        assert_eq!(spec.targets[0].name.as_deref(), Some("Target1"));
        assert_eq!(spec.targets[1].name.as_deref(), Some("Named"));
        assert_eq!(
            spec.targets[0].validators,
            vec![Validator::AtLeast(AtLeast {
                count: Some(1),
                percent: None
            })]
        );

        let once = spec.clone();
        spec.apply_defaults(&PolicyDefaults::default());
        assert_eq!(spec, once);
    }

    #[test]
    fn resolve_produces_concrete_spec() {
        let spec = GateSpec {
            targets: vec![target(None, vec![])],
            evaluation_period: Some(Duration::from_secs(15)),
            ..GateSpec::default()
        };
        let effective = spec.resolve(&PolicyDefaults::default()).unwrap();
        assert_eq!(effective.targets[0].name, "Target1");
        assert_eq!(effective.operator, Operator::And);
        assert!(!effective.invert);
        assert_eq!(effective.evaluation_period, Duration::from_secs(15));
        assert_eq!(effective.consolidation_count, 1);
    }

    #[test]
    fn validation_rejects_bad_policies() {
        let defaults = PolicyDefaults::default();
        let check = |spec: GateSpec| spec.resolve(&defaults).unwrap_err();

        assert_eq!(check(GateSpec::default()), PolicyError::NoTargets);

        assert_eq!(
            check(GateSpec {
                targets: vec![target(Some("lowercase"), vec![])],
                ..GateSpec::default()
            }),
            PolicyError::InvalidTargetName("lowercase".to_string())
        );

        assert_eq!(
            check(GateSpec {
                targets: vec![target(Some("Same"), vec![]), target(Some("Same"), vec![])],
                ..GateSpec::default()
            }),
            PolicyError::DuplicateTargetName("Same".to_string())
        );

        assert_eq!(
            check(GateSpec {
                targets: vec![target(
                    Some("Pods"),
                    vec![Validator::MatchCondition(MatchCondition {
                        type_: "ready".to_string(),
                        status: "True".to_string(),
                    })]
                )],
                ..GateSpec::default()
            }),
            PolicyError::InvalidConditionType("ready".to_string())
        );

        assert!(matches!(
            check(GateSpec {
                targets: vec![target(
                    Some("Pods"),
                    vec![Validator::AtLeast(AtLeast {
                        count: None,
                        percent: Some(101)
                    })]
                )],
                ..GateSpec::default()
            }),
            PolicyError::PercentOutOfRange { percent: 101, .. }
        ));

        assert!(matches!(
            check(GateSpec {
                targets: vec![target(
                    Some("Pods"),
                    vec![Validator::AtLeast(AtLeast::default())]
                )],
                ..GateSpec::default()
            }),
            PolicyError::EmptyQuorum { .. }
        ));

        assert!(matches!(
            check(GateSpec {
                targets: vec![target(
                    Some("Pods"),
                    vec![Validator::JsonPointer(JsonPointerMatch {
                        pointer: "spec/replicas".to_string(),
                        value: "3".to_string(),
                    })]
                )],
                ..GateSpec::default()
            }),
            PolicyError::InvalidPointer { .. }
        ));

        assert_eq!(
            check(GateSpec {
                targets: vec![target(None, vec![])],
                consolidation: Consolidation {
                    count: Some(0),
                    delay: None
                },
                ..GateSpec::default()
            }),
            PolicyError::ZeroConsolidationCount
        );
    }

    #[test]
    fn generated_names_collide_with_explicit_ones() {
        let spec = GateSpec {
            targets: vec![target(None, vec![]), target(Some("Target1"), vec![])],
            ..GateSpec::default()
        };
        assert_eq!(
            spec.resolve(&PolicyDefaults::default()).unwrap_err(),
            PolicyError::DuplicateTargetName("Target1".to_string())
        );
    }
}
