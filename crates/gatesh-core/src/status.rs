//! Gate status: the verdict the engine writes back.
//!
//! Conditions follow the keyed-by-type convention of Kubernetes status
//! conditions: [`set_status_condition`] inserts or updates in place and only
//! moves `lastTransitionTime` when the status itself flips.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consolidation::ConsolidationState;

/// Gate condition type set while opened.
pub const CONDITION_OPENED: &str = "Opened";
/// Gate condition type set while closed.
pub const CONDITION_CLOSED: &str = "Closed";
/// Mirrors [`CONDITION_OPENED`] under the conventional readiness name.
pub const CONDITION_AVAILABLE: &str = "Available";
/// Mirrors [`CONDITION_CLOSED`] under the conventional readiness name.
pub const CONDITION_PROGRESSING: &str = "Progressing";

/// Tri-state status of a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold.
    False,
    /// Not yet determined.
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Maps a boolean onto `True`/`False`.
    #[must_use]
    pub const fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        })
    }
}

/// A status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Key of the condition within its list.
    #[serde(rename = "type")]
    pub type_: String,
    /// Current status.
    pub status: ConditionStatus,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
    /// When `status` last changed.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Creates a condition stamped at `now`.
    #[must_use]
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
        }
    }
}

/// Inserts `new` or updates the condition of the same type.
///
/// On update, `reason` and `message` always follow `new`; the transition
/// time is taken from `new` only when `status` changes. Returns `true` when
/// anything changed.
pub fn set_status_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) else {
        conditions.push(new);
        return true;
    };

    let mut changed = false;
    if existing.status != new.status {
        existing.status = new.status;
        existing.last_transition_time = new.last_transition_time;
        changed = true;
    }
    if existing.reason != new.reason {
        existing.reason = new.reason;
        changed = true;
    }
    if existing.message != new.message {
        existing.message = new.message;
        changed = true;
    }
    changed
}

/// Finds a condition by type.
#[must_use]
pub fn find_status_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Debounced gate state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateState {
    /// Enough consecutive valid cycles have been observed.
    Opened,
    /// Initial state, and the state after any failing cycle.
    #[default]
    Closed,
}

impl GateState {
    /// Returns `true` for [`GateState::Opened`].
    #[must_use]
    pub const fn is_opened(self) -> bool {
        matches!(self, Self::Opened)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Opened => "Opened",
            Self::Closed => "Closed",
        })
    }
}

/// Why a target verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetReason {
    /// Enough objects passed the validators.
    ConditionMet,
    /// Too few objects passed the validators.
    ConditionNotMet,
    /// The object set could not be fetched.
    ErrorWhileFetching,
}

impl TargetReason {
    /// Wire name of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConditionMet => "ConditionMet",
            Self::ConditionNotMet => "ConditionNotMet",
            Self::ErrorWhileFetching => "ErrorWhileFetching",
        }
    }
}

impl fmt::Display for TargetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    /// Target name.
    pub name: String,
    /// Whether the target passed.
    pub satisfied: bool,
    /// Reason code.
    pub reason: TargetReason,
    /// Ordered human-readable trail.
    pub trail: Vec<String>,
    /// Size of the resolved object set.
    pub objects_found: usize,
}

impl TargetResult {
    /// The trail joined by newlines, as written to the target condition.
    #[must_use]
    pub fn message(&self) -> String {
        self.trail.join("\n")
    }
}

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Per-target verdicts, in declaration order.
    pub targets: Vec<TargetResult>,
    /// Raw combined verdict for this cycle.
    pub satisfied: bool,
    /// Consolidation state after this cycle.
    pub consolidation: ConsolidationState,
    /// When the cycle ran.
    pub evaluated_at: DateTime<Utc>,
    /// Earliest time for the next cycle.
    pub next_evaluation_at: DateTime<Utc>,
}

impl EvaluationResult {
    /// Debounced state after this cycle.
    #[must_use]
    pub const fn state(&self) -> GateState {
        self.consolidation.state
    }
}

/// Observed state of a gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStatus {
    /// Authoritative gate state.
    #[serde(default)]
    pub state: GateState,

    /// Gate-level conditions keyed by type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// One condition per target, keyed by target name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_conditions: Vec<Condition>,

    /// When the last cycle ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluation: Option<DateTime<Utc>>,

    /// Earliest time for the next cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_evaluation: Option<DateTime<Utc>>,

    /// Consecutive counted valid cycles.
    #[serde(default)]
    pub consecutive_valid_cycles: u32,

    /// When the last valid cycle was counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_counted_cycle: Option<DateTime<Utc>>,

    /// Policy generation the status was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl GateStatus {
    /// Consolidation state persisted in this status.
    #[must_use]
    pub const fn consolidation(&self) -> ConsolidationState {
        ConsolidationState {
            consecutive_valid_cycles: self.consecutive_valid_cycles,
            last_counted_at: self.last_counted_cycle,
            state: self.state,
        }
    }

    /// Folds an evaluation result into the status.
    ///
    /// Target conditions are rebuilt in target order but keep their
    /// transition times when their status did not flip.
    pub fn record(&mut self, result: &EvaluationResult, generation: Option<i64>) {
        let now = result.evaluated_at;
        let state = result.state();
        let opened = state.is_opened();
        let (reason, message) = if opened {
            ("GateConditionMet", "Gate was evaluated to true")
        } else {
            ("GateConditionNotMet", "Gate was evaluated to false")
        };

        for (type_, holds) in [
            (CONDITION_OPENED, opened),
            (CONDITION_AVAILABLE, opened),
            (CONDITION_CLOSED, !opened),
            (CONDITION_PROGRESSING, !opened),
        ] {
            set_status_condition(
                &mut self.conditions,
                Condition::new(type_, ConditionStatus::from_bool(holds), reason, message, now),
            );
        }

        let mut previous = std::mem::take(&mut self.target_conditions);
        for target in &result.targets {
            let new = Condition::new(
                target.name.clone(),
                ConditionStatus::from_bool(target.satisfied),
                target.reason.as_str(),
                target.message(),
                now,
            );
            let mut slot = previous
                .iter()
                .position(|c| c.type_ == target.name)
                .map(|idx| vec![previous.swap_remove(idx)])
                .unwrap_or_default();
            set_status_condition(&mut slot, new);
            self.target_conditions.extend(slot);
        }

        self.state = state;
        self.consecutive_valid_cycles = result.consolidation.consecutive_valid_cycles;
        self.last_counted_cycle = result.consolidation.last_counted_at;
        self.last_evaluation = Some(now);
        self.next_evaluation = Some(result.next_evaluation_at);
        if generation.is_some() {
            self.observed_generation = generation;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    #[test]
    fn transition_time_moves_only_when_status_flips() {
        let mut conditions = Vec::new();
        assert!(set_status_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::True, "Ok", "first", at(1)),
        ));

        assert!(set_status_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::True, "Ok", "second", at(2)),
        ));
        let ready = find_status_condition(&conditions, "Ready").unwrap();
        assert_eq!(ready.message, "second");
        assert_eq!(ready.last_transition_time, at(1));

        assert!(set_status_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::False, "Broken", "third", at(3)),
        ));
        let ready = find_status_condition(&conditions, "Ready").unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.last_transition_time, at(3));
        assert_eq!(conditions.len(), 1);

        assert!(!set_status_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::False, "Broken", "third", at(4)),
        ));
    }

    fn result(opened: bool, targets: Vec<TargetResult>, now: DateTime<Utc>) -> EvaluationResult {
        EvaluationResult {
            satisfied: opened,
            targets,
            consolidation: ConsolidationState {
                consecutive_valid_cycles: u32::from(opened),
                last_counted_at: opened.then_some(now),
                state: if opened { GateState::Opened } else { GateState::Closed },
            },
            evaluated_at: now,
            next_evaluation_at: now + TimeDelta::seconds(60),
        }
    }

    fn target(name: &str, satisfied: bool) -> TargetResult {
        TargetResult {
            name: name.to_string(),
            satisfied,
            reason: if satisfied {
                TargetReason::ConditionMet
            } else {
                TargetReason::ConditionNotMet
            },
            trail: vec!["1 objects found".to_string(), "1/1 valid objects".to_string()],
            objects_found: 1,
        }
    }

    #[test]
    fn record_sets_gate_and_target_conditions() {
        let mut status = GateStatus::default();
        status.record(&result(false, vec![target("A", true), target("B", false)], at(10)), Some(3));

        assert_eq!(status.state, GateState::Closed);
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.next_evaluation, Some(at(70)));
        let closed = find_status_condition(&status.conditions, CONDITION_CLOSED).unwrap();
        assert_eq!(closed.status, ConditionStatus::True);
        assert_eq!(closed.reason, "GateConditionNotMet");
        let available = find_status_condition(&status.conditions, CONDITION_AVAILABLE).unwrap();
        assert_eq!(available.status, ConditionStatus::False);

        let names: Vec<_> = status.target_conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(status.target_conditions[1].reason, "ConditionNotMet");
        assert_eq!(
            status.target_conditions[0].message,
            "1 objects found\n1/1 valid objects"
        );

        status.record(&result(true, vec![target("A", true), target("B", true)], at(80)), None);
        assert_eq!(status.state, GateState::Opened);
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.target_conditions[0].last_transition_time, at(10));
        assert_eq!(status.target_conditions[1].last_transition_time, at(80));
        let opened = find_status_condition(&status.conditions, CONDITION_OPENED).unwrap();
        assert_eq!(opened.status, ConditionStatus::True);
        assert_eq!(opened.last_transition_time, at(80));
        assert_eq!(status.consolidation().consecutive_valid_cycles, 1);
    }

    #[test]
    fn removed_targets_disappear_from_status() {
        let mut status = GateStatus::default();
        status.record(&result(true, vec![target("A", true), target("B", true)], at(0)), None);
        status.record(&result(true, vec![target("B", true)], at(60)), None);
        assert_eq!(status.target_conditions.len(), 1);
        assert_eq!(status.target_conditions[0].type_, "B");
    }

    #[test]
    fn status_serializes_in_camel_case() {
        let mut status = GateStatus::default();
        status.record(&result(false, vec![target("A", false)], at(0)), Some(1));
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "Closed");
        assert!(value.get("targetConditions").is_some());
        assert!(value.get("consecutiveValidCycles").is_some());
        assert_eq!(value["targetConditions"][0]["type"], "A");

        let back: GateStatus = serde_json::from_value(value).unwrap();
        assert_eq!(back, status);
    }
}
