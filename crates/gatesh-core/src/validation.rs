//! Validator engine: object set plus validators in, verdict and trail out.

use serde::Serialize;

use crate::object::{Object, field_text};
use crate::policy::{AtLeast, JsonPointerMatch, MatchCondition, Validator};

/// Aggregate verdict for one target's object set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetVerdict {
    /// Whether enough objects passed.
    pub satisfied: bool,
    /// Size of the object set.
    pub objects_found: usize,
    /// Objects that passed every per-object validator.
    pub passing: usize,
    /// Passing objects required.
    pub threshold: usize,
    /// Summary lines followed by per-object diagnostics.
    pub trail: Vec<String>,
}

/// Evaluates `validators` against `objects`.
///
/// An empty validator list behaves like a single `atLeast: {count: 1}`.
/// When no `atLeast` yields a positive threshold, every found object must
/// pass and at least one must exist.
#[must_use]
pub fn evaluate(objects: &[Object], validators: &[Validator]) -> TargetVerdict {
    let implicit;
    let validators = if validators.is_empty() {
        implicit = [Validator::AtLeast(AtLeast {
            count: Some(1),
            percent: None,
        })];
        &implicit[..]
    } else {
        validators
    };

    let mut results = vec![true; objects.len()];
    let mut diagnostics = Vec::new();
    let mut threshold = 0usize;

    for validator in validators {
        match validator {
            Validator::AtLeast(at_least) => {
                threshold = threshold.max(quorum(at_least, objects.len()));
            },
            Validator::MatchCondition(cond) => {
                check_condition(objects, cond, &mut results, &mut diagnostics);
            },
            Validator::JsonPointer(jp) => {
                check_pointer(objects, jp, &mut results, &mut diagnostics);
            },
        }
    }

    if threshold == 0 {
        threshold = objects.len().max(1);
    }
    let passing = results.iter().filter(|ok| **ok).count();

    let mut trail = Vec::with_capacity(diagnostics.len() + 3);
    trail.push(format!("{} objects found", objects.len()));
    trail.push(format!("{passing} objects match target validators"));
    trail.push(format!("{passing}/{threshold} valid objects"));
    trail.extend(diagnostics);

    TargetVerdict {
        satisfied: passing >= threshold,
        objects_found: objects.len(),
        passing,
        threshold,
        trail,
    }
}

/// `max(count, floor(percent * found / 100))`.
fn quorum(at_least: &AtLeast, found: usize) -> usize {
    let widen = |n: u32| usize::try_from(n).unwrap_or(usize::MAX);
    let absolute = at_least.count.map_or(0, widen);
    let relative = at_least
        .percent
        .map_or(0, |p| widen(p).saturating_mul(found) / 100);
    absolute.max(relative)
}

fn check_condition(
    objects: &[Object],
    cond: &MatchCondition,
    results: &mut [bool],
    diagnostics: &mut Vec<String>,
) {
    for (object, ok) in objects.iter().zip(results.iter_mut()) {
        let name = object.display_name();
        let conditions = match object.conditions() {
            Ok(conditions) => conditions,
            Err(err) => {
                *ok = false;
                diagnostics.push(format!(
                    "{name} -> cannot read condition {}: {err}",
                    cond.type_
                ));
                continue;
            },
        };
        if conditions.is_empty() {
            *ok = false;
            diagnostics.push(format!("{name} -> object has no conditions"));
            continue;
        }
        let Some(found) = conditions.iter().find(|c| c.type_ == cond.type_) else {
            *ok = false;
            diagnostics.push(format!("{name} -> condition {} is missing", cond.type_));
            continue;
        };
        if found.status != cond.status {
            *ok = false;
            diagnostics.push(format!(
                "{name} -> condition {} is wrong (expected {}, got {})",
                cond.type_, cond.status, found.status
            ));
        }
    }
}

fn check_pointer(
    objects: &[Object],
    jp: &JsonPointerMatch,
    results: &mut [bool],
    diagnostics: &mut Vec<String>,
) {
    for (object, ok) in objects.iter().zip(results.iter_mut()) {
        let name = object.display_name();
        match object.field(&jp.pointer) {
            Err(err) => {
                *ok = false;
                diagnostics.push(format!(
                    "{name} -> field {} unreadable (expected '{}'): {err}",
                    jp.pointer, jp.value
                ));
            },
            Ok(value) => {
                let actual = field_text(value);
                if actual != jp.value {
                    *ok = false;
                    diagnostics.push(format!(
                        "{name} -> field {} does not match (expected '{}', got '{actual}')",
                        jp.pointer, jp.value
                    ));
                }
            },
        }
    }
}
