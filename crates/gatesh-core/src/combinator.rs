//! Boolean combination of target verdicts.

use crate::policy::Operator;

/// Combines per-target verdicts; `invert` applies after the operator.
///
/// `And` over no verdicts is `true` and `Or` is `false`. Admission rejects
/// policies without targets, so neither case reaches a real gate.
#[must_use]
pub fn combine<I>(verdicts: I, operator: Operator, invert: bool) -> bool
where
    I: IntoIterator<Item = bool>,
{
    let mut verdicts = verdicts.into_iter();
    let combined = match operator {
        Operator::And => verdicts.all(|v| v),
        Operator::Or => verdicts.any(|v| v),
    };
    combined != invert
}
