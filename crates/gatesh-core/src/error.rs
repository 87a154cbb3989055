//! Error types shared across the evaluation engine.
//!
//! The engine separates three failure planes:
//!
//! - **Store errors** ([`StoreError`]): raised by the object store adapter.
//!   `NotFound` is part of this enum so adapters can report it, but the
//!   resolver never propagates it as a failure.
//! - **Target errors** ([`ResolveError`]): a target could not be turned into
//!   an object set. These never abort a cycle; they become the target's
//!   `ErrorWhileFetching` verdict.
//! - **Cycle errors** ([`ReconcileError`]): the cycle could not run or could
//!   not be persisted at all.

use std::time::Duration;

use thiserror::Error;

use crate::object::ObjectKey;

/// Errors raised by an [`ObjectStore`](crate::store::ObjectStore) adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed object does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// Key of the missing object.
        key: ObjectKey,
    },

    /// The store failed for reasons other than absence (network, auth,
    /// quota, timeout).
    #[error("store transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    /// Returns `true` for the not-found arm.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors produced while resolving a target selector into objects.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The selector itself is malformed.
    #[error("invalid selector: {reason}")]
    InvalidSelector {
        /// Why the selector was rejected.
        reason: String,
    },

    /// The store failed while serving the selector.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Resolution did not finish within the per-target timeout.
    #[error("resolution timed out after {after:?}")]
    Timeout {
        /// The timeout that expired.
        after: Duration,
    },
}

impl ResolveError {
    /// Creates an invalid selector error.
    #[must_use]
    pub fn invalid_selector(reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            reason: reason.into(),
        }
    }
}

/// Admission-time rejections of a gate policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The policy declares no target.
    #[error("a gate must declare at least one target")]
    NoTargets,

    /// A target name is not PascalCase.
    #[error("target name must be PascalCase: {0}")]
    InvalidTargetName(String),

    /// Two targets share the same name.
    #[error("duplicate target name: {0}")]
    DuplicateTargetName(String),

    /// A condition type is not PascalCase.
    #[error("condition type must be PascalCase: {0}")]
    InvalidConditionType(String),

    /// An `atLeast` validator sets neither `count` nor `percent`.
    #[error("target {target}: atLeast validator needs a count or a percent")]
    EmptyQuorum {
        /// Target holding the validator.
        target: String,
    },

    /// An `atLeast.percent` above 100.
    #[error("target {target}: atLeast percent {percent} exceeds 100")]
    PercentOutOfRange {
        /// Target holding the validator.
        target: String,
        /// Offending value.
        percent: u32,
    },

    /// A consolidation count of zero.
    #[error("consolidation count must be at least 1")]
    ZeroConsolidationCount,

    /// An evaluation period of zero.
    #[error("evaluation period must be greater than zero")]
    ZeroEvaluationPeriod,

    /// A JSON pointer that is not RFC 6901 shaped.
    #[error("target {target}: invalid JSON pointer {pointer:?}")]
    InvalidPointer {
        /// Target holding the validator.
        target: String,
        /// Offending pointer.
        pointer: String,
    },
}

/// Errors returned by a [`StatusWriter`](crate::scheduler::StatusWriter).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatusWriteError {
    /// The gate changed since it was read; nothing was written.
    #[error("status conflict: expected resource version {expected}, found {actual}")]
    Conflict {
        /// Resource version the writer was given.
        expected: u64,
        /// Resource version currently stored.
        actual: u64,
    },

    /// The gate was deleted mid-cycle; nothing was written.
    #[error("gate no longer exists")]
    NotFound,

    /// The write failed for another reason; nothing was written.
    #[error("status write failed: {0}")]
    Transport(String),
}

/// Cycle-level failures of the reconciliation scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// The policy violates an invariant the engine relies on.
    #[error("policy rejected: {0}")]
    Policy(#[from] PolicyError),

    /// The status could not be written back.
    #[error(transparent)]
    StatusWrite(#[from] StatusWriteError),
}
