//! Error taxonomy for the recovery controller.
//!
//! Only [`ValidationError`] and [`RegistrationError`] are ever returned to a
//! caller. [`ActionExecutionError`] is recorded per action inside an
//! [`crate::EvaluationResult`], and delivery failures
//! ([`notify::NotificationError`]) are logged by the notifier and dropped.

use std::time::Duration;

use thiserror::Error;

use crate::action::ActionKind;

/// A metrics snapshot carried a value outside its documented range.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid snapshot: {field} = {value} ({reason})")]
pub struct ValidationError {
    /// Snapshot field that failed validation (camelCase, as on the wire)
    pub field: &'static str,
    /// Offending value
    pub value: f64,
    /// Why it was rejected
    pub reason: &'static str,
}

/// A distress gate cutoff can never be meaningful.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("distress gate {field} = {value} is invalid ({reason})")]
pub struct GateError {
    /// Gate field, as written in the config file
    pub field: &'static str,
    pub value: f64,
    pub reason: &'static str,
}

/// Policy registration failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// A kind may only be registered once per controller
    #[error("recovery action {0} is already registered")]
    DuplicateAction(ActionKind),

    /// Threshold is not meaningful for the watched dimension
    #[error("recovery action {kind}: threshold {threshold} is invalid ({reason})")]
    InvalidThreshold {
        kind: ActionKind,
        threshold: f64,
        reason: &'static str,
    },

    /// Effects must be bounded by a non-zero timeout
    #[error("recovery action {0}: timeout must be greater than zero")]
    InvalidTimeout(ActionKind),
}

/// One action's effect did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionExecutionError {
    /// The effect returned an error
    #[error("{kind} failed: {message}")]
    Failed { kind: ActionKind, message: String },

    /// The effect exceeded its timeout and was dropped
    #[error("{kind} timed out after {}s", timeout.as_secs_f64())]
    TimedOut { kind: ActionKind, timeout: Duration },

    /// The effect panicked
    #[error("{kind} panicked: {message}")]
    Panicked { kind: ActionKind, message: String },

    /// The task running the effect was cancelled before finishing
    #[error("{kind} was cancelled")]
    Cancelled { kind: ActionKind },
}

impl ActionExecutionError {
    /// The action kind this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Failed { kind, .. }
            | Self::TimedOut { kind, .. }
            | Self::Panicked { kind, .. }
            | Self::Cancelled { kind } => *kind,
        }
    }
}

/// Problems loading the policy configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    InvalidGate(#[from] GateError),

    #[error(transparent)]
    Policy(#[from] RegistrationError),
}
