//! Error types for the fault-isolation runtime.

use crate::outcome::Rejection;
use thiserror::Error;

/// The error payload an action can fail with.
///
/// Actions return `Result<T, ActionError>`; the task's error converter maps
/// the payload to an outcome. Panics inside an action are captured and
/// boxed into this type as well.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// Why a future was born rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedReason {
    /// A back-pressure gate denied the acquire.
    Gate(Rejection),
    /// The executor had already been shut down.
    Shutdown,
}

impl RejectedReason {
    /// The gate rejection, when that is what happened.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            RejectedReason::Gate(rejection) => Some(*rejection),
            RejectedReason::Shutdown => None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, RejectedReason::Shutdown)
    }
}

impl std::fmt::Display for RejectedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectedReason::Gate(rejection) => write!(f, "rejected: {rejection}"),
            RejectedReason::Shutdown => f.write_str("rejected: executor shut down"),
        }
    }
}

/// An action did not complete within its deadline.
///
/// Installed as the error payload when a timeout cancels a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("action timed out")]
pub struct TimeoutError;

/// A completion was attempted with an outcome that is not a member of the
/// promise's result class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid result '{token}'; Valid results are [{}]", .valid.join(", "))]
pub struct InvalidResultError {
    /// Token of the offending outcome.
    pub token: String,
    /// Tokens of the valid outcomes, in index order.
    pub valid: Vec<String>,
}

impl InvalidResultError {
    pub(crate) fn new(token: &str, valid: impl Iterator<Item = &'static str>) -> Self {
        Self {
            token: token.to_string(),
            valid: valid.map(str::to_string).collect(),
        }
    }
}
