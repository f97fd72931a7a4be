//! Terminal report of an execution.

use serde::{Deserialize, Serialize};

use crate::error::StepFailure;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded.
    Success,
    /// The run stopped on a failure (or was aborted / compensated).
    Failed,
    /// The `continue` strategy carried the run through at least one failure.
    Partial,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::Failed => f.write_str("failed"),
            RunStatus::Partial => f.write_str("partial"),
        }
    }
}

/// Immutable terminal report of an execution.
///
/// The context itself stays with the caller: runners mutate the
/// `ExecutionContext` that was passed in, so the outcome only carries the
/// verdict, the recorded failures, and the wall-clock duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Terminal status of the run.
    pub status: RunStatus,
    /// Failures in the order they were recorded; compensation failures are
    /// appended after the primary one.
    pub errors: Vec<StepFailure>,
    /// Wall-clock duration measured on a monotonic clock.
    pub duration_ms: u64,
}

impl Outcome {
    /// A successful outcome with no errors.
    pub fn success(duration_ms: u64) -> Self {
        Self {
            status: RunStatus::Success,
            errors: Vec::new(),
            duration_ms,
        }
    }

    /// A failed outcome carrying the recorded errors.
    pub fn failed(errors: Vec<StepFailure>, duration_ms: u64) -> Self {
        Self {
            status: RunStatus::Failed,
            errors,
            duration_ms,
        }
    }

    /// A partial outcome, produced only by the `continue` strategy.
    pub fn partial(errors: Vec<StepFailure>, duration_ms: u64) -> Self {
        Self {
            status: RunStatus::Partial,
            errors,
            duration_ms,
        }
    }

    /// Returns `true` if the run succeeded outright.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
