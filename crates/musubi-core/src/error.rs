//! Error kinds and failure values.
//!
//! Everything except [`ContractViolation`] travels through
//! [`Outcome::errors`](crate::Outcome) rather than being returned as a hard
//! error from a run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::name::StepName;

/// Semantic category of a failure, independent of any concrete error type.
///
/// Retry classification ([`RetryPolicy::retry_on`](crate::RetryPolicy) and
/// `give_up_on`) matches on these tags. User code can introduce its own
/// categories through [`ErrorKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// Raised by user code inside a task or compensator.
    UserError,
    /// The sync runner encountered asynchronous work.
    RunnerMismatch,
    /// Malformed payload while reconstructing a context.
    SerializationError,
    /// A dynamic-assembly descriptor referenced an unregistered step.
    UnknownStep,
    /// A dynamic-assembly descriptor carried an unrecognized strategy tag.
    InvalidStrategy,
    /// Cooperative cancellation was delivered to an async run.
    Cancelled,
    /// Programming error in the executable tree.
    ContractViolation,
    /// User-declared category.
    Other(String),
}

impl ErrorKind {
    fn as_str(&self) -> &str {
        match self {
            ErrorKind::UserError => "user_error",
            ErrorKind::RunnerMismatch => "runner_mismatch",
            ErrorKind::SerializationError => "serialization_error",
            ErrorKind::UnknownStep => "unknown_step",
            ErrorKind::InvalidStrategy => "invalid_strategy",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ContractViolation => "contract_violation",
            ErrorKind::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "user_error" => ErrorKind::UserError,
            "runner_mismatch" => ErrorKind::RunnerMismatch,
            "serialization_error" => ErrorKind::SerializationError,
            "unknown_step" => ErrorKind::UnknownStep,
            "invalid_strategy" => ErrorKind::InvalidStrategy,
            "cancelled" => ErrorKind::Cancelled,
            "contract_violation" => ErrorKind::ContractViolation,
            _ => ErrorKind::Other(tag),
        }
    }
}

impl From<&str> for ErrorKind {
    fn from(tag: &str) -> Self {
        ErrorKind::from(tag.to_string())
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A failure produced by user code or the engine.
///
/// Serialized inside trace events and outcome errors as
/// `{kind, message, fields?}`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StepError {
    /// Semantic category, used for retry classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

impl StepError {
    /// Creates a failure with an explicit kind.
    pub fn new(kind: impl Into<ErrorKind>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            fields: None,
        }
    }

    /// Creates a `user_error` failure.
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserError, message)
    }

    /// Creates a `runner_mismatch` failure.
    pub fn runner_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RunnerMismatch, message)
    }

    /// Creates a `cancelled` failure.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Attaches a structured payload.
    pub fn with_fields(mut self, fields: serde_json::Value) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// A failure attributed to a named step, as recorded in an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    /// The step the failure originated from.
    pub step: StepName,
    /// The failure itself.
    pub error: StepError,
}

impl StepFailure {
    /// Creates a new step failure.
    pub fn new(step: StepName, error: StepError) -> Self {
        Self { step, error }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Programming errors in the executable tree.
///
/// The one class of error that is returned from `run` itself instead of
/// surfacing through [`Outcome::errors`](crate::Outcome): a malformed tree is
/// a bug in the calling code, not a runtime failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContractViolation {
    /// A node was given an empty name.
    #[error("step name must not be empty")]
    EmptyName,

    /// Two nodes in the same tree share a name.
    #[error("duplicate step name '{0}'")]
    DuplicateName(StepName),
}

/// Failures while reconstructing a context from JSON.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SerializationError {
    /// The payload is not valid JSON or not an object.
    #[error("malformed context payload: {0}")]
    Malformed(String),

    /// A mandatory field is absent.
    #[error("missing mandatory field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("field '{field}' is malformed: {reason}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
