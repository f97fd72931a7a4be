//! Core types and execution primitives for the musubi workflow engine.
//!
//! This crate holds the data model and the composite execution contract;
//! orchestration (failure strategies, compensation, runners, manifests,
//! dynamic assembly) lives in the `musubi` crate.
//!
//! # Core Types
//!
//! - [`Task`] - Atomic unit of work with retry and optional compensation
//! - [`Process`] - Ordered composite of executables
//! - [`Step`] - A node in the executable tree
//! - [`Executable`] - The uniform execution contract
//! - [`ExecutionContext`] - Per-run payload, metadata, trace, and
//!   completed-step bookkeeping
//! - [`Outcome`] - Terminal report of an execution
//! - [`RetryPolicy`] - Attempt bound, backoff curve, jitter, and error-kind
//!   filters

mod context;
mod error;
mod executable;
mod name;
mod outcome;
mod process;
mod retry;
mod task;

pub use context::{Event, EventDetail, EventKind, ExecutionContext};
pub use error::{ContractViolation, ErrorKind, SerializationError, StepError, StepFailure};
pub use executable::{Executable, RunEnv, Step};
pub use name::StepName;
pub use outcome::{Outcome, RunStatus};
pub use process::Process;
pub use retry::{Backoff, JitterSource, RetryPolicy, UniformJitter};
pub use task::{Task, TaskFuture};

// Cancellation is part of the public runner contract.
pub use tokio_util::sync::CancellationToken;
