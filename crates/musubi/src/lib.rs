//! An embeddable workflow orchestration library.
//!
//! `musubi` organizes business logic as a composite hierarchy of executable
//! units — [`Task`] (leaf), [`Process`] (ordered sequence), and
//! [`Workflow`] (top-level orchestrator) — with per-step retry policies and
//! transactional recovery via reverse-order saga compensation. It links
//! directly into the application process: there is no daemon, scheduler, or
//! broker.
//!
//! # Example
//!
//! ```
//! use musubi::prelude::*;
//!
//! let create_account = Task::new("create_account", |ctx: &mut ExecutionContext<Vec<String>>| {
//!     ctx.data.push("account".to_string());
//!     Ok(())
//! })
//! .with_undo(|ctx| {
//!     ctx.data.retain(|e| e != "account");
//!     Ok(())
//! });
//!
//! let send_email = Task::new("send_email", |_ctx: &mut ExecutionContext<Vec<String>>| {
//!     Err(StepError::user("smtp down"))
//! });
//!
//! let workflow = Workflow::builder("onboarding")
//!     .step(create_account)
//!     .step(send_email)
//!     .strategy(FailureStrategy::Compensate)
//!     .build()
//!     .expect("valid workflow");
//!
//! let mut ctx = ExecutionContext::new(Vec::new());
//! let outcome = SyncRunner::new().run(&workflow, &mut ctx).expect("well-formed tree");
//!
//! assert_eq!(outcome.status, RunStatus::Failed);
//! // The completed step was rolled back.
//! assert!(ctx.data.is_empty());
//! ```

mod assembly;
mod manifest;
mod runner;
mod workflow;

// Re-export the core data model.
pub use musubi_core::*;

pub use assembly::{assemble, AssemblyError, Registry, WorkflowDescriptor};
pub use manifest::{Manifest, StepManifest};
pub use runner::{AsyncRunner, SyncRunner};
pub use workflow::{FailureStrategy, InvalidStrategy, Workflow, WorkflowBuilder};

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::{
        assemble, AssemblyError, AsyncRunner, Backoff, CancellationToken, ContractViolation,
        ErrorKind, Event, EventDetail, EventKind, Executable, ExecutionContext, FailureStrategy,
        InvalidStrategy, JitterSource, Manifest, Outcome, Process, Registry, RetryPolicy,
        RunStatus, SerializationError, Step, StepError, StepFailure, StepManifest, StepName,
        SyncRunner, Task, TaskFuture, UniformJitter, Workflow, WorkflowBuilder,
        WorkflowDescriptor,
    };
}
