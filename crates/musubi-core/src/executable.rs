//! The uniform execution contract and the executable tree node.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;
use crate::error::ContractViolation;
use crate::name::StepName;
use crate::outcome::Outcome;
use crate::process::Process;
use crate::retry::{JitterSource, UniformJitter};
use crate::task::Task;

/// Ambient services a run carries into every node: the jitter sampler for
/// retry backoff and the cancellation token honored by async execution.
#[derive(Clone)]
pub struct RunEnv {
    jitter: Arc<dyn JitterSource>,
    cancel: CancellationToken,
}

impl RunEnv {
    /// Creates a run environment.
    pub fn new(jitter: Arc<dyn JitterSource>, cancel: CancellationToken) -> Self {
        Self { jitter, cancel }
    }

    /// The jitter sampler for this run.
    pub fn jitter(&self) -> &dyn JitterSource {
        self.jitter.as_ref()
    }

    /// The cancellation token for this run. Inert under the sync runner.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Default for RunEnv {
    fn default() -> Self {
        Self::new(Arc::new(UniformJitter), CancellationToken::new())
    }
}

/// Contract shared by tasks, processes, and workflows: execute against a
/// context, produce an [`Outcome`], emit a trace.
///
/// User-originated failures never escape `execute_*`; they are reported
/// through `Outcome::errors`. Only [`validate`](Executable::validate) can
/// reject a tree outright.
#[async_trait]
pub trait Executable<T: Send>: Send + Sync {
    /// The node's name, unique within its parent.
    fn name(&self) -> &StepName;

    /// Semantic description, surfaced in manifests.
    fn description(&self) -> &str;

    /// Whether this node requires the async runner.
    fn is_async(&self) -> bool;

    /// Checks the structural contract of this subtree.
    fn validate(&self) -> Result<(), ContractViolation>;

    /// Executes synchronously. Asynchronous work is rejected with a
    /// `runner_mismatch` failure rather than silently mis-scheduled.
    fn execute_sync(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome;

    /// Executes under cooperative scheduling, honoring `env.cancel()`.
    async fn execute_async(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome;
}

/// A node in the executable tree: a leaf task or a nested process.
pub enum Step<T> {
    /// Atomic unit of work.
    Task(Task<T>),
    /// Ordered composite.
    Process(Process<T>),
}

impl<T> Step<T> {
    /// The node's name.
    pub fn name(&self) -> &StepName {
        match self {
            Step::Task(task) => task.name(),
            Step::Process(process) => process.name(),
        }
    }

    /// The node's description.
    pub fn description(&self) -> &str {
        match self {
            Step::Task(task) => task.description(),
            Step::Process(process) => process.description(),
        }
    }

    /// Visits every task in this subtree in depth-first pre-order.
    pub fn visit_tasks<'a>(&'a self, f: &mut dyn FnMut(&'a Task<T>)) {
        match self {
            Step::Task(task) => f(task),
            Step::Process(process) => {
                for step in process.steps() {
                    step.visit_tasks(f);
                }
            }
        }
    }

    /// Collects every node name in this subtree in depth-first pre-order.
    pub fn visit_names<'a>(&'a self, out: &mut Vec<&'a StepName>) {
        match self {
            Step::Task(task) => out.push(task.name()),
            Step::Process(process) => {
                out.push(process.name());
                for step in process.steps() {
                    step.visit_names(out);
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Task(task) => f.debug_tuple("Task").field(&task.name()).finish(),
            Step::Process(process) => f.debug_tuple("Process").field(&process.name()).finish(),
        }
    }
}

impl<T> From<Task<T>> for Step<T> {
    fn from(task: Task<T>) -> Self {
        Step::Task(task)
    }
}

impl<T> From<Process<T>> for Step<T> {
    fn from(process: Process<T>) -> Self {
        Step::Process(process)
    }
}

#[async_trait]
impl<T: Send> Executable<T> for Step<T> {
    fn name(&self) -> &StepName {
        match self {
            Step::Task(task) => task.name(),
            Step::Process(process) => process.name(),
        }
    }

    fn description(&self) -> &str {
        match self {
            Step::Task(task) => task.description(),
            Step::Process(process) => process.description(),
        }
    }

    fn is_async(&self) -> bool {
        match self {
            Step::Task(task) => Executable::is_async(task),
            Step::Process(process) => Executable::is_async(process),
        }
    }

    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            Step::Task(task) => task.validate(),
            Step::Process(process) => process.validate(),
        }
    }

    fn execute_sync(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        match self {
            Step::Task(task) => task.execute_sync(ctx, env),
            Step::Process(process) => process.execute_sync(ctx, env),
        }
    }

    async fn execute_async(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        match self {
            Step::Task(task) => task.execute_async(ctx, env).await,
            Step::Process(process) => process.execute_async(ctx, env).await,
        }
    }
}
