//! Workflow orchestration: failure strategies and saga compensation.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use musubi_core::{
    ContractViolation, Executable, ExecutionContext, Outcome, Process, RunEnv, Step, StepFailure,
    StepName, Task,
};

/// What the orchestrator does when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Stop immediately; no compensation.
    #[default]
    Abort,
    /// Record the error and keep going; the run ends `partial` if anything
    /// failed.
    Continue,
    /// Stop and undo completed steps in reverse order.
    Compensate,
}

impl std::fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStrategy::Abort => f.write_str("abort"),
            FailureStrategy::Continue => f.write_str("continue"),
            FailureStrategy::Compensate => f.write_str("compensate"),
        }
    }
}

/// Error for an unrecognized strategy tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid strategy '{0}'")]
pub struct InvalidStrategy(pub String);

impl FromStr for FailureStrategy {
    type Err = InvalidStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("abort") {
            Ok(FailureStrategy::Abort)
        } else if s.eq_ignore_ascii_case("continue") {
            Ok(FailureStrategy::Continue)
        } else if s.eq_ignore_ascii_case("compensate") {
            Ok(FailureStrategy::Compensate)
        } else {
            Err(InvalidStrategy(s.to_string()))
        }
    }
}

/// The top-level orchestrator: an ordered sequence of steps plus a
/// [`FailureStrategy`].
///
/// A workflow holds its sequence by composition and interprets child
/// failures according to the strategy. Under `compensate` it snapshots the
/// completed leaves at the moment the failure is detected and invokes their
/// compensators in reverse (LIFO) order, best-effort: one failing
/// compensator never stops the rest of the rollback.
///
/// # Examples
///
/// ```
/// use musubi::prelude::*;
///
/// let double = Task::new("double", |ctx: &mut ExecutionContext<i64>| {
///     ctx.data *= 2;
///     Ok(())
/// });
///
/// let workflow = Workflow::builder("doubler")
///     .step(double)
///     .build()
///     .expect("valid workflow");
///
/// let mut ctx = ExecutionContext::new(21);
/// let outcome = SyncRunner::new().run(&workflow, &mut ctx).expect("well-formed tree");
/// assert!(outcome.is_success());
/// assert_eq!(ctx.data, 42);
/// ```
pub struct Workflow<T> {
    name: StepName,
    description: String,
    sequence: Process<T>,
    strategy: FailureStrategy,
}

impl<T> std::fmt::Debug for Workflow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("steps", &self.sequence.steps().iter().map(Step::name).collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Workflow<T> {
    /// Starts building a workflow.
    pub fn builder(name: impl Into<StepName>) -> WorkflowBuilder<T> {
        WorkflowBuilder::new(name)
    }

    /// The configured failure strategy.
    pub fn strategy(&self) -> FailureStrategy {
        self.strategy
    }

    /// The top-level steps in declared order.
    pub fn steps(&self) -> &[Step<T>] {
        self.sequence.steps()
    }

    /// The workflow's name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// The workflow's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Snapshot of completed leaves in pre-order, taken at failure
    /// detection. Compensation walks this in reverse.
    fn completed_snapshot<'a>(&'a self, ctx: &ExecutionContext<T>) -> Vec<&'a Task<T>> {
        let mut snapshot = Vec::new();
        for step in self.sequence.steps() {
            step.visit_tasks(&mut |task| {
                if ctx.was_completed(task.name().as_str()) {
                    snapshot.push(task);
                }
            });
        }
        snapshot
    }
}

impl<T: Send> Workflow<T> {
    fn compensate_sync(&self, ctx: &mut ExecutionContext<T>, errors: &mut Vec<StepFailure>) {
        info!(workflow = %self.name, "compensating workflow");
        let snapshot = self.completed_snapshot(ctx);
        for task in snapshot.iter().rev() {
            if let Some(failure) = task.compensate_sync(ctx) {
                errors.push(failure);
            }
        }
    }

    async fn compensate_async(&self, ctx: &mut ExecutionContext<T>, errors: &mut Vec<StepFailure>) {
        info!(workflow = %self.name, "compensating workflow");
        let snapshot = self.completed_snapshot(ctx);
        for task in snapshot.iter().rev() {
            if let Some(failure) = task.compensate_async(ctx).await {
                errors.push(failure);
            }
        }
    }

    fn finish(
        &self,
        collected: Vec<StepFailure>,
        started: Instant,
    ) -> Outcome {
        let duration_ms = started.elapsed().as_millis() as u64;
        if collected.is_empty() {
            info!(workflow = %self.name, duration_ms, "workflow completed");
            Outcome::success(duration_ms)
        } else {
            warn!(workflow = %self.name, failures = collected.len(), "workflow completed partially");
            Outcome::partial(collected, duration_ms)
        }
    }
}

#[async_trait]
impl<T: Send> Executable<T> for Workflow<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_async(&self) -> bool {
        Executable::is_async(&self.sequence)
    }

    fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.as_str().is_empty() {
            return Err(ContractViolation::EmptyName);
        }
        for step in self.sequence.steps() {
            step.validate()?;
        }
        // Compensation eligibility is keyed by name, so names must be
        // unique across the whole tree, not just within one parent.
        let mut names = Vec::new();
        for step in self.sequence.steps() {
            step.visit_names(&mut names);
        }
        let mut seen = BTreeSet::new();
        for name in names {
            if !seen.insert(name) {
                return Err(ContractViolation::DuplicateName(name.clone()));
            }
        }
        Ok(())
    }

    fn execute_sync(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        let started = Instant::now();
        info!(workflow = %self.name, strategy = %self.strategy, "workflow started");
        let mut collected = Vec::new();

        for step in self.sequence.steps() {
            let result = step.execute_sync(ctx, env);
            if result.is_success() {
                continue;
            }
            match self.strategy {
                FailureStrategy::Abort => {
                    warn!(workflow = %self.name, step = %step.name(), "workflow aborted");
                    return Outcome::failed(result.errors, started.elapsed().as_millis() as u64);
                }
                FailureStrategy::Continue => {
                    warn!(workflow = %self.name, step = %step.name(), "continuing after failure");
                    collected.extend(result.errors);
                }
                FailureStrategy::Compensate => {
                    let mut errors = result.errors;
                    self.compensate_sync(ctx, &mut errors);
                    return Outcome::failed(errors, started.elapsed().as_millis() as u64);
                }
            }
        }

        self.finish(collected, started)
    }

    async fn execute_async(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        let started = Instant::now();
        info!(workflow = %self.name, strategy = %self.strategy, "workflow started");
        let mut collected = Vec::new();

        for step in self.sequence.steps() {
            let result = step.execute_async(ctx, env).await;
            if result.is_success() {
                continue;
            }
            match self.strategy {
                FailureStrategy::Abort => {
                    warn!(workflow = %self.name, step = %step.name(), "workflow aborted");
                    return Outcome::failed(result.errors, started.elapsed().as_millis() as u64);
                }
                FailureStrategy::Continue => {
                    warn!(workflow = %self.name, step = %step.name(), "continuing after failure");
                    collected.extend(result.errors);
                }
                FailureStrategy::Compensate => {
                    let mut errors = result.errors;
                    self.compensate_async(ctx, &mut errors).await;
                    return Outcome::failed(errors, started.elapsed().as_millis() as u64);
                }
            }
        }

        self.finish(collected, started)
    }
}

/// Builder for [`Workflow`] instances.
pub struct WorkflowBuilder<T> {
    name: StepName,
    description: String,
    steps: Vec<Step<T>>,
    strategy: FailureStrategy,
}

impl<T> WorkflowBuilder<T> {
    /// Creates a builder for a workflow with the given name.
    pub fn new(name: impl Into<StepName>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            strategy: FailureStrategy::default(),
        }
    }

    /// Sets the semantic description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a step (a task or a nested process).
    pub fn step(mut self, step: impl Into<Step<T>>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Sets the failure strategy.
    pub fn strategy(mut self, strategy: FailureStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Builds the workflow, validating the tree.
    pub fn build(self) -> Result<Workflow<T>, ContractViolation>
    where
        T: Send,
    {
        let workflow = Workflow {
            sequence: Process::new(self.name.clone(), self.steps),
            name: self.name,
            description: self.description,
            strategy: self.strategy,
        };
        workflow.validate()?;
        Ok(workflow)
    }
}
