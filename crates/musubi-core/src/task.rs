//! Atomic unit of work: a user action with retry and optional compensation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::context::{EventDetail, EventKind, ExecutionContext};
use crate::error::{ContractViolation, StepError, StepFailure};
use crate::executable::{Executable, RunEnv};
use crate::name::StepName;
use crate::outcome::Outcome;
use crate::retry::RetryPolicy;

/// Boxed future returned by async actions and compensators.
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;

/// Either color of user callable. The variant is the statically-known
/// sync/async flag: a sync runner never constructs the future of an `Async`
/// callable.
pub(crate) enum Callable<T> {
    Sync(Arc<dyn Fn(&mut ExecutionContext<T>) -> Result<(), StepError> + Send + Sync>),
    Async(Arc<dyn for<'a> Fn(&'a mut ExecutionContext<T>) -> TaskFuture<'a> + Send + Sync>),
}

impl<T> Clone for Callable<T> {
    fn clone(&self) -> Self {
        match self {
            Callable::Sync(f) => Callable::Sync(f.clone()),
            Callable::Async(f) => Callable::Async(f.clone()),
        }
    }
}

impl<T> Callable<T> {
    fn is_async(&self) -> bool {
        matches!(self, Callable::Async(_))
    }
}

/// An atomic unit of work in a workflow.
///
/// Wraps a user action (sync or async), an optional compensator, and a
/// [`RetryPolicy`]. Tasks carry no per-run state: construct once, run many
/// times against fresh contexts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use musubi_core::{ExecutionContext, RetryPolicy, Task};
///
/// let charge = Task::new("charge_card", |ctx: &mut ExecutionContext<u32>| {
///     ctx.data += 1;
///     Ok(())
/// })
/// .with_description("Charges the customer's card")
/// .with_retry(RetryPolicy::exponential(3, Duration::from_millis(50)))
/// .with_undo(|ctx| {
///     ctx.data -= 1;
///     Ok(())
/// });
/// assert_eq!(charge.name().as_str(), "charge_card");
/// ```
pub struct Task<T> {
    name: StepName,
    description: String,
    action: Callable<T>,
    undo: Option<Callable<T>>,
    retry: RetryPolicy,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            action: self.action.clone(),
            undo: self.undo.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("is_async", &self.action.is_async())
            .field("has_undo", &self.undo.is_some())
            .finish()
    }
}

impl<T> Task<T> {
    /// Creates a task around a synchronous action.
    pub fn new<F>(name: impl Into<StepName>, action: F) -> Self
    where
        F: Fn(&mut ExecutionContext<T>) -> Result<(), StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            action: Callable::Sync(Arc::new(action)),
            undo: None,
            retry: RetryPolicy::none(),
        }
    }

    /// Creates a task around an asynchronous action.
    ///
    /// The action returns a boxed future borrowing the context; plain `fn`
    /// items coerce directly:
    ///
    /// ```
    /// use musubi_core::{ExecutionContext, Task, TaskFuture};
    ///
    /// fn fetch(ctx: &mut ExecutionContext<u32>) -> TaskFuture<'_> {
    ///     Box::pin(async move {
    ///         ctx.data += 1;
    ///         Ok(())
    ///     })
    /// }
    ///
    /// let task = Task::new_async("fetch", fetch);
    /// ```
    pub fn new_async<F>(name: impl Into<StepName>, action: F) -> Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext<T>) -> TaskFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            action: Callable::Async(Arc::new(action)),
            undo: None,
            retry: RetryPolicy::none(),
        }
    }

    /// Sets the semantic description, surfaced in manifests.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attaches a synchronous compensator that reverses this task's effects.
    pub fn with_undo<F>(mut self, undo: F) -> Self
    where
        F: Fn(&mut ExecutionContext<T>) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.undo = Some(Callable::Sync(Arc::new(undo)));
        self
    }

    /// Attaches an asynchronous compensator.
    pub fn with_async_undo<F>(mut self, undo: F) -> Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext<T>) -> TaskFuture<'a> + Send + Sync + 'static,
    {
        self.undo = Some(Callable::Async(Arc::new(undo)));
        self
    }

    /// The task's name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// The task's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The task's retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Whether a compensator was declared.
    pub fn has_undo(&self) -> bool {
        self.undo.is_some()
    }

    fn mismatch_failure(&self) -> StepFailure {
        let error = StepError::runner_mismatch(format!(
            "task '{}' is asynchronous; run it with AsyncRunner",
            self.name
        ));
        StepFailure::new(self.name.clone(), error)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl<T: Send> Task<T> {
    /// Invokes the compensator synchronously, emitting compensate events.
    ///
    /// Returns the failure to record, if any. Tasks without a compensator
    /// are skipped silently. An async compensator cannot run here and is
    /// reported as a `runner_mismatch` compensation failure.
    pub fn compensate_sync(&self, ctx: &mut ExecutionContext<T>) -> Option<StepFailure> {
        let undo = self.undo.as_ref()?;
        ctx.emit(EventKind::CompensateStart, &self.name, 1, EventDetail::none());
        let result = match undo {
            Callable::Sync(f) => f(ctx),
            Callable::Async(_) => Err(StepError::runner_mismatch(format!(
                "compensator for task '{}' is asynchronous; run it with AsyncRunner",
                self.name
            ))),
        };
        self.finish_compensation(ctx, result)
    }

    /// Invokes the compensator under cooperative scheduling.
    pub async fn compensate_async(&self, ctx: &mut ExecutionContext<T>) -> Option<StepFailure> {
        let undo = self.undo.as_ref()?;
        ctx.emit(EventKind::CompensateStart, &self.name, 1, EventDetail::none());
        let result = match undo {
            Callable::Sync(f) => f(ctx),
            Callable::Async(f) => f(ctx).await,
        };
        self.finish_compensation(ctx, result)
    }

    fn finish_compensation(
        &self,
        ctx: &mut ExecutionContext<T>,
        result: Result<(), StepError>,
    ) -> Option<StepFailure> {
        match result {
            Ok(()) => {
                ctx.emit(EventKind::CompensateEnd, &self.name, 1, EventDetail::none());
                None
            }
            Err(error) => {
                warn!(task = %self.name, %error, "compensation failed, continuing rollback");
                ctx.emit(
                    EventKind::CompensateError,
                    &self.name,
                    1,
                    EventDetail::Failure(error.clone()),
                );
                Some(StepFailure::new(self.name.clone(), error))
            }
        }
    }

    fn record_success(&self, ctx: &mut ExecutionContext<T>, attempt: u32, started: Instant) -> Outcome {
        ctx.emit(EventKind::End, &self.name, attempt, EventDetail::none());
        ctx.mark_completed(&self.name);
        Outcome::success(elapsed_ms(started))
    }

    fn record_failure(
        &self,
        ctx: &mut ExecutionContext<T>,
        attempt: u32,
        error: StepError,
        started: Instant,
    ) -> Outcome {
        warn!(task = %self.name, attempts = attempt, %error, "task failed");
        ctx.emit(
            EventKind::Error,
            &self.name,
            attempt,
            EventDetail::Failure(error.clone()),
        );
        Outcome::failed(
            vec![StepFailure::new(self.name.clone(), error)],
            elapsed_ms(started),
        )
    }
}

#[async_trait]
impl<T: Send> Executable<T> for Task<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_async(&self) -> bool {
        self.action.is_async()
    }

    fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.as_str().is_empty() {
            return Err(ContractViolation::EmptyName);
        }
        Ok(())
    }

    fn execute_sync(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        let started = Instant::now();
        let action = match &self.action {
            Callable::Sync(f) => f,
            Callable::Async(_) => {
                // The future is never constructed, so nothing suspendable
                // leaks out of the mismatch.
                ctx.emit(EventKind::Start, &self.name, 1, EventDetail::none());
                let failure = self.mismatch_failure();
                ctx.emit(
                    EventKind::Error,
                    &self.name,
                    1,
                    EventDetail::Failure(failure.error.clone()),
                );
                return Outcome::failed(vec![failure], elapsed_ms(started));
            }
        };

        let mut attempt = 1u32;
        loop {
            ctx.emit(EventKind::Start, &self.name, attempt, EventDetail::none());
            match action(ctx) {
                Ok(()) => return self.record_success(ctx, attempt, started),
                Err(error) => {
                    if !self.retry.should_retry(attempt, &error.kind) {
                        return self.record_failure(ctx, attempt, error, started);
                    }
                    ctx.emit(
                        EventKind::Error,
                        &self.name,
                        attempt,
                        EventDetail::Failure(error.clone()),
                    );
                    let delay = self.retry.next_delay(attempt, env.jitter());
                    ctx.emit(
                        EventKind::Retry,
                        &self.name,
                        attempt,
                        EventDetail::Backoff {
                            next_delay_ms: delay.as_millis() as u64,
                        },
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    async fn execute_async(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        let started = Instant::now();
        if env.cancel().is_cancelled() {
            let error = StepError::cancelled(format!(
                "run cancelled before task '{}' started",
                self.name
            ));
            return Outcome::failed(
                vec![StepFailure::new(self.name.clone(), error)],
                elapsed_ms(started),
            );
        }

        let mut attempt = 1u32;
        loop {
            ctx.emit(EventKind::Start, &self.name, attempt, EventDetail::none());
            let result = match &self.action {
                Callable::Sync(f) => f(ctx),
                Callable::Async(f) => {
                    let fut = f(ctx);
                    tokio::select! {
                        _ = env.cancel().cancelled() => Err(StepError::cancelled(format!(
                            "task '{}' cancelled mid-flight",
                            self.name
                        ))),
                        result = fut => result,
                    }
                }
            };

            match result {
                Ok(()) => return self.record_success(ctx, attempt, started),
                Err(error) => {
                    if !self.retry.should_retry(attempt, &error.kind) {
                        return self.record_failure(ctx, attempt, error, started);
                    }
                    ctx.emit(
                        EventKind::Error,
                        &self.name,
                        attempt,
                        EventDetail::Failure(error.clone()),
                    );
                    let delay = self.retry.next_delay(attempt, env.jitter());
                    ctx.emit(
                        EventKind::Retry,
                        &self.name,
                        attempt,
                        EventDetail::Backoff {
                            next_delay_ms: delay.as_millis() as u64,
                        },
                    );
                    tokio::select! {
                        _ = env.cancel().cancelled() => {
                            let error = StepError::cancelled(format!(
                                "task '{}' cancelled during backoff",
                                self.name
                            ));
                            return self.record_failure(ctx, attempt, error, started);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
