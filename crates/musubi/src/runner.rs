//! Execution drivers for the executable tree.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use musubi_core::{
    ContractViolation, Executable, ExecutionContext, JitterSource, Outcome, RunEnv, UniformJitter,
};

/// Single-threaded synchronous driver.
///
/// Invokes user functions directly and sleeps the thread between retries.
/// Asynchronous work is never silently tolerated: an async task fails the
/// run with a `runner_mismatch` error, and an async compensator is recorded
/// as a compensation failure.
pub struct SyncRunner {
    jitter: Arc<dyn JitterSource>,
}

impl Default for SyncRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRunner {
    /// Creates a runner with the production jitter sampler.
    pub fn new() -> Self {
        Self {
            jitter: Arc::new(UniformJitter),
        }
    }

    /// Substitutes the jitter sampler (deterministic in tests).
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Runs an executable against the given context.
    ///
    /// User-originated failures surface through [`Outcome::errors`]; only a
    /// malformed tree is returned as a hard error.
    pub fn run<T, E>(
        &self,
        executable: &E,
        ctx: &mut ExecutionContext<T>,
    ) -> Result<Outcome, ContractViolation>
    where
        T: Send,
        E: Executable<T> + ?Sized,
    {
        executable.validate()?;
        let env = RunEnv::new(self.jitter.clone(), CancellationToken::new());
        Ok(executable.execute_sync(ctx, &env))
    }
}

/// Single-threaded cooperative driver.
///
/// Awaits async tasks, runs sync tasks inline (callers needing offload must
/// wrap their function), and sleeps cooperatively between retries. Holds a
/// [`CancellationToken`]: cancelling it aborts pending backoff sleeps and
/// in-flight tasks at their next suspension point, surfacing a `cancelled`
/// failure that obeys the workflow's failure strategy.
///
/// The token is not reset between runs; create a fresh runner per
/// cancellable run.
pub struct AsyncRunner {
    jitter: Arc<dyn JitterSource>,
    cancel: CancellationToken,
}

impl Default for AsyncRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRunner {
    /// Creates a runner with the production jitter sampler and a fresh
    /// cancellation token.
    pub fn new() -> Self {
        Self {
            jitter: Arc::new(UniformJitter),
            cancel: CancellationToken::new(),
        }
    }

    /// Substitutes the jitter sampler (deterministic in tests).
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// A handle that cancels this runner's runs.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs an executable against the given context under cooperative
    /// scheduling.
    pub async fn run<T, E>(
        &self,
        executable: &E,
        ctx: &mut ExecutionContext<T>,
    ) -> Result<Outcome, ContractViolation>
    where
        T: Send,
        E: Executable<T> + ?Sized,
    {
        executable.validate()?;
        let env = RunEnv::new(self.jitter.clone(), self.cancel.clone());
        Ok(executable.execute_async(ctx, &env).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use musubi_core::{ErrorKind, RunStatus, StepError, Task, TaskFuture};

    use crate::workflow::{FailureStrategy, Workflow};

    #[test]
    fn test_sync_runner_rejects_async_task() {
        fn stall(_: &mut ExecutionContext<u32>) -> TaskFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        let task = Task::new_async("stall", stall);
        let mut ctx = ExecutionContext::new(0);

        let outcome = SyncRunner::new().run(&task, &mut ctx).expect("valid tree");

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.errors[0].error.kind, ErrorKind::RunnerMismatch);
    }

    #[test]
    fn test_malformed_tree_is_a_hard_error() {
        use musubi_core::Process;

        // The workflow builder refuses duplicates, but a process can be
        // constructed malformed; the runner's own validation catches it.
        let noop = || Task::new("same", |_: &mut ExecutionContext<u32>| Ok(()));
        let process = Process::new("p", vec![noop().into(), noop().into()]);
        let mut ctx = ExecutionContext::new(0u32);

        let result = SyncRunner::new().run(&process, &mut ctx);

        assert!(matches!(
            result,
            Err(ContractViolation::DuplicateName(_))
        ));
        assert!(ctx.trace().is_empty());
    }

    #[tokio::test]
    async fn test_async_runner_drives_mixed_workflow() {
        fn fetch(ctx: &mut ExecutionContext<u32>) -> TaskFuture<'_> {
            Box::pin(async move {
                ctx.data += 10;
                Ok(())
            })
        }
        let workflow = Workflow::builder("mixed")
            .step(Task::new_async("fetch", fetch))
            .step(Task::new("bump", |ctx: &mut ExecutionContext<u32>| {
                ctx.data += 1;
                Ok(())
            }))
            .build()
            .expect("valid workflow");
        let mut ctx = ExecutionContext::new(0);

        let outcome = AsyncRunner::new()
            .run(&workflow, &mut ctx)
            .await
            .expect("valid tree");

        assert!(outcome.is_success());
        assert_eq!(ctx.data, 11);
    }

    #[tokio::test]
    async fn test_cancellation_triggers_compensation() {
        fn stall(_: &mut ExecutionContext<u32>) -> TaskFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
        }
        let workflow = Workflow::builder("cancellable")
            .step(
                Task::new("reserve", |ctx: &mut ExecutionContext<u32>| {
                    ctx.data += 1;
                    Ok(())
                })
                .with_undo(|ctx| {
                    ctx.data -= 1;
                    Ok(())
                }),
            )
            .step(Task::new_async("stall", stall))
            .strategy(FailureStrategy::Compensate)
            .build()
            .expect("valid workflow");

        let runner = AsyncRunner::new();
        let token = runner.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let mut ctx = ExecutionContext::new(0);

        let outcome = runner.run(&workflow, &mut ctx).await.expect("valid tree");

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.errors[0].error.kind, ErrorKind::Cancelled);
        // The completed step was rolled back.
        assert_eq!(ctx.data, 0);
    }

    #[test]
    fn test_sync_runner_runs_bare_task() {
        let task = Task::new("bump", |ctx: &mut ExecutionContext<u32>| {
            ctx.data += 1;
            Ok(())
        });
        let mut ctx = ExecutionContext::new(0);

        let outcome = SyncRunner::new().run(&task, &mut ctx).expect("valid tree");

        assert!(outcome.is_success());
        assert_eq!(ctx.data, 1);
    }

    #[test]
    fn test_user_errors_are_returned_not_raised() {
        let task = Task::new("boom", |_: &mut ExecutionContext<u32>| {
            Err(StepError::user("nope"))
        });
        let mut ctx = ExecutionContext::new(0);

        let outcome = SyncRunner::new().run(&task, &mut ctx).expect("valid tree");

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.errors[0].error.kind, ErrorKind::UserError);
    }
}
