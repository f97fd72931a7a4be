//! Ordered composite of executables.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::ContractViolation;
use crate::executable::{Executable, RunEnv, Step};
use crate::name::StepName;
use crate::outcome::Outcome;

/// A linear collection of executables, run strictly in declared order.
///
/// A process short-circuits on the first failing child and propagates that
/// child's failure as its own. It has no failure policy and never rolls
/// back; strategy decisions belong to the enclosing
/// [`Workflow`](https://docs.rs/musubi). Processes write nothing to the
/// trace: only leaves and the compensation driver do.
pub struct Process<T> {
    name: StepName,
    description: String,
    steps: Vec<Step<T>>,
}

impl<T> fmt::Debug for Process<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(Step::name).collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Process<T> {
    /// Creates a process from an ordered list of children.
    pub fn new(name: impl Into<StepName>, steps: Vec<Step<T>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    /// Sets the semantic description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The process's name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// The process's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The ordered children.
    pub fn steps(&self) -> &[Step<T>] {
        &self.steps
    }
}

#[async_trait]
impl<T: Send> Executable<T> for Process<T> {
    fn name(&self) -> &StepName {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_async(&self) -> bool {
        self.steps.iter().any(|step| step.is_async())
    }

    fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.as_str().is_empty() {
            return Err(ContractViolation::EmptyName);
        }
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            let name = Step::name(step);
            if !seen.insert(name) {
                return Err(ContractViolation::DuplicateName(name.clone()));
            }
            step.validate()?;
        }
        Ok(())
    }

    fn execute_sync(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        let started = Instant::now();
        for step in &self.steps {
            let result = step.execute_sync(ctx, env);
            if !result.is_success() {
                return result;
            }
        }
        Outcome::success(started.elapsed().as_millis() as u64)
    }

    async fn execute_async(&self, ctx: &mut ExecutionContext<T>, env: &RunEnv) -> Outcome {
        let started = Instant::now();
        for step in &self.steps {
            let result = step.execute_async(ctx, env).await;
            if !result.is_success() {
                return result;
            }
        }
        Outcome::success(started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventKind;
    use crate::error::{ErrorKind, StepError};
    use crate::task::Task;

    fn bump(label: &'static str) -> Task<Vec<&'static str>> {
        Task::new(label, move |ctx: &mut ExecutionContext<Vec<&'static str>>| {
            ctx.data.push(label);
            Ok(())
        })
    }

    #[test]
    fn test_executes_in_declared_order() {
        let process = Process::new("p", vec![bump("a").into(), bump("b").into(), bump("c").into()]);
        let mut ctx = ExecutionContext::new(Vec::new());

        let outcome = process.execute_sync(&mut ctx, &RunEnv::default());

        assert!(outcome.is_success());
        assert_eq!(ctx.data, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_short_circuits_on_failure() {
        let failing = Task::new("b", |_: &mut ExecutionContext<Vec<&'static str>>| {
            Err(StepError::user("boom"))
        });
        let process = Process::new("p", vec![bump("a").into(), failing.into(), bump("c").into()]);
        let mut ctx = ExecutionContext::new(Vec::new());

        let outcome = process.execute_sync(&mut ctx, &RunEnv::default());

        assert_eq!(outcome.status, crate::RunStatus::Failed);
        assert_eq!(outcome.errors[0].step.as_str(), "b");
        // `c` was never attempted.
        assert_eq!(ctx.data, vec!["a"]);
        assert!(!ctx
            .trace()
            .iter()
            .any(|e| e.kind == EventKind::Start && e.node.as_str() == "c"));
    }

    #[test]
    fn test_nested_process_propagates() {
        let inner = Process::new(
            "inner",
            vec![Task::new("x", |_: &mut ExecutionContext<Vec<&'static str>>| {
                Err(StepError::new("rate_limited", "throttled"))
            })
            .into()],
        );
        let process = Process::new("outer", vec![bump("a").into(), inner.into()]);
        let mut ctx = ExecutionContext::new(Vec::new());

        let outcome = process.execute_sync(&mut ctx, &RunEnv::default());

        assert_eq!(outcome.status, crate::RunStatus::Failed);
        assert_eq!(outcome.errors[0].step.as_str(), "x");
        assert_eq!(
            outcome.errors[0].error.kind,
            ErrorKind::Other("rate_limited".to_string())
        );
    }

    #[test]
    fn test_duplicate_child_names_rejected() {
        let process = Process::new("p", vec![bump("a").into(), bump("a").into()]);
        assert_eq!(
            process.validate(),
            Err(ContractViolation::DuplicateName(StepName::new("a")))
        );
    }

    #[test]
    fn test_is_async_is_disjunction_of_children() {
        use crate::task::TaskFuture;

        fn noop<'a>(_: &'a mut ExecutionContext<Vec<&'static str>>) -> TaskFuture<'a> {
            Box::pin(async { Ok(()) })
        }
        let sync_only = Process::new("p", vec![bump("a").into()]);
        assert!(!Executable::is_async(&sync_only));

        let mixed = Process::new("p", vec![bump("a").into(), Task::new_async("b", noop).into()]);
        assert!(Executable::is_async(&mixed));
    }
}
