//! Dynamic assembly: build a runnable workflow from a declarative
//! descriptor and a registry of known tasks.
//!
//! This is the security boundary for machine-driven construction (e.g. an
//! LLM emitting a descriptor): no code in the descriptor is ever executed,
//! only pre-registered tasks can be referenced, and unknown names or
//! strategy tags are rejected before anything runs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use musubi_core::{ContractViolation, Task};

use crate::workflow::{FailureStrategy, Workflow};

/// Why a descriptor could not be assembled.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssemblyError {
    /// The descriptor referenced a step absent from the registry.
    #[error("unknown step '{0}'")]
    UnknownStep(String),

    /// The descriptor carried an unrecognized strategy tag.
    #[error("invalid strategy '{0}'")]
    InvalidStrategy(String),

    /// The assembled tree violated the structural contract.
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    /// The descriptor payload was not valid JSON.
    #[error("malformed descriptor: {0}")]
    Malformed(String),
}

/// Declarative description of a workflow to assemble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    /// Name of the workflow to build.
    pub name: String,
    /// Step names to resolve against the registry, in execution order.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Failure strategy tag, parsed case-insensitively.
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "abort".to_string()
}

impl WorkflowDescriptor {
    /// Parses a descriptor from its JSON form.
    pub fn from_json(raw: &str) -> Result<Self, AssemblyError> {
        serde_json::from_str(raw).map_err(|e| AssemblyError::Malformed(e.to_string()))
    }
}

/// The set of tasks a descriptor may reference, keyed by task name.
///
/// Registering a task under an already-used name replaces the previous
/// entry.
pub struct Registry<T> {
    tasks: HashMap<String, Task<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Registers a task under its own name.
    pub fn register(&mut self, task: Task<T>) {
        self.tasks.insert(task.name().to_string(), task);
    }

    /// Looks up a task by name.
    pub fn get(&self, name: &str) -> Option<&Task<T>> {
        self.tasks.get(name)
    }

    /// Returns `true` if a task with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no tasks are registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds a workflow from a descriptor, resolving step names against the
/// registry in the given order.
pub fn assemble<T: Send>(
    descriptor: &WorkflowDescriptor,
    registry: &Registry<T>,
) -> Result<Workflow<T>, AssemblyError> {
    let strategy: FailureStrategy = descriptor
        .strategy
        .parse()
        .map_err(|_| AssemblyError::InvalidStrategy(descriptor.strategy.clone()))?;

    let mut builder = Workflow::builder(descriptor.name.as_str()).strategy(strategy);
    for name in &descriptor.steps {
        let task = registry
            .get(name)
            .ok_or_else(|| AssemblyError::UnknownStep(name.clone()))?;
        builder = builder.step(task.clone());
    }

    debug!(workflow = %descriptor.name, steps = descriptor.steps.len(), "assembled workflow");
    Ok(builder.build()?)
}
