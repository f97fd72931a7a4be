//! Semantic introspection of workflow structure.

use serde::{Deserialize, Serialize};

use musubi_core::Executable;

use crate::workflow::{FailureStrategy, Workflow};

/// One top-level step as seen by external tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepManifest {
    /// The step's name.
    pub name: String,
    /// The step's semantic description.
    pub description: String,
    /// Whether the step requires the async runner.
    pub is_async: bool,
}

/// A plain structured description of a workflow, suitable for semantic
/// tooling. Deterministic: the same tree always yields the same manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// The workflow's name.
    pub name: String,
    /// The workflow's semantic description.
    pub description: String,
    /// The configured failure strategy.
    pub strategy: FailureStrategy,
    /// Top-level steps in execution order.
    pub steps: Vec<StepManifest>,
}

impl Manifest {
    /// Serializes the manifest to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl<T: Send> Workflow<T> {
    /// Describes this workflow's structure.
    pub fn manifest(&self) -> Manifest {
        Manifest {
            name: self.name().to_string(),
            description: self.description().to_string(),
            strategy: self.strategy(),
            steps: self
                .steps()
                .iter()
                .map(|step| StepManifest {
                    name: step.name().to_string(),
                    description: step.description().to_string(),
                    is_async: Executable::is_async(step),
                })
                .collect(),
        }
    }
}
