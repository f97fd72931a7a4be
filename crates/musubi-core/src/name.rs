//! Step name newtype.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type-safe step name wrapper.
///
/// Names identify nodes in the executable tree and key the completed-step
/// bookkeeping used for compensation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_name() {
        let name = StepName::new("charge_card");
        assert_eq!(name.as_str(), "charge_card");

        let name: StepName = "charge_card".into();
        assert_eq!(name.to_string(), "charge_card");
    }
}
