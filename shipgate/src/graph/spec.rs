//! Stage specifications.

use super::predicates::{self, Predicate};
use crate::core::StageName;
use crate::errors::ShipgateError;
use crate::stages::Stage;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A stage node: its runner, its dependencies and its gate.
#[derive(Clone)]
pub struct StageSpec {
    /// The stage this node runs.
    pub name: StageName,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Stages that must be terminal before this one is evaluated.
    pub dependencies: BTreeSet<StageName>,
    /// Gate evaluated once all dependencies are terminal.
    pub predicate: Predicate,
}

impl StageSpec {
    /// Creates a spec with no dependencies and the stage's standard predicate.
    #[must_use]
    pub fn new(runner: Arc<dyn Stage>) -> Self {
        let name = runner.name();
        Self {
            name,
            runner,
            dependencies: BTreeSet::new(),
            predicate: predicates::for_stage(name),
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = StageName>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: StageName) -> Self {
        self.dependencies.insert(dep);
        self
    }

    /// Replaces the predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Validates the spec in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage depends on itself.
    pub fn validate(&self) -> Result<(), ShipgateError> {
        if self.dependencies.contains(&self.name) {
            return Err(ShipgateError::InvalidGraph(format!(
                "stage '{}' cannot depend on itself",
                self.name
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::BuildStage;

    #[test]
    fn test_stage_spec_creation() {
        let spec = StageSpec::new(Arc::new(BuildStage))
            .with_dependencies([StageName::DeployCheck, StageName::ExtendedTest]);

        assert_eq!(spec.name, StageName::Build);
        assert_eq!(spec.dependencies.len(), 2);
    }

    #[test]
    fn test_stage_spec_self_dependency() {
        let spec = StageSpec::new(Arc::new(BuildStage)).with_dependency(StageName::Build);
        assert!(spec.validate().is_err());
    }
}
