use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{CompiledGraph, GraphViolation};
use crate::ports::StepExecutor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("step executor for type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Registry of step executors (step type -> executor).
///
/// Design:
/// - Built during initialization (mutable).
/// - Shared behind an `Arc` afterwards (immutable, no locks).
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        step_type: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<(), RegistryError> {
        let step_type = step_type.into();
        if self.executors.contains_key(&step_type) {
            return Err(RegistryError::AlreadyRegistered(step_type));
        }
        self.executors.insert(step_type, executor);
        Ok(())
    }

    pub fn get(&self, step_type: &str) -> Option<&Arc<dyn StepExecutor>> {
        self.executors.get(step_type)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.executors.contains_key(step_type)
    }

    /// Sorted, for stable error messages.
    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Checks every node of a compiled graph against the registered executors.
    pub fn validate_graph(&self, graph: &CompiledGraph) -> Vec<GraphViolation> {
        graph
            .steps()
            .filter_map(|node| match self.get(&node.node_type) {
                None => Some(GraphViolation::UnknownStepType {
                    node: node.id.clone(),
                    step_type: node.node_type.clone(),
                }),
                Some(executor) => executor.validate_config(&node.config).err().map(|reason| {
                    GraphViolation::InvalidConfig {
                        node: node.id.clone(),
                        reason,
                    }
                }),
            })
            .collect()
    }
}
