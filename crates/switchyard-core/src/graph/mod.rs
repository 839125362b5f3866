//! Workflow graphs: node document + compiled DAG.

pub mod compile;
pub mod document;

pub use self::compile::{CompiledGraph, GraphViolation};
pub use self::document::{NodeSpec, WorkflowDocument};
