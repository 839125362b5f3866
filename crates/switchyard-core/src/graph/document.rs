//! Workflow node document as published by the workflow catalog.
//!
//! Loosely typed on purpose: missing ids/types deserialize to empty strings so
//! that compilation can report every problem at once instead of failing on the
//! first serde error.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default)]
    pub next: Vec<String>,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: empty_config(),
            next: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn then(mut self, target: impl Into<String>) -> Self {
        self.next.push(target.into());
        self
    }
}

impl WorkflowDocument {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self { nodes }
    }
}
