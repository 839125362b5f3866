//! Automation configuration as seen by the relay (read-only).

use serde::{Deserialize, Serialize};

use super::event::Event;
use super::ids::AutomationId;
use crate::graph::WorkflowDocument;

/// Binds an event type (and optionally a source) to an automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub automation_id: AutomationId,
    pub tenant_id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TriggerSpec {
    pub fn new(automation_id: AutomationId, tenant_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            automation_id,
            tenant_id: tenant_id.into(),
            event_type: event_type.into(),
            source: None,
            active: true,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.active
            && self.tenant_id == event.tenant_id
            && self.event_type == event.event_type
            && self.source.as_deref().is_none_or(|s| s == event.source)
    }
}

/// One published version of an automation's workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub automation_id: AutomationId,
    pub version: u32,
    pub document: WorkflowDocument,
}
