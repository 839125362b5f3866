//! InMemoryWorkflowCatalog - workflow version の保存と live 切り替え
//!
//! publish した version は不変。live フラグの切り替えと読み出しは同じロックの
//! 下で行うので、Execution 作成時の version 取得は live 切り替えと直列化されます。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{AutomationId, RelayError, WorkflowVersion};
use crate::graph::WorkflowDocument;
use crate::ports::WorkflowResolver;

#[derive(Default)]
struct AutomationWorkflows {
    versions: Vec<WorkflowVersion>,
    live: Option<u32>,
}

impl AutomationWorkflows {
    fn push(&mut self, automation_id: AutomationId, document: WorkflowDocument) -> u32 {
        let version = self.versions.len() as u32 + 1;
        self.versions.push(WorkflowVersion {
            automation_id,
            version,
            document,
        });
        version
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowCatalog {
    automations: RwLock<HashMap<AutomationId, AutomationWorkflows>>,
}

impl InMemoryWorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new version (1, 2, ...) without making it live.
    ///
    /// Documents are stored as given; validation happens when an execution is
    /// created from them.
    pub async fn publish(&self, automation_id: AutomationId, document: WorkflowDocument) -> u32 {
        let mut automations = self.automations.write().await;
        automations.entry(automation_id).or_default().push(automation_id, document)
    }

    pub async fn set_live(&self, automation_id: AutomationId, version: u32) -> Result<(), RelayError> {
        let mut automations = self.automations.write().await;
        let workflows = automations
            .get_mut(&automation_id)
            .filter(|w| w.versions.iter().any(|v| v.version == version))
            .ok_or_else(|| RelayError::not_found("workflow version", format!("{automation_id}@{version}")))?;
        workflows.live = Some(version);
        Ok(())
    }

    /// `publish` + `set_live`.
    pub async fn publish_live(&self, automation_id: AutomationId, document: WorkflowDocument) -> u32 {
        let mut automations = self.automations.write().await;
        let workflows = automations.entry(automation_id).or_default();
        let version = workflows.push(automation_id, document);
        workflows.live = Some(version);
        version
    }
}

#[async_trait]
impl WorkflowResolver for InMemoryWorkflowCatalog {
    async fn get_live_workflow(
        &self,
        automation_id: AutomationId,
    ) -> Result<WorkflowVersion, RelayError> {
        let automations = self.automations.read().await;
        let workflows = automations
            .get(&automation_id)
            .ok_or_else(|| RelayError::Match(format!("automation {automation_id} has no workflow")))?;
        let live = workflows
            .live
            .ok_or_else(|| RelayError::Match(format!("automation {automation_id} has no live workflow")))?;
        workflows
            .versions
            .iter()
            .find(|v| v.version == live)
            .cloned()
            .ok_or_else(|| RelayError::Match(format!("live version {live} of {automation_id} is missing")))
    }
}
