//! Collaborator ports - trigger matching と workflow 解決
//!
//! どちらも設定を持つ外部コンポーネントで、relay からは読み取り専用です。

use async_trait::async_trait;

use crate::domain::{AutomationId, Event, RelayError, TriggerSpec, WorkflowVersion};

#[async_trait]
pub trait TriggerMatcher: Send + Sync {
    /// Every active trigger matching `event`. Duplicates are allowed; the
    /// dispatcher dedupes by automation.
    async fn matches(&self, event: &Event) -> Result<Vec<TriggerSpec>, RelayError>;
}

#[async_trait]
pub trait WorkflowResolver: Send + Sync {
    /// The version currently marked live. `RelayError::Match` when there is none.
    async fn get_live_workflow(
        &self,
        automation_id: AutomationId,
    ) -> Result<WorkflowVersion, RelayError>;
}
