//! StepExecutor port - node type ごとの実行能力
//!
//! Registry に文字列キーで登録され、起動時に固定されます。

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::redaction;
use crate::domain::{AutomationId, EventId, ExecutionId, StepError};

/// What a step knows about the run it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    pub execution_id: ExecutionId,
    pub event_id: EventId,
    pub automation_id: AutomationId,
    pub tenant_id: String,
    pub workflow_version: u32,
    pub step_id: String,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// `inputs` is `{"event": <payload>, "steps": {<step_id>: <output>, ...}}`.
    async fn execute(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &StepContext,
    ) -> Result<Value, StepError>;

    /// Checked when an execution is created.
    fn validate_config(&self, _config: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Applied to inputs and outputs before they are persisted.
    fn redact(&self, value: &Value) -> Value {
        redaction::redact_value(value)
    }
}
