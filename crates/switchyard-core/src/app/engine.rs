//! ExecutionEngine - 1 Execution の lease を取り、グラフを順に実行する
//!
//! - ノードの順序は compile 時に固定（Execution 作成時のスナップショット）
//! - 各ノードの前と SUCCESS 確定の直前に cancel 要求を確認
//! - lease を奪い直した再実行では SUCCESS 済みの step を再実行しない
//!   （記録済み output を後続ノードの入力に使う）
//! - step の失敗は Execution FAILED（engine 内での retry はしない）
//! - どの経路で抜けても lease は解放する。store 障害などの engine fault は
//!   解放後に呼び出し元へ返す

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::app::registry::ExecutorRegistry;
use crate::domain::redaction::{redact_text, redact_value};
use crate::domain::{
    Execution, ExecutionId, ExecutionStatus, ExecutionStep, RelayError, StepError, StepStatus,
    WorkerId,
};
use crate::ports::{Clock, RelayStore, StepContext};

/// How a `run_execution` call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Not claimable (missing, terminal, or leased by another worker).
    Skipped,
    Succeeded,
    Failed { step_id: String, error: String },
    Canceled,
}

/// Totals for one `run_pending` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    pub skipped: usize,
    /// Engine-level faults (lease released, execution left claimable).
    pub faulted: usize,
}

pub struct ExecutionEngine {
    store: Arc<dyn RelayStore>,
    registry: Arc<ExecutorRegistry>,
    clock: Arc<dyn Clock>,
    lease_ttl: Duration,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn RelayStore>,
        registry: Arc<ExecutorRegistry>,
        clock: Arc<dyn Clock>,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            lease_ttl,
        }
    }

    pub async fn run_execution(
        &self,
        id: ExecutionId,
        worker: &WorkerId,
    ) -> Result<RunOutcome, RelayError> {
        let claimed = self
            .store
            .claim_execution(id, worker, self.clock.now(), self.lease_ttl)
            .await?;
        let Some(execution) = claimed else {
            debug!(execution_id = %id, worker_id = %worker, "execution not claimable; skipping");
            return Ok(RunOutcome::Skipped);
        };
        debug!(execution_id = %id, worker_id = %worker, "execution lease acquired");

        match self.drive(&execution, worker).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(release_err) = self.store.release_execution(id, worker).await {
                    error!(execution_id = %id, error = %release_err, "failed to release execution lease");
                }
                error!(execution_id = %id, worker_id = %worker, error = %err, "execution aborted by engine fault");
                Err(err)
            }
        }
    }

    /// Runs up to `limit` claimable executions one after another.
    pub async fn run_pending(&self, limit: usize, worker: &WorkerId) -> Result<RunSummary, RelayError> {
        let runnable = self
            .store
            .list_runnable(limit, self.clock.now(), self.lease_ttl)
            .await?;

        let mut summary = RunSummary::default();
        for id in runnable {
            match self.run_execution(id, worker).await {
                Ok(RunOutcome::Succeeded) => summary.succeeded += 1,
                Ok(RunOutcome::Failed { .. }) => summary.failed += 1,
                Ok(RunOutcome::Canceled) => summary.canceled += 1,
                Ok(RunOutcome::Skipped) => summary.skipped += 1,
                Err(_) => summary.faulted += 1,
            }
        }
        Ok(summary)
    }

    async fn drive(&self, execution: &Execution, worker: &WorkerId) -> Result<RunOutcome, RelayError> {
        let id = execution.id;
        let graph = self
            .store
            .load_graph(id)
            .await?
            .ok_or_else(|| RelayError::not_found("execution graph", id))?;
        let event = self
            .store
            .get_event(execution.event_id)
            .await?
            .ok_or_else(|| RelayError::not_found("event", execution.event_id))?;

        let mut completed: HashMap<String, Value> = self
            .store
            .list_steps(id)
            .await?
            .into_iter()
            .filter(|step| step.status == StepStatus::Success)
            .map(|step| (step.step_id, step.output.unwrap_or(Value::Null)))
            .collect();

        let mut outputs = Map::new();
        for node in graph.steps() {
            if let Some(output) = completed.remove(&node.id) {
                debug!(execution_id = %id, step_id = %node.id, "step already succeeded; reusing output");
                outputs.insert(node.id.clone(), output);
                continue;
            }
            if self.store.is_cancel_requested(id).await? {
                self.store
                    .finish_execution(id, worker, ExecutionStatus::Canceled, None, self.clock.now())
                    .await?;
                info!(execution_id = %id, at_step = %node.id, "execution canceled");
                return Ok(RunOutcome::Canceled);
            }

            let inputs = json!({
                "event": event.payload,
                "steps": Value::Object(outputs.clone()),
            });
            let ctx = StepContext {
                execution_id: id,
                event_id: execution.event_id,
                automation_id: execution.automation_id,
                tenant_id: execution.tenant_id.clone(),
                workflow_version: execution.workflow_version,
                step_id: node.id.clone(),
            };

            let executor = self.registry.get(&node.node_type);
            let started_at = self.clock.now();
            let result = match executor {
                Some(executor) => executor.execute(&node.config, &inputs, &ctx).await,
                None => Err(StepError::UnknownStepType(node.node_type.clone())),
            };
            let finished_at = self.clock.now();

            let redact = |value: &Value| match executor {
                Some(executor) => executor.redact(value),
                None => redact_value(value),
            };
            let mut step = ExecutionStep {
                execution_id: id,
                step_id: node.id.clone(),
                step_type: node.node_type.clone(),
                status: StepStatus::Success,
                input: redact(&inputs),
                output: None,
                error: None,
                started_at,
                finished_at,
            };

            match result {
                Ok(output) => {
                    step.output = Some(redact(&output));
                    self.store.append_step(step).await?;
                    outputs.insert(node.id.clone(), output);
                    self.store.heartbeat_execution(id, worker, self.clock.now()).await?;
                }
                Err(step_err) => {
                    let message = redact_text(&step_err.to_string());
                    step.status = StepStatus::Failed;
                    step.error = Some(message.clone());
                    self.store.append_step(step).await?;

                    let error = format!("step `{}` failed: {message}", node.id);
                    self.store
                        .finish_execution(id, worker, ExecutionStatus::Failed, Some(error.clone()), self.clock.now())
                        .await?;
                    warn!(
                        execution_id = %id,
                        step_id = %node.id,
                        step_type = %node.node_type,
                        error = %message,
                        "execution failed"
                    );
                    return Ok(RunOutcome::Failed {
                        step_id: node.id.clone(),
                        error,
                    });
                }
            }
        }

        // a cancel requested during the last step still wins
        if self.store.is_cancel_requested(id).await? {
            self.store
                .finish_execution(id, worker, ExecutionStatus::Canceled, None, self.clock.now())
                .await?;
            info!(execution_id = %id, "execution canceled after its last step");
            return Ok(RunOutcome::Canceled);
        }

        self.store
            .finish_execution(id, worker, ExecutionStatus::Success, None, self.clock.now())
            .await?;
        info!(execution_id = %id, steps = graph.len(), "execution succeeded");
        Ok(RunOutcome::Succeeded)
    }
}
