//! Dispatcher - outbox entry を claim して Execution に変換する
//!
//! # フロー
//! 1. OutboxStore::claim_batch() で lock を取得
//! 2. Event 読み出し → trigger 照合 → automation ごとに live workflow を解決
//! 3. グラフを compile / 検証して QUEUED の Execution を作成
//! 4. entry を DONE に（0 件一致も DONE）
//!
//! 2-3 のどこで失敗しても entry は FAILED（backoff 付き）か、
//! max_attempts に達していれば DEAD + DeadLetter になります。
//! 1 entry の失敗がバッチ全体を止めることはありません。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app::registry::ExecutorRegistry;
use crate::app::retry::{RetryDecision, RetryPolicy};
use crate::domain::redaction::redact_text;
use crate::domain::{
    AutomationId, DeadLetterId, Execution, ExecutionId, OutboxEntry, OutboxId, RelayError,
    WorkerId,
};
use crate::graph::CompiledGraph;
use crate::ports::{Clock, IdGenerator, RelayStore, TriggerMatcher, WorkflowResolver};

/// Result of processing one claimed entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedEntry {
    pub outbox_id: OutboxId,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Entry is DONE. Empty when no trigger matched.
    Done { executions: Vec<ExecutionId> },
    /// Entry is FAILED and will be retried.
    Retrying {
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Entry is DEAD.
    DeadLettered { dead_letter_id: DeadLetterId },
}

struct PreparedExecution {
    automation_id: AutomationId,
    version: u32,
    graph: Arc<CompiledGraph>,
}

pub struct Dispatcher {
    store: Arc<dyn RelayStore>,
    triggers: Arc<dyn TriggerMatcher>,
    workflows: Arc<dyn WorkflowResolver>,
    registry: Arc<ExecutorRegistry>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    lock_ttl: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RelayStore>,
        triggers: Arc<dyn TriggerMatcher>,
        workflows: Arc<dyn WorkflowResolver>,
        registry: Arc<ExecutorRegistry>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            triggers,
            workflows,
            registry,
            ids,
            clock,
            retry,
            lock_ttl,
        }
    }

    /// Claims up to `batch_size` entries and processes each independently.
    ///
    /// Only a failing claim is returned as an error. Per-entry failures become
    /// outbox transitions; an entry whose transition cannot be written is
    /// logged and left for lock stealing.
    pub async fn dispatch_batch(
        &self,
        batch_size: usize,
        worker: &WorkerId,
    ) -> Result<Vec<ProcessedEntry>, RelayError> {
        let claimed = self
            .store
            .claim_batch(batch_size, worker, self.clock.now(), self.lock_ttl)
            .await?;
        if claimed.is_empty() {
            return Ok(Vec::new());
        }
        debug!(worker_id = %worker, claimed = claimed.len(), "claimed outbox batch");

        let mut processed = Vec::with_capacity(claimed.len());
        for entry in claimed {
            match self.process_entry(&entry, worker).await {
                Ok(outcome) => processed.push(ProcessedEntry {
                    outbox_id: entry.id,
                    outcome,
                }),
                Err(err) => error!(
                    outbox_id = %entry.id,
                    worker_id = %worker,
                    error = %err,
                    "failed to record dispatch outcome"
                ),
            }
        }
        Ok(processed)
    }

    async fn process_entry(
        &self,
        entry: &OutboxEntry,
        worker: &WorkerId,
    ) -> Result<DispatchOutcome, RelayError> {
        match self.route(entry).await {
            Ok(executions) => {
                self.store.mark_done(entry.id, worker, self.clock.now()).await?;
                info!(
                    outbox_id = %entry.id,
                    worker_id = %worker,
                    executions = executions.len(),
                    "outbox entry dispatched"
                );
                Ok(DispatchOutcome::Done { executions })
            }
            Err(err) => self.record_failure(entry, worker, err).await,
        }
    }

    /// Steps 1-4: event -> matched automations -> queued executions.
    async fn route(&self, entry: &OutboxEntry) -> Result<Vec<ExecutionId>, RelayError> {
        let event = self
            .store
            .get_event(entry.event_id)
            .await?
            .ok_or_else(|| RelayError::not_found("event", entry.event_id))?;

        let matched = self.triggers.matches(&event).await?;
        let mut seen = HashSet::new();
        let automations: Vec<AutomationId> = matched
            .iter()
            .map(|trigger| trigger.automation_id)
            .filter(|id| seen.insert(*id))
            .collect();
        if automations.is_empty() {
            debug!(outbox_id = %entry.id, event_type = %event.event_type, "no trigger matched");
            return Ok(Vec::new());
        }

        // Resolve and validate everything before creating anything, so a bad
        // workflow for one automation does not leave partial executions behind.
        let mut prepared = Vec::with_capacity(automations.len());
        for automation_id in automations {
            prepared.push(self.prepare(automation_id).await?);
        }

        let mut created = Vec::with_capacity(prepared.len());
        for PreparedExecution {
            automation_id,
            version,
            graph,
        } in prepared
        {
            let execution = Execution::queued(
                self.ids.generate_execution_id(),
                event.tenant_id.clone(),
                event.id,
                automation_id,
                version,
                self.clock.now(),
            );
            let execution_id = self.store.create_execution(execution, graph).await?;
            debug!(
                execution_id = %execution_id,
                automation_id = %automation_id,
                workflow_version = version,
                "execution queued"
            );
            created.push(execution_id);
        }
        Ok(created)
    }

    async fn prepare(&self, automation_id: AutomationId) -> Result<PreparedExecution, RelayError> {
        let workflow = self.workflows.get_live_workflow(automation_id).await?;
        let graph = CompiledGraph::compile(&workflow.document).map_err(RelayError::Validation)?;
        let violations = self.registry.validate_graph(&graph);
        if !violations.is_empty() {
            return Err(RelayError::Validation(violations));
        }
        Ok(PreparedExecution {
            automation_id,
            version: workflow.version,
            graph: Arc::new(graph),
        })
    }

    /// Step 5: attempts += 1, then retry with backoff or dead-letter.
    async fn record_failure(
        &self,
        entry: &OutboxEntry,
        worker: &WorkerId,
        err: RelayError,
    ) -> Result<DispatchOutcome, RelayError> {
        let message = redact_text(&err.to_string());
        let attempts = entry.attempts + 1;
        let now = self.clock.now();

        match self.retry.decide(attempts, now) {
            RetryDecision::RetryAt(next_attempt_at) => {
                let updated = self
                    .store
                    .mark_failed(entry.id, worker, message.clone(), next_attempt_at, now)
                    .await?;
                warn!(
                    outbox_id = %entry.id,
                    worker_id = %worker,
                    kind = err.kind().as_str(),
                    attempts = updated.attempts,
                    next_attempt_at = %next_attempt_at,
                    error = %message,
                    "dispatch failed; retry scheduled"
                );
                Ok(DispatchOutcome::Retrying {
                    attempts: updated.attempts,
                    next_attempt_at,
                })
            }
            RetryDecision::DeadLetter => {
                let dead_letter = self.store.mark_dead(entry.id, worker, message.clone(), now).await?;
                error!(
                    outbox_id = %entry.id,
                    worker_id = %worker,
                    kind = err.kind().as_str(),
                    attempts = dead_letter.attempts,
                    dead_letter_id = %dead_letter.id,
                    error = %message,
                    "dispatch failed permanently; entry dead-lettered"
                );
                Ok(DispatchOutcome::DeadLettered {
                    dead_letter_id: dead_letter.id,
                })
            }
        }
    }
}
