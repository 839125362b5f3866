//! InMemoryStore - 開発用・テスト用の正本
//!
//! すべての状態を 1 つの `tokio::sync::Mutex` の中に置きます。
//! ロックを取っている間に 1 操作を完結させるので、各メソッドはそのまま
//! atomic な単位になります（claim_batch / mark_dead / replay を含む）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{
    AutomationId, DeadLetter, DeadLetterId, Event, EventId, Execution, ExecutionId, ExecutionStatus,
    ExecutionStep, NewEvent, OutboxEntry, OutboxId, OutboxStatus, ReasonCode, RelayError,
    WorkerId,
};
use crate::graph::CompiledGraph;
use crate::ports::{
    AppendedEvent, DeadLetterStore, EventStore, ExecutionCounts, ExecutionStore, IdGenerator,
    OutboxCounts, OutboxStore, StaleLeaseAction,
};

struct OutboxRow {
    entry: OutboxEntry,
    /// Insertion order; claim tie-break.
    seq: u64,
}

struct ExecutionRow {
    execution: Execution,
    graph: Arc<CompiledGraph>,
    steps: Vec<ExecutionStep>,
    seq: u64,
}

#[derive(Default)]
struct InMemoryState {
    events: HashMap<EventId, Event>,
    /// (tenant_id, idempotency_key) -> event
    idempotency: HashMap<(String, String), EventId>,
    outbox_by_event: HashMap<EventId, OutboxId>,
    outbox: HashMap<OutboxId, OutboxRow>,
    dead_letters: HashMap<DeadLetterId, DeadLetter>,
    dead_letter_by_outbox: HashMap<OutboxId, DeadLetterId>,
    executions: HashMap<ExecutionId, ExecutionRow>,
    /// (event_id, automation_id, workflow_version) -> execution
    execution_by_origin: HashMap<(EventId, AutomationId, u32), ExecutionId>,
    next_seq: u64,
}

impl InMemoryState {
    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn outbox_mut(&mut self, id: OutboxId) -> Result<&mut OutboxEntry, RelayError> {
        self.outbox
            .get_mut(&id)
            .map(|row| &mut row.entry)
            .ok_or_else(|| RelayError::not_found("outbox entry", id))
    }

    fn execution_mut(&mut self, id: ExecutionId) -> Result<&mut Execution, RelayError> {
        self.executions
            .get_mut(&id)
            .map(|row| &mut row.execution)
            .ok_or_else(|| RelayError::not_found("execution", id))
    }
}

/// Logs (but allows) a write from a worker that no longer holds the lock.
fn check_outbox_owner(entry: &OutboxEntry, worker: &WorkerId) {
    if entry.lock_owner.as_ref() != Some(worker) {
        warn!(
            outbox_id = %entry.id,
            worker_id = %worker,
            lock_owner = ?entry.lock_owner.as_ref().map(WorkerId::as_str),
            status = ?entry.status,
            "outbox lease lost; applying late write"
        );
    }
}

fn check_execution_owner(execution: &Execution, worker: &WorkerId) {
    if execution.lease_owner.as_ref() != Some(worker) {
        warn!(
            execution_id = %execution.id,
            worker_id = %worker,
            lease_owner = ?execution.lease_owner.as_ref().map(WorkerId::as_str),
            status = ?execution.status,
            "execution lease lost; applying late write"
        );
    }
}

/// In-memory implementation of every store port.
///
/// Cloning shares the same state.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryStore {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState::default())),
            ids,
        }
    }

    /// Every outbox entry in insertion order (for tests and the demo CLI).
    pub async fn outbox_snapshot(&self) -> Vec<OutboxEntry> {
        let state = self.state.lock().await;
        let mut rows: Vec<&OutboxRow> = state.outbox.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.entry.clone()).collect()
    }

    /// Every execution in creation order.
    pub async fn execution_snapshot(&self) -> Vec<Execution> {
        let state = self.state.lock().await;
        let mut rows: Vec<&ExecutionRow> = state.executions.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.execution.clone()).collect()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn append_with_outbox(
        &self,
        new_event: NewEvent,
        now: DateTime<Utc>,
    ) -> Result<AppendedEvent, RelayError> {
        let mut state = self.state.lock().await;

        if let Some(key) = &new_event.idempotency_key
            && let Some(existing_id) = state
                .idempotency
                .get(&(new_event.tenant_id.clone(), key.clone()))
                .copied()
        {
            let event = state
                .events
                .get(&existing_id)
                .cloned()
                .ok_or_else(|| RelayError::not_found("event", existing_id))?;
            let outbox_id = state
                .outbox_by_event
                .get(&existing_id)
                .copied()
                .ok_or_else(|| RelayError::not_found("outbox entry for event", existing_id))?;
            debug!(event_id = %existing_id, idempotency_key = %key, "duplicate event ignored");
            return Ok(AppendedEvent {
                event,
                outbox_id,
                created: false,
            });
        }

        let event = new_event.into_event(self.ids.generate_event_id(), now);
        let outbox_id = self.ids.generate_outbox_id();
        let entry = OutboxEntry::new(outbox_id, event.id, event.tenant_id.clone(), now);
        let seq = state.allocate_seq();

        if let Some(key) = &event.idempotency_key {
            state
                .idempotency
                .insert((event.tenant_id.clone(), key.clone()), event.id);
        }
        state.outbox_by_event.insert(event.id, outbox_id);
        state.outbox.insert(outbox_id, OutboxRow { entry, seq });
        state.events.insert(event.id, event.clone());

        Ok(AppendedEvent {
            event,
            outbox_id,
            created: true,
        })
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, RelayError> {
        let state = self.state.lock().await;
        Ok(state.events.get(&id).cloned())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim_batch(
        &self,
        limit: usize,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lock_ttl: Duration,
    ) -> Result<Vec<OutboxEntry>, RelayError> {
        let mut state = self.state.lock().await;

        let mut candidates: Vec<(DateTime<Utc>, u64, OutboxId)> = state
            .outbox
            .values()
            .filter_map(|row| {
                row.entry
                    .claimable_since(now, lock_ttl)
                    .map(|since| (since, row.seq, row.entry.id))
            })
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, id) in candidates {
            let entry = state.outbox_mut(id)?;
            if entry.status.is_leased() {
                warn!(
                    outbox_id = %id,
                    worker_id = %worker,
                    previous_owner = ?entry.lock_owner.as_ref().map(WorkerId::as_str),
                    "stealing expired outbox lock"
                );
            }
            entry.lock(worker.clone(), now);
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    async fn mark_done(
        &self,
        id: OutboxId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry, RelayError> {
        let mut state = self.state.lock().await;
        let entry = state.outbox_mut(id)?;
        // DEAD only leaves through replay; keeps the dead-letter link intact.
        if entry.status == OutboxStatus::Dead {
            warn!(outbox_id = %id, worker_id = %worker, "ignoring late completion of a dead entry");
            return Ok(entry.clone());
        }
        check_outbox_owner(entry, worker);
        entry.mark_done(now);
        Ok(entry.clone())
    }

    async fn mark_failed(
        &self,
        id: OutboxId,
        worker: &WorkerId,
        error: String,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry, RelayError> {
        let mut state = self.state.lock().await;
        let entry = state.outbox_mut(id)?;
        if entry.status == OutboxStatus::Dead {
            warn!(outbox_id = %id, worker_id = %worker, "ignoring late failure of a dead entry");
            return Ok(entry.clone());
        }
        check_outbox_owner(entry, worker);
        entry.mark_failed(error, next_attempt_at, now);
        Ok(entry.clone())
    }

    async fn mark_dead(
        &self,
        id: OutboxId,
        worker: &WorkerId,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<DeadLetter, RelayError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .dead_letter_by_outbox
            .get(&id)
            .and_then(|dl_id| state.dead_letters.get(dl_id))
        {
            return Ok(existing.clone());
        }

        let dead_letter_id = self.ids.generate_dead_letter_id();
        let entry = state.outbox_mut(id)?;
        check_outbox_owner(entry, worker);
        entry.mark_dead(error.clone(), now);

        let dead_letter = DeadLetter {
            id: dead_letter_id,
            outbox_id: Some(id),
            reason_code: ReasonCode::MaxAttemptsExceeded,
            last_error_redacted: error,
            attempts: entry.attempts,
            created_at: now,
        };
        state.dead_letter_by_outbox.insert(id, dead_letter_id);
        state.dead_letters.insert(dead_letter_id, dead_letter.clone());
        Ok(dead_letter)
    }

    async fn get_outbox(&self, id: OutboxId) -> Result<Option<OutboxEntry>, RelayError> {
        let state = self.state.lock().await;
        Ok(state.outbox.get(&id).map(|row| row.entry.clone()))
    }

    async fn reap_stale_outbox(
        &self,
        cutoff: DateTime<Utc>,
        action: StaleLeaseAction,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, RelayError> {
        let mut state = self.state.lock().await;
        let stale = stale_outbox(&state, cutoff, limit);

        let retry_at = match action {
            StaleLeaseAction::Reset => None,
            StaleLeaseAction::RetryAt(at) => Some(at),
        };

        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            let entry = state.outbox_mut(id)?;
            let owner = entry
                .lock_owner
                .as_ref()
                .map_or("unknown", WorkerId::as_str)
                .to_string();
            entry.release_stale(retry_at, format!("reaped: stale lease held by {owner}"), now);
            reaped.push(entry.clone());
        }
        Ok(reaped)
    }

    async fn count_stale_outbox(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, RelayError> {
        let state = self.state.lock().await;
        Ok(stale_outbox(&state, cutoff, limit).len())
    }

    async fn outbox_counts(&self) -> Result<OutboxCounts, RelayError> {
        let state = self.state.lock().await;
        let mut counts = OutboxCounts::default();
        for row in state.outbox.values() {
            match row.entry.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Locked => counts.locked += 1,
                OutboxStatus::Running => counts.running += 1,
                OutboxStatus::Done => counts.done += 1,
                OutboxStatus::Failed => counts.failed += 1,
                OutboxStatus::Dead => counts.dead += 1,
            }
        }
        Ok(counts)
    }
}

/// Leased entries with `locked_at < cutoff`, oldest lock first.
fn stale_outbox(state: &InMemoryState, cutoff: DateTime<Utc>, limit: usize) -> Vec<OutboxId> {
    let mut stale: Vec<(DateTime<Utc>, u64, OutboxId)> = state
        .outbox
        .values()
        .filter(|row| row.entry.status.is_leased())
        .filter_map(|row| {
            row.entry
                .locked_at
                .filter(|at| *at < cutoff)
                .map(|at| (at, row.seq, row.entry.id))
        })
        .collect();
    stale.sort();
    stale.truncate(limit);
    stale.into_iter().map(|(_, _, id)| id).collect()
}

/// RUNNING executions whose lease is older than `cutoff` (or already released).
fn stale_executions(state: &InMemoryState, cutoff: DateTime<Utc>, limit: usize) -> Vec<ExecutionId> {
    let mut stale: Vec<(Option<DateTime<Utc>>, u64, ExecutionId)> = state
        .executions
        .values()
        .filter(|row| row.execution.status == ExecutionStatus::Running)
        .filter(|row| row.execution.leased_at.is_none_or(|at| at < cutoff))
        .map(|row| (row.execution.leased_at, row.seq, row.execution.id))
        .collect();
    stale.sort();
    stale.truncate(limit);
    stale.into_iter().map(|(_, _, id)| id).collect()
}

#[async_trait]
impl DeadLetterStore for InMemoryStore {
    async fn replay(
        &self,
        id: DeadLetterId,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, RelayError> {
        let mut state = self.state.lock().await;

        let Some(dead_letter) = state.dead_letters.remove(&id) else {
            return Ok(None);
        };
        let Some(outbox_id) = dead_letter.outbox_id else {
            // Outbox row purged; nothing left to requeue.
            return Ok(None);
        };
        state.dead_letter_by_outbox.remove(&outbox_id);

        let entry = state.outbox_mut(outbox_id)?;
        entry.reset_for_replay(now);
        Ok(Some(entry.clone()))
    }

    async fn get_dead_letter(&self, id: DeadLetterId) -> Result<Option<DeadLetter>, RelayError> {
        let state = self.state.lock().await;
        Ok(state.dead_letters.get(&id).cloned())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, RelayError> {
        let state = self.state.lock().await;
        let mut all: Vec<DeadLetter> = state.dead_letters.values().cloned().collect();
        all.sort_by_key(|dl| (dl.created_at, dl.id));
        all.truncate(limit);
        Ok(all)
    }

    async fn dead_letter_count(&self) -> Result<usize, RelayError> {
        let state = self.state.lock().await;
        Ok(state.dead_letters.len())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(
        &self,
        execution: Execution,
        graph: Arc<CompiledGraph>,
    ) -> Result<ExecutionId, RelayError> {
        let mut state = self.state.lock().await;
        let origin = (execution.event_id, execution.automation_id, execution.workflow_version);
        if let Some(&existing) = state.execution_by_origin.get(&origin) {
            debug!(
                execution_id = %existing,
                event_id = %execution.event_id,
                automation_id = %execution.automation_id,
                "execution already exists for event"
            );
            return Ok(existing);
        }
        let id = execution.id;
        let seq = state.allocate_seq();
        state.execution_by_origin.insert(origin, id);
        state.executions.insert(
            execution.id,
            ExecutionRow {
                execution,
                graph,
                steps: Vec::new(),
                seq,
            },
        );
        Ok(id)
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, RelayError> {
        let state = self.state.lock().await;
        Ok(state.executions.get(&id).map(|row| row.execution.clone()))
    }

    async fn load_graph(&self, id: ExecutionId) -> Result<Option<Arc<CompiledGraph>>, RelayError> {
        let state = self.state.lock().await;
        Ok(state.executions.get(&id).map(|row| Arc::clone(&row.graph)))
    }

    async fn claim_execution(
        &self,
        id: ExecutionId,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Option<Execution>, RelayError> {
        let mut state = self.state.lock().await;
        let Some(row) = state.executions.get_mut(&id) else {
            return Ok(None);
        };
        let execution = &mut row.execution;
        if !execution.is_claimable(now, lease_ttl) {
            return Ok(None);
        }
        if let Some(previous) = &execution.lease_owner {
            warn!(
                execution_id = %id,
                worker_id = %worker,
                previous_owner = %previous,
                "stealing expired execution lease"
            );
        }
        execution.claim(worker.clone(), now);
        Ok(Some(execution.clone()))
    }

    async fn heartbeat_execution(
        &self,
        id: ExecutionId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        if !execution.is_leased_by(worker) {
            warn!(execution_id = %id, worker_id = %worker, "heartbeat from a worker without the lease");
            return Ok(());
        }
        execution.heartbeat(now);
        Ok(())
    }

    async fn append_step(&self, step: ExecutionStep) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        let row = state
            .executions
            .get_mut(&step.execution_id)
            .ok_or_else(|| RelayError::not_found("execution", step.execution_id))?;
        match row.steps.iter_mut().find(|s| s.step_id == step.step_id) {
            Some(existing) => *existing = step,
            None => row.steps.push(step),
        }
        Ok(())
    }

    async fn list_steps(&self, id: ExecutionId) -> Result<Vec<ExecutionStep>, RelayError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .get(&id)
            .map(|row| row.steps.clone())
            .unwrap_or_default())
    }

    async fn finish_execution(
        &self,
        id: ExecutionId,
        worker: &WorkerId,
        status: ExecutionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Execution, RelayError> {
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        check_execution_owner(execution, worker);
        execution.finish(status, error, now);
        Ok(execution.clone())
    }

    async fn release_execution(&self, id: ExecutionId, worker: &WorkerId) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        if execution.is_leased_by(worker) {
            execution.release();
        }
        Ok(())
    }

    async fn request_cancel(
        &self,
        id: ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>, RelayError> {
        let mut state = self.state.lock().await;
        let Some(row) = state.executions.get_mut(&id) else {
            return Ok(None);
        };
        let execution = &mut row.execution;
        match execution.status {
            ExecutionStatus::Queued => {
                execution.cancel_requested_at = Some(now);
                execution.finish(ExecutionStatus::Canceled, None, now);
            }
            ExecutionStatus::Running => {
                execution.cancel_requested_at.get_or_insert(now);
            }
            _ => {}
        }
        Ok(Some(execution.clone()))
    }

    async fn is_cancel_requested(&self, id: ExecutionId) -> Result<bool, RelayError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .get(&id)
            .is_some_and(|row| row.execution.cancel_requested_at.is_some()))
    }

    async fn list_runnable(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Vec<ExecutionId>, RelayError> {
        let state = self.state.lock().await;
        let mut runnable: Vec<(DateTime<Utc>, u64, ExecutionId)> = state
            .executions
            .values()
            .filter(|row| row.execution.is_claimable(now, lease_ttl))
            .map(|row| (row.execution.created_at, row.seq, row.execution.id))
            .collect();
        runnable.sort();
        runnable.truncate(limit);
        Ok(runnable.into_iter().map(|(_, _, id)| id).collect())
    }

    async fn reap_stale_executions(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, RelayError> {
        let mut state = self.state.lock().await;
        let stale = stale_executions(&state, cutoff, limit);

        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            let execution = state.execution_mut(id)?;
            execution.requeue();
            reaped.push(execution.clone());
        }
        Ok(reaped)
    }

    async fn count_stale_executions(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, RelayError> {
        let state = self.state.lock().await;
        Ok(stale_executions(&state, cutoff, limit).len())
    }

    async fn execution_counts(&self) -> Result<ExecutionCounts, RelayError> {
        let state = self.state.lock().await;
        let mut counts = ExecutionCounts::default();
        for row in state.executions.values() {
            match row.execution.status {
                ExecutionStatus::Queued => counts.queued += 1,
                ExecutionStatus::Running => counts.running += 1,
                ExecutionStatus::Success => counts.success += 1,
                ExecutionStatus::Failed => counts.failed += 1,
                ExecutionStatus::Canceled => counts.canceled += 1,
            }
        }
        Ok(counts)
    }
}
