//! Execution model: one run of a workflow version for one event.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AutomationId, EventId, ExecutionId, WorkerId};

/// Execution status.
///
/// - Queued -> Running -> {Success | Failed | Canceled}
/// - Queued -> Canceled (cancel requested before any worker claimed it)
/// - Running -> Running (lease stolen after TTL, or handed back by the reaper via Queued)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Success,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub tenant_id: String,
    pub event_id: EventId,
    pub automation_id: AutomationId,
    /// Snapshot taken at creation. Never changes afterwards.
    pub workflow_version: u32,
    pub status: ExecutionStatus,

    pub lease_owner: Option<WorkerId>,
    pub leased_at: Option<DateTime<Utc>>,
    pub cancel_requested_at: Option<DateTime<Utc>>,

    /// Redacted.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn queued(
        id: ExecutionId,
        tenant_id: impl Into<String>,
        event_id: EventId,
        automation_id: AutomationId,
        workflow_version: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id: tenant_id.into(),
            event_id,
            automation_id,
            workflow_version,
            status: ExecutionStatus::Queued,
            lease_owner: None,
            leased_at: None,
            cancel_requested_at: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Queued, or Running with a lease older than `lease_ttl`.
    pub fn is_claimable(&self, now: DateTime<Utc>, lease_ttl: Duration) -> bool {
        match self.status {
            ExecutionStatus::Queued => true,
            ExecutionStatus::Running => self.leased_at.is_none_or(|at| now - at > lease_ttl),
            _ => false,
        }
    }

    pub fn is_leased_by(&self, worker: &WorkerId) -> bool {
        self.status == ExecutionStatus::Running && self.lease_owner.as_ref() == Some(worker)
    }

    pub fn claim(&mut self, owner: WorkerId, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.lease_owner = Some(owner);
        self.leased_at = Some(now);
        // Keep the first start time across steals.
        self.started_at.get_or_insert(now);
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.leased_at = Some(now);
    }

    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(now);
        self.release();
    }

    pub fn release(&mut self) {
        self.lease_owner = None;
        self.leased_at = None;
    }

    /// Reaper: hand an orphaned run back to the queue.
    pub fn requeue(&mut self) {
        self.status = ExecutionStatus::Queued;
        self.release();
    }
}

/// Step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
}

/// One record per visited node. All payloads are stored redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub execution_id: ExecutionId,
    pub step_id: String,
    pub step_type: String,
    pub status: StepStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
