//! ExecutionStore port - Execution の lease と step 履歴
//!
//! Execution は作成時にコンパイル済みグラフのスナップショットを受け取り、
//! 以後そのグラフだけで実行されます（workflow の live 切り替えの影響を受けない）。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{Execution, ExecutionId, ExecutionStatus, ExecutionStep, RelayError, WorkerId};
use crate::graph::CompiledGraph;

/// Execution totals per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutionCounts {
    pub queued: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub canceled: usize,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Get-or-create on `(event_id, automation_id, workflow_version)`.
    /// Returns the id of the stored execution, which is the existing one when
    /// the event was already dispatched to this workflow version.
    async fn create_execution(
        &self,
        execution: Execution,
        graph: Arc<CompiledGraph>,
    ) -> Result<ExecutionId, RelayError>;

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, RelayError>;

    async fn load_graph(&self, id: ExecutionId) -> Result<Option<Arc<CompiledGraph>>, RelayError>;

    /// Atomically moves a QUEUED execution (or a RUNNING one whose lease is
    /// older than `lease_ttl`) to RUNNING under `worker`.
    ///
    /// `None` when the execution is missing, terminal, or leased elsewhere.
    async fn claim_execution(
        &self,
        id: ExecutionId,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Option<Execution>, RelayError>;

    /// Refreshes `leased_at`.
    async fn heartbeat_execution(
        &self,
        id: ExecutionId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError>;

    /// One record per `(execution_id, step_id)`; a re-run after a lease steal
    /// replaces the earlier record.
    async fn append_step(&self, step: ExecutionStep) -> Result<(), RelayError>;

    /// In traversal order.
    async fn list_steps(&self, id: ExecutionId) -> Result<Vec<ExecutionStep>, RelayError>;

    /// Terminal transition; clears the lease.
    async fn finish_execution(
        &self,
        id: ExecutionId,
        worker: &WorkerId,
        status: ExecutionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Execution, RelayError>;

    /// Clears the lease without a status change (the execution becomes
    /// claimable again). No-op unless `worker` holds it.
    async fn release_execution(&self, id: ExecutionId, worker: &WorkerId) -> Result<(), RelayError>;

    /// QUEUED -> CANCELED immediately; RUNNING records the request for the
    /// next step boundary; terminal executions are left alone.
    async fn request_cancel(
        &self,
        id: ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>, RelayError>;

    async fn is_cancel_requested(&self, id: ExecutionId) -> Result<bool, RelayError>;

    /// Ids a worker could claim right now, oldest first.
    async fn list_runnable(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Vec<ExecutionId>, RelayError>;

    /// Returns up to `limit` RUNNING executions with `leased_at < cutoff` to QUEUED.
    async fn reap_stale_executions(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, RelayError>;

    async fn count_stale_executions(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, RelayError>;

    async fn execution_counts(&self) -> Result<ExecutionCounts, RelayError>;
}
