//! OutboxStore port - claim / lease プロトコルの正本
//!
//! # 設計原則
//! - `claim_batch` だけが真の atomic 操作を必要とする
//! - mark_* は 1 entry 単位の atomic 更新（mark_dead は DeadLetter 作成も含む）
//! - fencing token は持たない: lease を失った worker の書き込みも適用し、
//!   不一致は warn ログに残すだけ（at-least-once）

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{DeadLetter, OutboxEntry, OutboxId, RelayError, WorkerId};

/// What the reaper does with a stale lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleLeaseAction {
    /// Back to PENDING.
    Reset,
    /// FAILED with `next_attempt_at` set to the given instant.
    RetryAt(DateTime<Utc>),
}

/// Outbox totals per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub locked: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub dead: usize,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically selects and locks up to `limit` claimable entries.
    ///
    /// Claimable: PENDING; LOCKED/RUNNING with `now - locked_at > lock_ttl`;
    /// FAILED with `next_attempt_at <= now`. Ordered by next-eligible time,
    /// ties by insertion order. Returns the updated rows.
    async fn claim_batch(
        &self,
        limit: usize,
        worker: &WorkerId,
        now: DateTime<Utc>,
        lock_ttl: Duration,
    ) -> Result<Vec<OutboxEntry>, RelayError>;

    async fn mark_done(
        &self,
        id: OutboxId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry, RelayError>;

    /// Counts one attempt and schedules the next.
    async fn mark_failed(
        &self,
        id: OutboxId,
        worker: &WorkerId,
        error: String,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry, RelayError>;

    /// Counts the final attempt, marks the entry DEAD and creates its
    /// DeadLetter in the same unit. Returns the existing DeadLetter if the
    /// entry is already dead.
    async fn mark_dead(
        &self,
        id: OutboxId,
        worker: &WorkerId,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<DeadLetter, RelayError>;

    async fn get_outbox(&self, id: OutboxId) -> Result<Option<OutboxEntry>, RelayError>;

    /// Releases up to `limit` LOCKED/RUNNING entries with `locked_at < cutoff`.
    async fn reap_stale_outbox(
        &self,
        cutoff: DateTime<Utc>,
        action: StaleLeaseAction,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, RelayError>;

    /// Dry-run counterpart of `reap_stale_outbox` (capped at `limit`).
    async fn count_stale_outbox(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, RelayError>;

    async fn outbox_counts(&self) -> Result<OutboxCounts, RelayError>;
}
