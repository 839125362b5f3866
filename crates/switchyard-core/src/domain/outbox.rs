//! Outbox entry: relay status + lease columns for one Event.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, OutboxId, WorkerId};

/// Outbox entry status.
///
/// State transitions:
/// - Pending -> Locked -> Done
/// - Pending -> Locked -> Failed -> Locked ... (after next_attempt_at)
/// - Pending -> Locked -> Dead (attempts >= max_attempts)
/// - Locked -> Locked (lock stealing, only once locked_at is older than the TTL)
/// - Dead -> Pending (explicit replay only)
///
/// `Running` is a leased status like `Locked`. The dispatcher never enters it,
/// but claim and reaper treat it as held so rows written by other relay
/// producers are recovered the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Locked,
    Running,
    Done,
    Failed,
    Dead,
}

impl OutboxStatus {
    /// No further transitions (Dead only leaves via replay).
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Done | OutboxStatus::Dead)
    }

    /// Holds an advisory lease (lock_owner + locked_at).
    pub fn is_leased(self) -> bool {
        matches!(self, OutboxStatus::Locked | OutboxStatus::Running)
    }
}

/// Metadata + lease columns for one relay entry.
///
/// The store is the single source of truth; every transition goes through the
/// methods below so the lease fields never drift from the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub event_id: EventId,
    pub tenant_id: String,
    pub status: OutboxStatus,

    pub lock_owner: Option<WorkerId>,
    pub locked_at: Option<DateTime<Utc>>,

    /// Failed dispatch attempts so far.
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Already redacted.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(id: OutboxId, event_id: EventId, tenant_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            event_id,
            tenant_id: tenant_id.into(),
            status: OutboxStatus::Pending,
            lock_owner: None,
            locked_at: None,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// When this entry becomes (or became) claimable, or `None` if it is not
    /// claimable at `now`.
    ///
    /// - Pending: since creation
    /// - Locked/Running: once `now - locked_at > lock_ttl`
    /// - Failed: once `next_attempt_at <= now`
    pub fn claimable_since(&self, now: DateTime<Utc>, lock_ttl: Duration) -> Option<DateTime<Utc>> {
        match self.status {
            OutboxStatus::Pending => Some(self.created_at),
            OutboxStatus::Locked | OutboxStatus::Running => {
                let locked_at = self.locked_at?;
                (now - locked_at > lock_ttl).then_some(locked_at + lock_ttl)
            }
            OutboxStatus::Failed => {
                let due = self.next_attempt_at.unwrap_or(self.updated_at);
                (due <= now).then_some(due)
            }
            OutboxStatus::Done | OutboxStatus::Dead => None,
        }
    }

    /// Whether `worker` still holds a live lease at `now`.
    pub fn is_locked_by(&self, worker: &WorkerId, now: DateTime<Utc>, lock_ttl: Duration) -> bool {
        self.status.is_leased()
            && self.lock_owner.as_ref() == Some(worker)
            && self.locked_at.is_some_and(|at| now - at <= lock_ttl)
    }

    pub fn lock(&mut self, owner: WorkerId, now: DateTime<Utc>) {
        self.status = OutboxStatus::Locked;
        self.lock_owner = Some(owner);
        self.locked_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_done(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Done;
        self.clear_lock();
        self.updated_at = now;
    }

    /// Records one failed attempt and schedules the next one.
    pub fn mark_failed(&mut self, error: String, next_attempt_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.attempts += 1;
        self.status = OutboxStatus::Failed;
        self.next_attempt_at = Some(next_attempt_at);
        self.last_error = Some(error);
        self.clear_lock();
        self.updated_at = now;
    }

    /// Records the final failed attempt.
    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.attempts += 1;
        self.status = OutboxStatus::Dead;
        self.next_attempt_at = None;
        self.last_error = Some(error);
        self.clear_lock();
        self.updated_at = now;
    }

    /// Reaper: give a stale lease back without counting an attempt.
    pub fn release_stale(&mut self, retry_at: Option<DateTime<Utc>>, note: String, now: DateTime<Utc>) {
        match retry_at {
            Some(at) => {
                self.status = OutboxStatus::Failed;
                self.next_attempt_at = Some(at);
            }
            None => {
                self.status = OutboxStatus::Pending;
                self.next_attempt_at = None;
            }
        }
        self.last_error = Some(note);
        self.clear_lock();
        self.updated_at = now;
    }

    /// Replay: back to a fresh Pending entry. The only place attempts goes down.
    pub fn reset_for_replay(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Pending;
        self.attempts = 0;
        self.next_attempt_at = None;
        self.clear_lock();
        self.updated_at = now;
    }

    fn clear_lock(&mut self) {
        self.lock_owner = None;
        self.locked_at = None;
    }
}
