//! DeadLetterStore port - 永久失敗の記録と replay

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DeadLetter, DeadLetterId, OutboxEntry, RelayError};

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Resets the linked Outbox entry to a fresh PENDING entry and deletes the
    /// DeadLetter, as one unit.
    ///
    /// Missing id: `Ok(None)`, nothing changes.
    async fn replay(
        &self,
        id: DeadLetterId,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, RelayError>;

    async fn get_dead_letter(&self, id: DeadLetterId) -> Result<Option<DeadLetter>, RelayError>;

    /// Oldest first.
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, RelayError>;

    async fn dead_letter_count(&self) -> Result<usize, RelayError>;
}
