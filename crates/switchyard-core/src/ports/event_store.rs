//! EventStore port - Event と Outbox entry を同一単位で書き込む
//!
//! Ingestion はここを通ります。Event 単独の書き込み口は用意しません
//! （Outbox entry のない Event が存在しないように）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Event, EventId, NewEvent, OutboxId, RelayError};

/// Result of [`EventStore::append_with_outbox`].
#[derive(Debug, Clone, PartialEq)]
pub struct AppendedEvent {
    pub event: Event,
    pub outbox_id: OutboxId,
    /// `false` when the idempotency key matched an existing event.
    pub created: bool,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Writes the Event and its PENDING Outbox entry as one unit.
    ///
    /// If `(tenant_id, idempotency_key)` already exists the existing event is
    /// returned and nothing is written.
    async fn append_with_outbox(
        &self,
        event: NewEvent,
        now: DateTime<Utc>,
    ) -> Result<AppendedEvent, RelayError>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, RelayError>;
}
