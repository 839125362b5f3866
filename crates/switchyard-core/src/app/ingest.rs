//! Ingestion: the only way an Event (and its Outbox entry) enters the relay.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{EventId, NewEvent, OutboxId, RelayError};
use crate::ports::{Clock, RelayStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Accepted,
    /// Idempotency key already seen for this tenant.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub event_id: EventId,
    pub outbox_id: OutboxId,
    pub status: IngestStatus,
}

pub struct Ingestor {
    store: Arc<dyn RelayStore>,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RelayStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn ingest_event(&self, event: NewEvent) -> Result<IngestReceipt, RelayError> {
        let appended = self.store.append_with_outbox(event, self.clock.now()).await?;
        let status = if appended.created {
            info!(
                event_id = %appended.event.id,
                outbox_id = %appended.outbox_id,
                tenant_id = %appended.event.tenant_id,
                event_type = %appended.event.event_type,
                "event ingested"
            );
            IngestStatus::Accepted
        } else {
            debug!(event_id = %appended.event.id, "duplicate ingestion returned existing event");
            IngestStatus::Duplicate
        };
        Ok(IngestReceipt {
            event_id: appended.event.id,
            outbox_id: appended.outbox_id,
            status,
        })
    }
}
