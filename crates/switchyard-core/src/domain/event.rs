//! Event model: the immutable input of the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EventId;

/// An ingested event. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub tenant_id: String,
    pub event_type: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Ingestion request. The store assigns the id and pairs it with an Outbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub tenant_id: String,
    pub event_type: String,
    pub source: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl NewEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            event_type: event_type.into(),
            source: source.into(),
            payload,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn into_event(self, id: EventId, occurred_at: DateTime<Utc>) -> Event {
        Event {
            id,
            tenant_id: self.tenant_id,
            event_type: self.event_type,
            source: self.source,
            payload: self.payload,
            occurred_at,
            idempotency_key: self.idempotency_key,
        }
    }
}
