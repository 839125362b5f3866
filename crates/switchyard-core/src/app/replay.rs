//! Dead-letter replay.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::domain::{DeadLetterId, OutboxEntry, RelayError};
use crate::ports::{Clock, RelayStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub replayed: usize,
    /// Already gone when replayed (a concurrent replay won).
    pub missing: usize,
    pub failed: usize,
}

pub struct ReplayService {
    store: Arc<dyn RelayStore>,
    clock: Arc<dyn Clock>,
}

impl ReplayService {
    pub fn new(store: Arc<dyn RelayStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Resets the dead entry to PENDING. A missing id is a no-op (`Ok(None)`).
    pub async fn replay(&self, id: DeadLetterId) -> Result<Option<OutboxEntry>, RelayError> {
        let entry = self.store.replay(id, self.clock.now()).await?;
        match &entry {
            Some(entry) => info!(dead_letter_id = %id, outbox_id = %entry.id, "dead letter replayed"),
            None => info!(dead_letter_id = %id, "dead letter not found; nothing to replay"),
        }
        Ok(entry)
    }

    /// Replays up to `limit` dead letters, oldest first.
    pub async fn replay_all(&self, limit: usize) -> Result<ReplaySummary, RelayError> {
        let mut summary = ReplaySummary::default();
        for dead_letter in self.store.list_dead_letters(limit).await? {
            match self.replay(dead_letter.id).await {
                Ok(Some(_)) => summary.replayed += 1,
                Ok(None) => summary.missing += 1,
                Err(err) => {
                    error!(dead_letter_id = %dead_letter.id, error = %err, "replay failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}
