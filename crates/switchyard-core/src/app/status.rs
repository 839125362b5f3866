//! Status - 運用向けの集計ビュー
//!
//! dead letter と件数だけが利用者に見える失敗面です。

use serde::Serialize;

use crate::domain::RelayError;
use crate::ports::{ExecutionCounts, OutboxCounts, RelayStore};

/// Health counts across the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub outbox: OutboxCounts,
    pub executions: ExecutionCounts,
    pub dead_letters: usize,
}

impl HealthReport {
    /// Outbox entries not yet in a terminal state.
    pub fn backlog(&self) -> usize {
        self.outbox.pending + self.outbox.locked + self.outbox.running + self.outbox.failed
    }
}

pub async fn health(store: &dyn RelayStore) -> Result<HealthReport, RelayError> {
    Ok(HealthReport {
        outbox: store.outbox_counts().await?,
        executions: store.execution_counts().await?,
        dead_letters: store.dead_letter_count().await?,
    })
}
