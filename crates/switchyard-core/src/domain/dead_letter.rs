//! Dead letters: terminal record of an outbox entry that ran out of attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DeadLetterId, OutboxId};

/// Why an entry was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MaxAttemptsExceeded,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::MaxAttemptsExceeded => "max_attempts_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: DeadLetterId,
    /// `None` once the outbox row is purged.
    pub outbox_id: Option<OutboxId>,
    pub reason_code: ReasonCode,
    pub last_error_redacted: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}
