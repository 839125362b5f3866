//! StaticTriggerMatcher - 起動時に与えた TriggerSpec の一覧で照合する

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Event, RelayError, TriggerSpec};
use crate::ports::TriggerMatcher;

/// Trigger list held in memory. Triggers can be added while running.
#[derive(Default)]
pub struct StaticTriggerMatcher {
    triggers: RwLock<Vec<TriggerSpec>>,
}

impl StaticTriggerMatcher {
    pub fn new(triggers: Vec<TriggerSpec>) -> Self {
        Self {
            triggers: RwLock::new(triggers),
        }
    }

    pub async fn add(&self, trigger: TriggerSpec) {
        self.triggers.write().await.push(trigger);
    }
}

#[async_trait]
impl TriggerMatcher for StaticTriggerMatcher {
    async fn matches(&self, event: &Event) -> Result<Vec<TriggerSpec>, RelayError> {
        let triggers = self.triggers.read().await;
        Ok(triggers.iter().filter(|t| t.matches(event)).cloned().collect())
    }
}
