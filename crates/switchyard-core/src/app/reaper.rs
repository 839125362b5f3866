//! Reaper - 期限切れ lease の定期回収
//!
//! claim_batch の lock stealing とは独立に動きます。
//! `lease_ttl + stale_threshold` より古い lease を持つ outbox entry と
//! RUNNING の Execution を解放します。
//!
//! # フロー
//! 1. cutoff = now - (lease_ttl + stale_threshold)
//! 2. dry_run なら件数だけ数える
//! 3. outbox: PENDING に戻す、または FAILED + next_attempt_at
//! 4. execution: QUEUED に戻す

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::app::config::{ReaperMode, RelayConfig};
use crate::domain::{ExecutionId, OutboxId, RelayError};
use crate::ports::{Clock, RelayStore, StaleLeaseAction};

#[derive(Debug, Clone, PartialEq)]
pub struct ReaperSettings {
    pub lease_ttl: Duration,
    pub stale_threshold: Duration,
    /// Per kind (outbox entries, executions) per run.
    pub max_batch: usize,
    pub mode: ReaperMode,
    /// Used in `ReaperMode::Retry`.
    pub retry_delay: Duration,
}

impl ReaperSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            lease_ttl: config.lock_ttl(),
            stale_threshold: config.reaper_stale_threshold(),
            max_batch: config.reaper_max_batch,
            mode: config.reaper_action,
            retry_delay: config.reaper_retry_delay(),
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - (self.lease_ttl + self.stale_threshold)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub dry_run: bool,
    /// Entries released (or that would be, in dry-run).
    pub outbox: usize,
    pub executions: usize,
    /// Empty in dry-run.
    pub outbox_ids: Vec<OutboxId>,
    pub execution_ids: Vec<ExecutionId>,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.outbox + self.executions
    }
}

pub struct Reaper {
    store: Arc<dyn RelayStore>,
    clock: Arc<dyn Clock>,
    settings: ReaperSettings,
}

impl Reaper {
    pub fn new(store: Arc<dyn RelayStore>, clock: Arc<dyn Clock>, settings: ReaperSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ReaperSettings {
        &self.settings
    }

    pub async fn reap(&self, dry_run: bool) -> Result<ReapReport, RelayError> {
        let now = self.clock.now();
        let cutoff = self.settings.cutoff(now);
        let limit = self.settings.max_batch;

        if dry_run {
            let report = ReapReport {
                dry_run: true,
                outbox: self.store.count_stale_outbox(cutoff, limit).await?,
                executions: self.store.count_stale_executions(cutoff, limit).await?,
                ..ReapReport::default()
            };
            info!(
                cutoff = %cutoff,
                outbox = report.outbox,
                executions = report.executions,
                "reaper dry run"
            );
            return Ok(report);
        }

        let action = match self.settings.mode {
            ReaperMode::Pending => StaleLeaseAction::Reset,
            ReaperMode::Retry => StaleLeaseAction::RetryAt(now + self.settings.retry_delay),
        };
        let outbox = self.store.reap_stale_outbox(cutoff, action, limit, now).await?;
        let executions = self.store.reap_stale_executions(cutoff, limit).await?;

        let report = ReapReport {
            dry_run: false,
            outbox: outbox.len(),
            executions: executions.len(),
            outbox_ids: outbox.iter().map(|entry| entry.id).collect(),
            execution_ids: executions.iter().map(|execution| execution.id).collect(),
        };
        if report.total() > 0 {
            info!(
                cutoff = %cutoff,
                mode = ?self.settings.mode,
                outbox = report.outbox,
                executions = report.executions,
                "reaped stale leases"
            );
        } else {
            debug!(cutoff = %cutoff, "reaper found nothing stale");
        }
        Ok(report)
    }
}
