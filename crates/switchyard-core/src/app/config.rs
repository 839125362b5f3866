//! Relay configuration loaded from environment variables.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

use crate::app::retry::RetryPolicy;
use crate::domain::WorkerId;

pub const ENV_PREFIX: &str = "SWITCHYARD_";

/// Upper bound for every configured duration (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the reaper does with a stale lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaperMode {
    /// Back to PENDING.
    #[default]
    Pending,
    /// FAILED with `next_attempt_at = now + reaper_retry_delay_secs`.
    Retry,
}

/// Relay configuration.
///
/// Environment variables are prefixed with `SWITCHYARD_`:
/// - `SWITCHYARD_WORKER_ID`: lease owner name (default: generated `worker-<ulid>`)
/// - `SWITCHYARD_BATCH_SIZE`: outbox entries claimed per tick (default: 50)
/// - `SWITCHYARD_LOCK_TTL_SECS`: outbox lock / execution lease TTL (default: 60)
/// - `SWITCHYARD_MAX_ATTEMPTS`: dispatch attempts before dead-lettering (default: 3)
/// - `SWITCHYARD_BACKOFF_*`: retry backoff (base 1000ms, x2.0, max 300s, jitter 0.2)
/// - `SWITCHYARD_POLL_INTERVAL_MS`: loop tick interval (default: 1000)
/// - `SWITCHYARD_EXECUTION_BATCH_SIZE`: executions run per tick (default: 10)
/// - `SWITCHYARD_REAPER_*`: reaper interval, threshold, batch, delay and action
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub worker_id: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Fraction of the delay added or removed at random (0.2 = +-20%).
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_execution_batch_size")]
    pub execution_batch_size: usize,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Extra grace on top of the lease TTL before the reaper steps in.
    #[serde(default = "default_reaper_stale_threshold_secs")]
    pub reaper_stale_threshold_secs: u64,

    #[serde(default = "default_reaper_max_batch")]
    pub reaper_max_batch: usize,

    #[serde(default = "default_reaper_retry_delay_secs")]
    pub reaper_retry_delay_secs: u64,

    #[serde(default)]
    pub reaper_action: ReaperMode,
}

fn default_batch_size() -> usize {
    50
}

fn default_lock_ttl_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_execution_batch_size() -> usize {
    10
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_reaper_stale_threshold_secs() -> u64 {
    300
}

fn default_reaper_max_batch() -> usize {
    100
}

fn default_reaper_retry_delay_secs() -> u64 {
    60
}

impl RelayConfig {
    /// Load configuration from `SWITCHYARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = envy::prefixed(ENV_PREFIX).from_env::<RelayConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`from_env`](Self::from_env) over explicit `(KEY, value)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX).from_iter::<_, RelayConfig>(pairs)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0");
        }
        if self.execution_batch_size == 0 {
            return invalid("execution_batch_size must be > 0");
        }
        if self.reaper_max_batch == 0 {
            return invalid("reaper_max_batch must be > 0");
        }
        if self.lock_ttl_secs == 0 {
            return invalid("lock_ttl_secs must be > 0");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be > 0");
        }
        if self.poll_interval_ms == 0 || self.reaper_interval_secs == 0 {
            return invalid("loop intervals must be > 0");
        }
        let durations = [
            ("lock_ttl_secs", self.lock_ttl_secs),
            ("backoff_base_ms", self.backoff_base_ms / 1000),
            ("backoff_max_secs", self.backoff_max_secs),
            ("reaper_interval_secs", self.reaper_interval_secs),
            ("reaper_stale_threshold_secs", self.reaper_stale_threshold_secs),
            ("reaper_retry_delay_secs", self.reaper_retry_delay_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, secs)| *secs > MAX_DURATION_SECS) {
            return Err(ConfigError::Invalid(format!(
                "{name} must be at most {MAX_DURATION_SECS} seconds"
            )));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return invalid("backoff_multiplier must be >= 1.0");
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return invalid("backoff_jitter must be in [0, 1)");
        }
        Ok(())
    }

    /// Configured worker id, or a generated one.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(WorkerId::new)
            .unwrap_or_else(WorkerId::generate)
    }

    pub fn lock_ttl(&self) -> Duration {
        seconds(self.lock_ttl_secs)
    }

    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.poll_interval_ms)
    }

    pub fn reaper_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.reaper_interval_secs)
    }

    pub fn reaper_stale_threshold(&self) -> Duration {
        seconds(self.reaper_stale_threshold_secs)
    }

    pub fn reaper_retry_delay(&self) -> Duration {
        seconds(self.reaper_retry_delay_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::milliseconds(self.backoff_base_ms.min(MAX_DURATION_SECS * 1000) as i64),
            multiplier: self.backoff_multiplier,
            max_delay: seconds(self.backoff_max_secs),
            jitter: self.backoff_jitter,
            max_attempts: self.max_attempts,
        }
    }
}

/// Seconds clamped to `MAX_DURATION_SECS`.
fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECS) as i64)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            batch_size: default_batch_size(),
            lock_ttl_secs: default_lock_ttl_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_secs: default_backoff_max_secs(),
            backoff_jitter: default_backoff_jitter(),
            poll_interval_ms: default_poll_interval_ms(),
            execution_batch_size: default_execution_batch_size(),
            reaper_interval_secs: default_reaper_interval_secs(),
            reaper_stale_threshold_secs: default_reaper_stale_threshold_secs(),
            reaper_max_batch: default_reaper_max_batch(),
            reaper_retry_delay_secs: default_reaper_retry_delay_secs(),
            reaper_action: ReaperMode::default(),
        }
    }
}
