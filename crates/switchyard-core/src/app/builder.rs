//! RelayBuilder - relay の構築とワイヤリング
//!
//! - Builder パターンで collaborator と step executor を集める
//! - 起動時検証（Fail-fast）: 期待する step type が全て登録済みか、設定が妥当か
//! - build() 後の registry は不変（Arc で共有、ロックなし）

use std::sync::Arc;

use crate::app::config::{ConfigError, RelayConfig};
use crate::app::dispatcher::{Dispatcher, ProcessedEntry};
use crate::app::engine::{ExecutionEngine, RunSummary};
use crate::app::ingest::{IngestReceipt, Ingestor};
use crate::app::reaper::{ReapReport, Reaper, ReaperSettings};
use crate::app::registry::{ExecutorRegistry, RegistryError};
use crate::app::replay::{ReplayService, ReplaySummary};
use crate::app::status::{self, HealthReport};
use crate::domain::{
    DeadLetterId, Execution, ExecutionId, NewEvent, OutboxEntry, RelayError, WorkerId,
};
use crate::impls::executors::{FILTER, PASSTHROUGH};
use crate::impls::{FilterExecutor, InMemoryStore, PassthroughExecutor};
use crate::ports::{
    Clock, IdGenerator, RelayStore, StepExecutor, SystemClock, TriggerMatcher, UlidGenerator,
    WorkflowResolver,
};

/// BuildError は relay 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing step types: {0:?}. These step types were expected but not registered.")]
    MissingStepTypes(Vec<String>),

    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// RelayBuilder は Relay を構築
///
/// # 使用例
/// ```ignore
/// let relay = RelayBuilder::new(RelayConfig::from_env()?)
///     .triggers(Arc::new(StaticTriggerMatcher::new(triggers)))
///     .workflows(catalog.clone())
///     .with_builtin_executors()?
///     .expect_step_types(&["passthrough", "filter"])
///     .build()?;
/// ```
///
/// 省略時の既定値:
/// - clock: `SystemClock`
/// - ids: clock を使う `UlidGenerator`
/// - store: `InMemoryStore`
pub struct RelayBuilder {
    config: RelayConfig,
    registry: ExecutorRegistry,
    expected_step_types: Option<Vec<String>>,
    store: Option<Arc<dyn RelayStore>>,
    triggers: Option<Arc<dyn TriggerMatcher>>,
    workflows: Option<Arc<dyn WorkflowResolver>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl RelayBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: ExecutorRegistry::new(),
            expected_step_types: None,
            store: None,
            triggers: None,
            workflows: None,
            clock: None,
            ids: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn RelayStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn triggers(mut self, triggers: Arc<dyn TriggerMatcher>) -> Self {
        self.triggers = Some(triggers);
        self
    }

    pub fn workflows(mut self, workflows: Arc<dyn WorkflowResolver>) -> Self {
        self.workflows = Some(workflows);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Step executor を登録
    pub fn register(
        mut self,
        step_type: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(step_type, executor)?;
        Ok(self)
    }

    /// `passthrough` と `filter` を登録
    pub fn with_builtin_executors(self) -> Result<Self, RegistryError> {
        self.register(PASSTHROUGH, Arc::new(PassthroughExecutor))?
            .register(FILTER, Arc::new(FilterExecutor))
    }

    /// 期待される step type のリストを設定（build() で検証）
    pub fn expect_step_types(mut self, step_types: &[&str]) -> Self {
        self.expected_step_types = Some(step_types.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Relay, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_step_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|step_type| !self.registry.contains(step_type))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingStepTypes(missing));
            }
        }

        let triggers = self.triggers.ok_or(BuildError::MissingComponent("trigger matcher"))?;
        let workflows = self.workflows.ok_or(BuildError::MissingComponent("workflow resolver"))?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let store: Arc<dyn RelayStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new(Arc::clone(&ids))));
        let registry = Arc::new(self.registry);
        let config = self.config;
        let lock_ttl = config.lock_ttl();

        Ok(Relay {
            worker_id: config.worker_id(),
            ingestor: Ingestor::new(Arc::clone(&store), Arc::clone(&clock)),
            dispatcher: Dispatcher::new(
                Arc::clone(&store),
                triggers,
                workflows,
                Arc::clone(&registry),
                ids,
                Arc::clone(&clock),
                config.retry_policy(),
                lock_ttl,
            ),
            engine: ExecutionEngine::new(Arc::clone(&store), registry, Arc::clone(&clock), lock_ttl),
            reaper: Reaper::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                ReaperSettings::from_config(&config),
            ),
            replay: ReplayService::new(Arc::clone(&store), Arc::clone(&clock)),
            store,
            clock,
            config,
        })
    }
}

/// Relay は構築済みのランタイム
///
/// 各メソッドは 1 回分の処理（tick）だけを行う薄いラッパーです。
/// 定期実行は `WorkerGroup` が担当します。
pub struct Relay {
    config: RelayConfig,
    worker_id: WorkerId,
    store: Arc<dyn RelayStore>,
    clock: Arc<dyn Clock>,
    ingestor: Ingestor,
    dispatcher: Dispatcher,
    engine: ExecutionEngine,
    reaper: Reaper,
    replay: ReplayService,
}

impl Relay {
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn store(&self) -> &Arc<dyn RelayStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub async fn ingest_event(&self, event: NewEvent) -> Result<IngestReceipt, RelayError> {
        self.ingestor.ingest_event(event).await
    }

    /// One dispatcher pass of `batch_size` entries as this relay's worker.
    pub async fn dispatch_tick(&self) -> Result<Vec<ProcessedEntry>, RelayError> {
        self.dispatcher
            .dispatch_batch(self.config.batch_size, &self.worker_id)
            .await
    }

    pub async fn run_executions_tick(&self) -> Result<RunSummary, RelayError> {
        self.engine
            .run_pending(self.config.execution_batch_size, &self.worker_id)
            .await
    }

    pub async fn reap(&self, dry_run: bool) -> Result<ReapReport, RelayError> {
        self.reaper.reap(dry_run).await
    }

    pub async fn replay(&self, id: DeadLetterId) -> Result<Option<OutboxEntry>, RelayError> {
        self.replay.replay(id).await
    }

    /// Replays every dead letter present when called.
    pub async fn replay_all(&self) -> Result<ReplaySummary, RelayError> {
        self.replay.replay_all(usize::MAX).await
    }

    pub async fn request_cancel(&self, id: ExecutionId) -> Result<Option<Execution>, RelayError> {
        let execution = self.store.request_cancel(id, self.clock.now()).await?;
        if let Some(execution) = &execution {
            tracing::info!(execution_id = %id, status = ?execution.status, "cancellation requested");
        }
        Ok(execution)
    }

    pub async fn health(&self) -> Result<HealthReport, RelayError> {
        status::health(self.store.as_ref()).await
    }
}
