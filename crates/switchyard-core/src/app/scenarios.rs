//! End-to-end relay scenarios over the in-memory store with a FixedClock.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::Notify;
use ulid::Ulid;

use crate::app::builder::{Relay, RelayBuilder};
use crate::app::config::{ReaperMode, RelayConfig};
use crate::app::dispatcher::DispatchOutcome;
use crate::app::engine::{RunOutcome, RunSummary};
use crate::domain::{
    AutomationId, Event, EventId, Execution, ExecutionId, ExecutionStatus, ExecutionStep, NewEvent,
    OutboxEntry, OutboxId, OutboxStatus, RelayError, StepError, StepStatus, TriggerSpec, WorkerId,
};
use crate::graph::{CompiledGraph, NodeSpec, WorkflowDocument};
use crate::impls::{InMemoryStore, InMemoryWorkflowCatalog, StaticTriggerMatcher};
use crate::ports::{
    Clock, DeadLetterStore, ExecutionStore, FixedClock, OutboxStore, StepContext, StepExecutor,
    TriggerMatcher, UlidGenerator,
};

const TENANT: &str = "acme";
const EVENT_TYPE: &str = "order.created";

struct Harness {
    relay: Arc<Relay>,
    store: Arc<InMemoryStore>,
    catalog: Arc<InMemoryWorkflowCatalog>,
    clock: Arc<FixedClock>,
    automation: AutomationId,
}

struct HarnessBuilder {
    config: RelayConfig,
    store: Arc<InMemoryStore>,
    clock: Arc<FixedClock>,
    automation: AutomationId,
    triggers: Option<Arc<dyn TriggerMatcher>>,
    extra_triggers: Vec<TriggerSpec>,
    executors: Vec<(&'static str, Arc<dyn StepExecutor>)>,
}

impl HarnessBuilder {
    fn new() -> Self {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
        Self {
            config: RelayConfig {
                worker_id: Some("relay-1".into()),
                backoff_jitter: 0.0,
                ..RelayConfig::default()
            },
            store: Arc::new(InMemoryStore::new(Arc::new(UlidGenerator::new(Arc::clone(&clock))))),
            clock,
            automation: AutomationId::from_ulid(Ulid::new()),
            triggers: None,
            extra_triggers: Vec::new(),
            executors: Vec::new(),
        }
    }

    fn triggers(mut self, triggers: Arc<dyn TriggerMatcher>) -> Self {
        self.triggers = Some(triggers);
        self
    }

    fn also_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.extra_triggers.push(trigger);
        self
    }

    fn executor(mut self, step_type: &'static str, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.push((step_type, executor));
        self
    }

    fn build(self) -> Harness {
        let catalog = Arc::new(InMemoryWorkflowCatalog::new());
        let automation = self.automation;

        let triggers = self.triggers.unwrap_or_else(|| {
            let mut specs = vec![TriggerSpec::new(automation, TENANT, EVENT_TYPE)];
            specs.extend(self.extra_triggers);
            Arc::new(StaticTriggerMatcher::new(specs))
        });

        let mut builder = RelayBuilder::new(self.config)
            .store(self.store.clone())
            .clock(self.clock.clone())
            .triggers(triggers)
            .workflows(catalog.clone())
            .with_builtin_executors()
            .unwrap();
        for (step_type, executor) in self.executors {
            builder = builder.register(step_type, executor).unwrap();
        }

        Harness {
            relay: Arc::new(builder.build().unwrap()),
            store: self.store,
            catalog,
            clock: self.clock,
            automation,
        }
    }
}

impl Harness {
    async fn ingest(&self, payload: Value) -> OutboxId {
        self.relay
            .ingest_event(NewEvent::new(TENANT, EVENT_TYPE, "shop", payload))
            .await
            .unwrap()
            .outbox_id
    }

    async fn publish_live(&self, nodes: Vec<NodeSpec>) -> u32 {
        self.catalog
            .publish_live(self.automation, WorkflowDocument::new(nodes))
            .await
    }

    async fn entry(&self, id: OutboxId) -> OutboxEntry {
        self.store.get_outbox(id).await.unwrap().unwrap()
    }
}

/// Returns a fixed output carrying a secret.
struct LeakyExecutor;

#[async_trait]
impl StepExecutor for LeakyExecutor {
    async fn execute(&self, _config: &Value, _inputs: &Value, _ctx: &StepContext) -> Result<Value, StepError> {
        Ok(json!({"token": "s3cr3t-output", "user": "bob"}))
    }
}

/// Always fails with a credential in the message.
struct BrokenUpstream;

#[async_trait]
impl StepExecutor for BrokenUpstream {
    async fn execute(&self, _config: &Value, _inputs: &Value, _ctx: &StepContext) -> Result<Value, StepError> {
        Err(StepError::Failed(
            "upstream rejected Authorization: Bearer abc.def.ghi (api_key=live-123)".into(),
        ))
    }
}

/// Requests cancellation of its own execution, then succeeds.
struct SelfCancel {
    store: Arc<InMemoryStore>,
    clock: Arc<FixedClock>,
}

#[async_trait]
impl StepExecutor for SelfCancel {
    async fn execute(&self, _config: &Value, _inputs: &Value, ctx: &StepContext) -> Result<Value, StepError> {
        self.store
            .request_cancel(ctx.execution_id, self.clock.now())
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;
        Ok(json!({}))
    }
}

/// Trigger lookup that always fails.
struct FailingMatcher;

#[async_trait]
impl TriggerMatcher for FailingMatcher {
    async fn matches(&self, _event: &Event) -> Result<Vec<TriggerSpec>, RelayError> {
        Err(RelayError::Match("trigger lookup failed: password=hunter2".into()))
    }
}

/// Counts calls; stands in for a step with an external side effect.
#[derive(Default)]
struct CountingCharge {
    calls: AtomicUsize,
}

#[async_trait]
impl StepExecutor for CountingCharge {
    async fn execute(&self, _config: &Value, _inputs: &Value, _ctx: &StepContext) -> Result<Value, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"charge_id": "ch_new"}))
    }
}

/// The first lookup parks until `resume` is notified; later lookups return at once.
struct StallingMatcher {
    trigger: TriggerSpec,
    calls: AtomicUsize,
    entered: Notify,
    resume: Notify,
}

impl StallingMatcher {
    fn new(trigger: TriggerSpec) -> Self {
        Self {
            trigger,
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            resume: Notify::new(),
        }
    }
}

#[async_trait]
impl TriggerMatcher for StallingMatcher {
    async fn matches(&self, _event: &Event) -> Result<Vec<TriggerSpec>, RelayError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.resume.notified().await;
        }
        Ok(vec![self.trigger.clone()])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_workers_drain_every_entry_exactly_once() {
    let h = HarnessBuilder::new().build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    const N: usize = 60;
    for i in 0..N {
        h.ingest(json!({ "n": i })).await;
    }

    let workers = ["worker-a", "worker-b"].map(|name| {
        let relay = Arc::clone(&h.relay);
        tokio::spawn(async move {
            let worker = WorkerId::new(name);
            let mut seen = Vec::new();
            loop {
                let batch = relay.dispatcher().dispatch_batch(7, &worker).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                seen.extend(batch.into_iter().map(|p| p.outbox_id));
                tokio::task::yield_now().await;
            }
            seen
        })
    });

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), N, "an entry was processed twice");
    assert_eq!(unique.len(), N);

    let health = h.relay.health().await.unwrap();
    assert_eq!(health.outbox.done, N);
    assert_eq!(health.outbox.pending + health.outbox.locked + health.outbox.running, 0);
    assert_eq!(health.executions.queued, N);
}

#[tokio::test]
async fn lock_is_stolen_only_after_ttl() {
    let h = HarnessBuilder::new().build();
    let id = h.ingest(json!({})).await;
    let ttl = h.relay.config().lock_ttl();
    let a = WorkerId::new("worker-a");
    let b = WorkerId::new("worker-b");

    let claimed = h.store.claim_batch(10, &a, h.clock.now(), ttl).await.unwrap();
    assert_eq!(claimed.len(), 1);
    let locked_at = claimed[0].locked_at;

    h.clock.advance(ttl);
    assert!(h.store.claim_batch(10, &b, h.clock.now(), ttl).await.unwrap().is_empty());

    h.clock.advance(Duration::milliseconds(1));
    let stolen = h.store.claim_batch(10, &b, h.clock.now(), ttl).await.unwrap();
    assert_eq!(stolen.len(), 1);
    assert_eq!(stolen[0].id, id);
    assert_eq!(stolen[0].lock_owner, Some(b));
    assert_eq!(stolen[0].locked_at, Some(h.clock.now()));
    assert_ne!(stolen[0].locked_at, locked_at);
}

#[tokio::test]
async fn redispatch_after_lock_steal_reuses_the_execution() {
    let builder = HarnessBuilder::new();
    let matcher = Arc::new(StallingMatcher::new(TriggerSpec::new(builder.automation, TENANT, EVENT_TYPE)));
    let h = builder.triggers(matcher.clone()).build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    let id = h.ingest(json!({})).await;

    let slow = {
        let relay = Arc::clone(&h.relay);
        tokio::spawn(async move {
            relay
                .dispatcher()
                .dispatch_batch(1, &WorkerId::new("worker-slow"))
                .await
                .unwrap()
        })
    };
    matcher.entered.notified().await;

    // the slow worker's lock expires and the relay worker takes the entry over
    h.clock.advance(h.relay.config().lock_ttl() + Duration::seconds(1));
    let stolen = h.relay.dispatch_tick().await.unwrap();
    matcher.resume.notify_one();
    let late = slow.await.unwrap();

    let DispatchOutcome::Done { executions: first } = &stolen[0].outcome else {
        panic!("unexpected outcome {:?}", stolen[0].outcome);
    };
    let DispatchOutcome::Done { executions: second } = &late[0].outcome else {
        panic!("unexpected outcome {:?}", late[0].outcome);
    };
    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(h.store.execution_snapshot().await.len(), 1);
    assert_eq!(h.entry(id).await.status, OutboxStatus::Done);
}

#[tokio::test]
async fn zero_matches_is_done_without_executions() {
    let h = HarnessBuilder::new().build();
    let id = h
        .relay
        .ingest_event(NewEvent::new(TENANT, "order.deleted", "shop", json!({})))
        .await
        .unwrap()
        .outbox_id;

    let processed = h.relay.dispatch_tick().await.unwrap();
    assert_eq!(processed[0].outcome, DispatchOutcome::Done { executions: vec![] });
    assert_eq!(h.entry(id).await.status, OutboxStatus::Done);
    assert_eq!(h.relay.health().await.unwrap().executions.queued, 0);
}

#[tokio::test]
async fn triggers_of_one_automation_yield_one_execution() {
    let builder = HarnessBuilder::new();
    let extra = TriggerSpec::new(builder.automation, TENANT, EVENT_TYPE).with_source("shop");
    let h = builder.also_trigger(extra).build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    h.ingest(json!({})).await;

    let processed = h.relay.dispatch_tick().await.unwrap();
    let DispatchOutcome::Done { executions } = &processed[0].outcome else {
        panic!("unexpected outcome {:?}", processed[0].outcome);
    };
    assert_eq!(executions.len(), 1);
}

#[tokio::test]
async fn repeated_failure_backs_off_then_dead_letters_once() {
    let h = HarnessBuilder::new().triggers(Arc::new(FailingMatcher)).build();
    let id = h.ingest(json!({})).await;

    for expected_attempts in 1..=2u32 {
        let now = h.clock.now();
        let processed = h.relay.dispatch_tick().await.unwrap();
        let DispatchOutcome::Retrying {
            attempts,
            next_attempt_at,
        } = processed[0].outcome
        else {
            panic!("unexpected outcome {:?}", processed[0].outcome);
        };
        assert_eq!(attempts, expected_attempts);
        assert!(next_attempt_at > now);

        let entry = h.entry(id).await;
        assert_eq!(entry.status, OutboxStatus::Failed);
        assert_eq!(entry.lock_owner, None);
        assert!(!entry.last_error.as_deref().unwrap_or_default().contains("hunter2"));

        // not eligible before next_attempt_at
        assert!(h.relay.dispatch_tick().await.unwrap().is_empty());
        h.clock.set(next_attempt_at);
    }

    let processed = h.relay.dispatch_tick().await.unwrap();
    let DispatchOutcome::DeadLettered { dead_letter_id } = processed[0].outcome else {
        panic!("unexpected outcome {:?}", processed[0].outcome);
    };
    let entry = h.entry(id).await;
    assert_eq!(entry.status, OutboxStatus::Dead);
    assert_eq!(entry.attempts, 3);

    let dead_letters = h.store.list_dead_letters(10).await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].id, dead_letter_id);
    assert_eq!(dead_letters[0].outbox_id, Some(id));
    assert_eq!(dead_letters[0].attempts, 3);
    assert!(dead_letters[0].last_error_redacted.contains("trigger lookup failed"));
    assert!(!dead_letters[0].last_error_redacted.contains("hunter2"));

    // DEAD is terminal for the claim path
    h.clock.advance(Duration::hours(1));
    assert!(h.relay.dispatch_tick().await.unwrap().is_empty());
    assert_eq!(h.relay.health().await.unwrap().dead_letters, 1);
}

#[tokio::test]
async fn replay_resets_dead_entry_for_the_next_cycle() {
    // no live workflow yet: every attempt is a match error
    let h = HarnessBuilder::new().build();
    let id = h.ingest(json!({})).await;
    for _ in 0..3 {
        h.relay.dispatch_tick().await.unwrap();
        h.clock.advance(Duration::minutes(10));
    }
    let dead_letter = h.store.list_dead_letters(1).await.unwrap().remove(0);
    assert!(dead_letter.last_error_redacted.contains("no workflow"));

    let entry = h.relay.replay(dead_letter.id).await.unwrap().unwrap();
    assert_eq!(entry.id, id);
    assert_eq!(entry.status, OutboxStatus::Pending);
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.next_attempt_at, None);
    assert_eq!(entry.lock_owner, None);
    assert_eq!(entry.locked_at, None);
    assert_eq!(h.store.get_dead_letter(dead_letter.id).await.unwrap(), None);

    // replaying again is a no-op
    assert_eq!(h.relay.replay(dead_letter.id).await.unwrap(), None);

    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    let processed = h.relay.dispatch_tick().await.unwrap();
    assert!(matches!(&processed[0].outcome, DispatchOutcome::Done { executions } if executions.len() == 1));
    assert_eq!(h.entry(id).await.status, OutboxStatus::Done);
}

#[tokio::test]
async fn replay_all_drains_the_dead_letter_table() {
    let h = HarnessBuilder::new().triggers(Arc::new(FailingMatcher)).build();
    for i in 0..3 {
        h.ingest(json!({ "n": i })).await;
    }
    for _ in 0..3 {
        h.relay.dispatch_tick().await.unwrap();
        h.clock.advance(Duration::minutes(10));
    }
    assert_eq!(h.relay.health().await.unwrap().dead_letters, 3);

    let summary = h.relay.replay_all().await.unwrap();
    assert_eq!(summary.replayed, 3);
    let health = h.relay.health().await.unwrap();
    assert_eq!(health.dead_letters, 0);
    assert_eq!(health.outbox.pending, 3);
}

#[tokio::test]
async fn invalid_graph_fails_entry_without_partial_executions() {
    let second = AutomationId::from_ulid(Ulid::new());
    let h = HarnessBuilder::new()
        .also_trigger(TriggerSpec::new(second, TENANT, EVENT_TYPE))
        .build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    h.catalog
        .publish_live(
            second,
            WorkflowDocument::new(vec![
                NodeSpec::new("a", "passthrough").then("b"),
                NodeSpec::new("b", "passthrough").then("a"),
            ]),
        )
        .await;
    let id = h.ingest(json!({})).await;

    let processed = h.relay.dispatch_tick().await.unwrap();
    assert!(matches!(processed[0].outcome, DispatchOutcome::Retrying { attempts: 1, .. }));
    let entry = h.entry(id).await;
    assert!(entry.last_error.as_deref().unwrap_or_default().contains("invalid workflow graph"));
    assert!(h.store.execution_snapshot().await.is_empty());
}

#[tokio::test]
async fn executions_snapshot_the_live_version_at_creation() {
    let h = HarnessBuilder::new().build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough").with_config(json!({"output": {"v": 1}}))])
        .await;
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();

    let v2 = h
        .publish_live(vec![NodeSpec::new("a", "passthrough").with_config(json!({"output": {"v": 2}}))])
        .await;
    assert_eq!(v2, 2);
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();

    let executions = h.store.execution_snapshot().await;
    let versions: Vec<u32> = executions.iter().map(|e| e.workflow_version).collect();
    assert_eq!(versions, vec![1, 2]);

    // a live switch back does not touch existing executions
    h.catalog.set_live(h.automation, 1).await.unwrap();
    let summary = h.relay.run_executions_tick().await.unwrap();
    assert_eq!(summary.succeeded, 2);
    for (execution, expected) in executions.iter().zip([1, 2]) {
        let steps = h.store.list_steps(execution.id).await.unwrap();
        assert_eq!(steps[0].output, Some(json!({"v": expected})));
    }
}

#[tokio::test]
async fn engine_walks_graph_and_passes_outputs_forward() {
    let h = HarnessBuilder::new().build();
    h.publish_live(vec![
        NodeSpec::new("check", "filter")
            .with_config(json!({"path": "event.kind", "equals": "paid"}))
            .then("emit"),
        NodeSpec::new("emit", "passthrough"),
    ])
    .await;
    h.ingest(json!({"kind": "paid"})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;

    let outcome = h.relay.engine().run_execution(execution_id, h.relay.worker_id()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Succeeded);

    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.lease_owner, None);
    assert!(execution.finished_at.is_some());

    let steps = h.store.list_steps(execution_id).await.unwrap();
    let ids: Vec<&str> = steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, vec!["check", "emit"]);
    assert_eq!(steps[1].input["steps"]["check"], json!({"passed": true}));

    // terminal executions are not run twice
    let again = h.relay.engine().run_execution(execution_id, h.relay.worker_id()).await.unwrap();
    assert_eq!(again, RunOutcome::Skipped);
}

#[tokio::test]
async fn failed_step_stops_traversal() {
    let h = HarnessBuilder::new().build();
    h.publish_live(vec![
        NodeSpec::new("check", "filter")
            .with_config(json!({"path": "event.kind", "equals": "paid"}))
            .then("emit"),
        NodeSpec::new("emit", "passthrough"),
    ])
    .await;
    h.ingest(json!({"kind": "draft"})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;

    let outcome = h.relay.engine().run_execution(execution_id, h.relay.worker_id()).await.unwrap();
    assert!(matches!(&outcome, RunOutcome::Failed { step_id, .. } if step_id == "check"));

    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.lease_owner, None);
    assert!(execution.error.unwrap().starts_with("step `check` failed: condition not met"));

    let steps = h.store.list_steps(execution_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn persisted_steps_and_errors_are_redacted() {
    let h = HarnessBuilder::new()
        .executor("leaky", Arc::new(LeakyExecutor))
        .executor("broken", Arc::new(BrokenUpstream))
        .build();
    h.publish_live(vec![
        NodeSpec::new("fetch", "leaky").then("call"),
        NodeSpec::new("call", "broken"),
    ])
    .await;
    h.ingest(json!({"password": "hunter2", "item": 1})).await;
    h.relay.dispatch_tick().await.unwrap();

    let summary = h.relay.run_executions_tick().await.unwrap();
    assert_eq!(summary.failed, 1);
    let execution = &h.store.execution_snapshot().await[0];
    let steps = h.store.list_steps(execution.id).await.unwrap();
    assert_eq!(steps.len(), 2);

    assert_eq!(steps[0].input["event"]["password"], json!("[REDACTED]"));
    assert_eq!(steps[0].input["event"]["item"], json!(1));
    assert_eq!(steps[0].output.as_ref().unwrap()["token"], json!("[REDACTED]"));
    assert_eq!(steps[1].input["steps"]["fetch"]["token"], json!("[REDACTED]"));

    let persisted = serde_json::to_string(&steps).unwrap() + execution.error.as_deref().unwrap_or_default();
    for secret in ["hunter2", "s3cr3t-output", "abc.def.ghi", "live-123"] {
        assert!(!persisted.contains(secret), "{secret} leaked: {persisted}");
    }
}

#[tokio::test]
async fn cancel_queued_execution_is_immediate() {
    let h = HarnessBuilder::new().build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;

    let canceled = h.relay.request_cancel(execution_id).await.unwrap().unwrap();
    assert_eq!(canceled.status, ExecutionStatus::Canceled);

    let summary = h.relay.run_executions_tick().await.unwrap();
    assert_eq!(summary, RunSummary::default());
    assert!(h.store.list_steps(execution_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_running_execution_stops_at_next_step() {
    let builder = HarnessBuilder::new();
    let self_cancel = SelfCancel {
        store: Arc::clone(&builder.store),
        clock: Arc::clone(&builder.clock),
    };
    let h = builder.executor("self_cancel", Arc::new(self_cancel)).build();
    h.publish_live(vec![
        NodeSpec::new("first", "self_cancel").then("second"),
        NodeSpec::new("second", "passthrough"),
    ])
    .await;
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;

    let outcome = h.relay.engine().run_execution(execution_id, h.relay.worker_id()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Canceled);

    let steps = h.store.list_steps(execution_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_id, "first");
    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(execution.lease_owner, None);
}

#[tokio::test]
async fn execution_lease_is_stolen_after_ttl() {
    let h = HarnessBuilder::new().build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;
    let ttl = h.relay.config().lock_ttl();

    let crashed = WorkerId::new("worker-crashed");
    let first = h
        .store
        .claim_execution(execution_id, &crashed, h.clock.now(), ttl)
        .await
        .unwrap()
        .unwrap();

    let engine = h.relay.engine();
    assert_eq!(engine.run_execution(execution_id, h.relay.worker_id()).await.unwrap(), RunOutcome::Skipped);

    h.clock.advance(ttl + Duration::seconds(1));
    assert_eq!(engine.run_execution(execution_id, h.relay.worker_id()).await.unwrap(), RunOutcome::Succeeded);
    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.started_at, first.started_at);
}

#[tokio::test]
async fn reaper_dry_run_counts_then_releases_stale_leases() {
    let h = HarnessBuilder::new().build();
    h.publish_live(vec![NodeSpec::new("a", "passthrough")]).await;
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;
    let stuck = h.ingest(json!({})).await;

    let crashed = WorkerId::new("worker-crashed");
    let ttl = h.relay.config().lock_ttl();
    h.store.claim_batch(10, &crashed, h.clock.now(), ttl).await.unwrap();
    h.store
        .claim_execution(execution_id, &crashed, h.clock.now(), ttl)
        .await
        .unwrap()
        .unwrap();

    // past the TTL but inside the stale threshold: nothing to reap
    h.clock.advance(ttl + Duration::seconds(1));
    assert_eq!(h.relay.reap(false).await.unwrap().total(), 0);

    h.clock.advance(h.relay.config().reaper_stale_threshold());
    let dry = h.relay.reap(true).await.unwrap();
    assert!(dry.dry_run);
    assert_eq!((dry.outbox, dry.executions), (1, 1));
    assert_eq!(h.entry(stuck).await.status, OutboxStatus::Locked);

    let report = h.relay.reap(false).await.unwrap();
    assert_eq!(report.outbox_ids, vec![stuck]);
    assert_eq!(report.execution_ids, vec![execution_id]);

    let entry = h.entry(stuck).await;
    assert_eq!(entry.status, OutboxStatus::Pending);
    assert_eq!(entry.lock_owner, None);
    assert_eq!(entry.last_error.as_deref(), Some("reaped: stale lease held by worker-crashed"));
    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Queued);
    assert_eq!(execution.lease_owner, None);
}

#[tokio::test]
async fn cancel_during_last_step_ends_canceled() {
    let builder = HarnessBuilder::new();
    let self_cancel = SelfCancel {
        store: Arc::clone(&builder.store),
        clock: Arc::clone(&builder.clock),
    };
    let h = builder.executor("self_cancel", Arc::new(self_cancel)).build();
    h.publish_live(vec![NodeSpec::new("only", "self_cancel")]).await;
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;

    let outcome = h.relay.engine().run_execution(execution_id, h.relay.worker_id()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Canceled);

    let steps = h.store.list_steps(execution_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Success);
    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(execution.lease_owner, None);
}

#[tokio::test]
async fn rerun_after_steal_skips_steps_that_already_succeeded() {
    let charge = Arc::new(CountingCharge::default());
    let h = HarnessBuilder::new().executor("charge", charge.clone()).build();
    h.publish_live(vec![
        NodeSpec::new("charge", "charge").then("emit"),
        NodeSpec::new("emit", "passthrough"),
    ])
    .await;
    h.ingest(json!({})).await;
    h.relay.dispatch_tick().await.unwrap();
    let execution_id = h.store.execution_snapshot().await[0].id;
    let ttl = h.relay.config().lock_ttl();

    // a worker records `charge` and dies before `emit`
    let crashed = WorkerId::new("worker-crashed");
    h.store
        .claim_execution(execution_id, &crashed, h.clock.now(), ttl)
        .await
        .unwrap()
        .unwrap();
    h.store
        .append_step(ExecutionStep {
            execution_id,
            step_id: "charge".into(),
            step_type: "charge".into(),
            status: StepStatus::Success,
            input: json!({}),
            output: Some(json!({"charge_id": "ch_1"})),
            error: None,
            started_at: h.clock.now(),
            finished_at: h.clock.now(),
        })
        .await
        .unwrap();

    h.clock.advance(ttl + Duration::seconds(1));
    let outcome = h.relay.engine().run_execution(execution_id, h.relay.worker_id()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(charge.calls.load(Ordering::SeqCst), 0);

    let steps = h.store.list_steps(execution_id).await.unwrap();
    let ids: Vec<&str> = steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, vec!["charge", "emit"]);
    assert_eq!(steps[1].input["steps"]["charge"], json!({"charge_id": "ch_1"}));
}

#[tokio::test]
async fn engine_fault_releases_the_lease() {
    let h = HarnessBuilder::new().build();
    let graph = CompiledGraph::compile(&WorkflowDocument::new(vec![NodeSpec::new("a", "passthrough")])).unwrap();
    // the event row is missing, so the run faults before its first step
    let orphan = Execution::queued(
        ExecutionId::from_ulid(Ulid::new()),
        TENANT,
        EventId::from_ulid(Ulid::new()),
        h.automation,
        1,
        h.clock.now(),
    );
    let execution_id = h.store.create_execution(orphan, Arc::new(graph)).await.unwrap();

    let summary = h.relay.run_executions_tick().await.unwrap();
    assert_eq!(
        summary,
        RunSummary {
            faulted: 1,
            ..RunSummary::default()
        }
    );

    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.lease_owner, None);
    assert_eq!(execution.leased_at, None);
    assert!(execution.is_claimable(h.clock.now(), h.relay.config().lock_ttl()));
    assert!(h.store.list_steps(execution_id).await.unwrap().is_empty());

    // no TTL wait: the next run claims it straight away and faults again
    assert!(h.relay.engine().run_execution(execution_id, h.relay.worker_id()).await.is_err());
    let execution = h.store.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.lease_owner, None);
}

#[tokio::test]
async fn reaper_retry_mode_schedules_a_later_attempt() {
    let mut builder = HarnessBuilder::new();
    builder.config.reaper_action = ReaperMode::Retry;
    let h = builder.build();
    let stuck = h.ingest(json!({})).await;

    let crashed = WorkerId::new("worker-crashed");
    let ttl = h.relay.config().lock_ttl();
    h.store.claim_batch(10, &crashed, h.clock.now(), ttl).await.unwrap();

    h.clock.advance(ttl + h.relay.config().reaper_stale_threshold() + Duration::seconds(1));
    let reaped_at = h.clock.now();
    let report = h.relay.reap(false).await.unwrap();
    assert_eq!(report.outbox_ids, vec![stuck]);

    let entry = h.entry(stuck).await;
    let due = reaped_at + h.relay.config().reaper_retry_delay();
    assert_eq!(entry.status, OutboxStatus::Failed);
    assert_eq!(entry.next_attempt_at, Some(due));
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.lock_owner, None);
    assert_eq!(entry.locked_at, None);

    h.clock.set(due - Duration::milliseconds(1));
    assert_eq!(entry.claimable_since(h.clock.now(), ttl), None);
    assert!(h.store.claim_batch(10, &crashed, h.clock.now(), ttl).await.unwrap().is_empty());

    h.clock.set(due);
    assert_eq!(entry.claimable_since(h.clock.now(), ttl), Some(due));
    let claimed = h.store.claim_batch(10, h.relay.worker_id(), h.clock.now(), ttl).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 0);
}
