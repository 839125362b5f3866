//! switchyard - relay の動作確認用 CLI
//!
//! - `demo`: automation を 1 つ用意して event を流し、drain してから health を JSON で出力
//! - `run`: dispatcher / execution / reaper ループを ctrl-c まで回す

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchyard_core::app::{
    DispatchOutcome, HealthReport, IngestStatus, Relay, RelayBuilder, RelayConfig, ReplaySummary,
    WorkerGroup,
};
use switchyard_core::domain::{AutomationId, NewEvent, StepError, TriggerSpec};
use switchyard_core::graph::{NodeSpec, WorkflowDocument};
use switchyard_core::impls::{InMemoryWorkflowCatalog, StaticTriggerMatcher};
use switchyard_core::ports::{StepContext, StepExecutor};

const TENANT: &str = "demo";
const EVENT_TYPE: &str = "order.created";
const NOTIFY: &str = "notify";

#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Event-to-execution relay")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest sample events, drain them and print health as JSON.
    Demo {
        #[arg(long, default_value_t = 5)]
        events: usize,
    },
    /// Run the relay loops until ctrl-c.
    Run {
        /// Sample events to ingest at startup.
        #[arg(long, default_value_t = 0)]
        seed: usize,
    },
}

/// Logs the order it is handed and echoes it.
struct NotifyExecutor;

#[async_trait]
impl StepExecutor for NotifyExecutor {
    async fn execute(&self, config: &Value, inputs: &Value, ctx: &StepContext) -> Result<Value, StepError> {
        let channel = config.get("channel").and_then(Value::as_str).unwrap_or("log");
        tracing::info!(
            execution_id = %ctx.execution_id,
            step_id = %ctx.step_id,
            channel,
            order = %inputs["event"]["order_id"],
            "notify"
        );
        Ok(json!({ "channel": channel, "order": inputs["event"]["order_id"] }))
    }
}

#[derive(Debug, Serialize)]
struct DemoReport {
    ingested: usize,
    duplicates: usize,
    dispatched: usize,
    dead_lettered: usize,
    replay: ReplaySummary,
    health: HealthReport,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,switchyard_core=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Builds a relay with one automation: `filter(paid) -> notify`.
async fn build_relay(config: RelayConfig) -> Result<Relay> {
    let automation = AutomationId::generate();
    let catalog = Arc::new(InMemoryWorkflowCatalog::new());
    catalog
        .publish_live(
            automation,
            WorkflowDocument::new(vec![
                NodeSpec::new("only_paid", "filter")
                    .with_config(json!({ "path": "event.status", "equals": "paid" }))
                    .then("notify"),
                NodeSpec::new("notify", NOTIFY).with_config(json!({ "channel": "ops" })),
            ]),
        )
        .await;
    let triggers = StaticTriggerMatcher::new(vec![TriggerSpec::new(automation, TENANT, EVENT_TYPE)]);

    let relay = RelayBuilder::new(config)
        .triggers(Arc::new(triggers))
        .workflows(catalog)
        .with_builtin_executors()?
        .register(NOTIFY, Arc::new(NotifyExecutor))?
        .expect_step_types(&["filter", "passthrough", NOTIFY])
        .build()?;
    Ok(relay)
}

fn sample_event(n: usize) -> NewEvent {
    let status = if n % 3 == 2 { "draft" } else { "paid" };
    NewEvent::new(
        TENANT,
        EVENT_TYPE,
        "cli",
        json!({ "order_id": n, "status": status, "api_key": "sk-demo-not-a-real-key-000000" }),
    )
    .with_idempotency_key(format!("order-{n}"))
}

async fn demo(config: RelayConfig, events: usize) -> Result<()> {
    let relay = build_relay(config).await?;

    let mut report = DemoReport {
        ingested: 0,
        duplicates: 0,
        dispatched: 0,
        dead_lettered: 0,
        replay: ReplaySummary::default(),
        health: HealthReport::default(),
    };
    // every event twice: the second copy is an idempotent duplicate
    for n in (0..events).chain(0..events) {
        match relay.ingest_event(sample_event(n)).await?.status {
            IngestStatus::Accepted => report.ingested += 1,
            IngestStatus::Duplicate => report.duplicates += 1,
        }
    }

    loop {
        let processed = relay.dispatch_tick().await?;
        if processed.is_empty() {
            break;
        }
        for entry in processed {
            match entry.outcome {
                DispatchOutcome::Done { .. } => report.dispatched += 1,
                DispatchOutcome::DeadLettered { .. } => report.dead_lettered += 1,
                DispatchOutcome::Retrying { .. } => {}
            }
        }
    }
    loop {
        let summary = relay.run_executions_tick().await?;
        if summary.succeeded + summary.failed + summary.canceled == 0 {
            break;
        }
    }

    report.replay = relay.replay_all().await?;
    report.health = relay.health().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(config: RelayConfig, seed: usize) -> Result<()> {
    let relay = Arc::new(build_relay(config).await?);
    for n in 0..seed {
        relay.ingest_event(sample_event(n)).await?;
    }

    let group = WorkerGroup::spawn(Arc::clone(&relay));
    tokio::signal::ctrl_c()
        .await
        .context("failed to install ctrl-c handler")?;
    tracing::info!("shutdown signal received");
    group.shutdown_and_join().await;

    let health = relay.health().await?;
    tracing::info!(?health, "relay stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = RelayConfig::from_env().context("failed to load SWITCHYARD_* configuration")?;
    tracing::info!(
        worker_id = ?config.worker_id,
        batch_size = config.batch_size,
        lock_ttl_secs = config.lock_ttl_secs,
        max_attempts = config.max_attempts,
        "configuration loaded"
    );

    match cli.command {
        Command::Demo { events } => demo(config, events).await,
        Command::Run { seed } => run(config, seed).await,
    }
}
