//! WorkerGroup - dispatcher / execution / reaper の定期ループ
//!
//! # フロー
//! 1. interval ごとに 1 tick（dispatch_tick / run_executions_tick / reap）
//! 2. tick のエラーはログに残してループを続ける
//! 3. shutdown 要求で新しい tick を始めずに抜ける（実行中の tick は完走）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::app::builder::Relay;
use crate::app::engine::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    Dispatch,
    Execute,
    Reap,
}

impl LoopKind {
    fn name(self) -> &'static str {
        match self {
            LoopKind::Dispatch => "dispatch",
            LoopKind::Execute => "execute",
            LoopKind::Reap => "reap",
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` で全ループが次の tick から止まる
/// - `shutdown_and_join()` で全ループの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawns one dispatch, one execution and one reaper loop over `relay`.
    pub fn spawn(relay: Arc<Relay>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll = relay.config().poll_interval();
        let reap = relay.config().reaper_interval();

        let joins = [
            (LoopKind::Dispatch, poll),
            (LoopKind::Execute, poll),
            (LoopKind::Reap, reap),
        ]
        .into_iter()
        .map(|(kind, period)| {
            let relay = Arc::clone(&relay);
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { run_loop(kind, relay, period, rx).await })
        })
        .collect();

        info!(worker_id = %relay.worker_id(), "worker group started");
        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all loops.
    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all loops.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker loop panicked");
            }
        }
        info!("worker group stopped");
    }
}

async fn run_loop(kind: LoopKind, relay: Arc<Relay>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        tick(kind, &relay).await;
    }
    debug!(worker_loop = kind.name(), "worker loop exited");
}

async fn tick(kind: LoopKind, relay: &Relay) {
    let result = match kind {
        LoopKind::Dispatch => relay.dispatch_tick().await.map(|processed| {
            if !processed.is_empty() {
                debug!(processed = processed.len(), "dispatch tick");
            }
        }),
        LoopKind::Execute => relay.run_executions_tick().await.map(|summary| {
            if summary != RunSummary::default() {
                debug!(?summary, "execution tick");
            }
        }),
        LoopKind::Reap => relay.reap(false).await.map(|_| ()),
    };
    if let Err(err) = result {
        error!(
            worker_loop = kind.name(),
            worker_id = %relay.worker_id(),
            kind = err.kind().as_str(),
            error = %err,
            "tick failed"
        );
    }
}
