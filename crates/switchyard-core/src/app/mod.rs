//! App - アプリケーション層
//!
//! ports を組み合わせて relay のロジックを実装します。
//!
//! # 主要コンポーネント
//! - **RelayBuilder / Relay**: 構築・ワイヤリングと運用向けの tick API
//! - **Ingestor**: Event + Outbox entry の取り込み
//! - **Dispatcher**: outbox entry → Execution（retry / dead-letter 付き）
//! - **ExecutionEngine**: Execution の lease を取りグラフを実行
//! - **Reaper**: 期限切れ lease の回収
//! - **ReplayService**: dead letter の再投入
//! - **WorkerGroup**: 上記を定期実行するループ

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod ingest;
pub mod reaper;
pub mod registry;
pub mod replay;
pub mod retry;
pub mod status;
pub mod worker_loop;

#[cfg(test)]
mod scenarios;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Relay, RelayBuilder};
pub use self::config::{ConfigError, ReaperMode, RelayConfig};
pub use self::dispatcher::{DispatchOutcome, Dispatcher, ProcessedEntry};
pub use self::engine::{ExecutionEngine, RunOutcome, RunSummary};
pub use self::ingest::{IngestReceipt, IngestStatus, Ingestor};
pub use self::reaper::{ReapReport, Reaper, ReaperSettings};
pub use self::registry::{ExecutorRegistry, RegistryError};
pub use self::replay::{ReplayService, ReplaySummary};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::status::HealthReport;
pub use self::worker_loop::WorkerGroup;
