//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: event / outbox / dead letter / execution の正本
//! - **StaticTriggerMatcher**: 固定リストによる trigger 照合
//! - **InMemoryWorkflowCatalog**: workflow version と live フラグ
//! - **PassthroughExecutor / FilterExecutor**: 組み込み step
//!
//! 永続化が必要になったら Store trait を別クレートで実装します。

pub mod executors;
pub mod memory_store;
pub mod static_triggers;
pub mod workflow_catalog;

pub use self::executors::{FilterExecutor, PassthroughExecutor};
pub use self::memory_store::InMemoryStore;
pub use self::static_triggers::StaticTriggerMatcher;
pub use self::workflow_catalog::InMemoryWorkflowCatalog;
