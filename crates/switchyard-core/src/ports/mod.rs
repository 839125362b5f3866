//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 永続化（event / outbox / dead letter / execution）と外部コラボレータ
//! （trigger matching, workflow 解決, step 実行）を trait で切り離します。
//!
//! # 設計原則
//! - Store が source of truth（正本）
//! - 時刻は引数の `now` で渡す（Store は Clock を持たない）

pub mod clock;
pub mod collaborators;
pub mod dead_letter_store;
pub mod event_store;
pub mod execution_store;
pub mod id_generator;
pub mod outbox_store;
pub mod step_executor;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::collaborators::{TriggerMatcher, WorkflowResolver};
pub use self::dead_letter_store::DeadLetterStore;
pub use self::event_store::{AppendedEvent, EventStore};
pub use self::execution_store::{ExecutionCounts, ExecutionStore};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::outbox_store::{OutboxCounts, OutboxStore, StaleLeaseAction};
pub use self::step_executor::{StepContext, StepExecutor};

/// Everything the relay persists, behind one object.
pub trait RelayStore: EventStore + OutboxStore + DeadLetterStore + ExecutionStore {}

impl<T> RelayStore for T where T: EventStore + OutboxStore + DeadLetterStore + ExecutionStore {}
