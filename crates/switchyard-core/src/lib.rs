//! switchyard-core
//!
//! Event-to-execution relay: outbox、lease ベースの dispatcher、reaper、
//! execution engine、dead-letter replay。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, event, outbox, execution, dead_letter, automation, errors, redaction）
//! - **graph**: workflow ドキュメントとコンパイル済みグラフ
//! - **ports**: 抽象化レイヤー（Store 各種, TriggerMatcher, WorkflowResolver, StepExecutor, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryStore と組み込み step executor）
//! - **app**: アプリケーションロジック（builder, dispatcher, engine, reaper, replay, worker_loop）

pub mod app;
pub mod domain;
pub mod graph;
pub mod impls;
pub mod ports;
