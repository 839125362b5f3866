//! Errors - エラー型と分類
//!
//! Dispatcher / engine の失敗はすべて `RelayError` に集約され、
//! outbox / execution の状態遷移に変換されます（バッチの外には漏れない）。

use thiserror::Error;

use crate::graph::GraphViolation;

/// Operational classification, used for logging and health views.
///
/// Match / Validation / Execution are all retried at the outbox level up to
/// `max_attempts`; there is no transient/permanent split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Trigger or workflow resolution failed.
    Match,
    /// Malformed workflow graph.
    Validation,
    /// A step executor failed.
    Execution,
    /// Store or wiring failure.
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Match => "match",
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("match error: {0}")]
    Match(String),

    #[error("invalid workflow graph: {}", join_violations(.0))]
    Validation(Vec<GraphViolation>),

    #[error("step failed: {0}")]
    Execution(#[from] StepError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("registry error: {0}")]
    Registry(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Match(_) => ErrorKind::Match,
            RelayError::Validation(_) => ErrorKind::Validation,
            RelayError::Execution(_) => ErrorKind::Execution,
            RelayError::NotFound { .. } | RelayError::Store(_) | RelayError::Registry(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        RelayError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Typed failure returned by a step executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("no executor registered for step type `{0}`")]
    UnknownStepType(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("condition not met: {0}")]
    ConditionNotMet(String),

    #[error("{0}")]
    Failed(String),
}

fn join_violations(violations: &[GraphViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
