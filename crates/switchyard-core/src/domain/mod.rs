//! Domain model (ids, events, outbox, executions, dead letters, redaction).
//!
//! ここは純粋なモデルのみ。永続化や I/O は ports / impls 側に置きます。

pub mod automation;
pub mod dead_letter;
pub mod errors;
pub mod event;
pub mod execution;
pub mod ids;
pub mod outbox;
pub mod redaction;

pub use self::automation::{TriggerSpec, WorkflowVersion};
pub use self::dead_letter::{DeadLetter, ReasonCode};
pub use self::errors::{ErrorKind, RelayError, StepError};
pub use self::event::{Event, NewEvent};
pub use self::execution::{Execution, ExecutionStatus, ExecutionStep, StepStatus};
pub use self::ids::{
    AutomationId, DeadLetterId, EventId, ExecutionId, Id, IdMarker, OutboxId, WorkerId,
};
pub use self::outbox::{OutboxEntry, OutboxStatus};
