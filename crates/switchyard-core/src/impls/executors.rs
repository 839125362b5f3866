//! Built-in step executors.
//!
//! - `passthrough`: emits `config.output` if set, otherwise its inputs
//! - `filter`: compares a dotted path in the inputs against `config.equals`

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::domain::StepError;
use crate::ports::{StepContext, StepExecutor};

pub const PASSTHROUGH: &str = "passthrough";
pub const FILTER: &str = "filter";

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughExecutor;

#[async_trait]
impl StepExecutor for PassthroughExecutor {
    async fn execute(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &StepContext,
    ) -> Result<Value, StepError> {
        Ok(config.get("output").cloned().unwrap_or_else(|| inputs.clone()))
    }
}

/// What a filter does when the condition does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFail {
    /// Fail the step (and so the execution).
    Stop,
    /// Succeed with `{"passed": false}`.
    Continue,
}

/// Config: `{"path": "event.amount", "equals": 100, "on_fail": "stop" | "continue"}`.
///
/// `path` is resolved against the step inputs (`event.*` is the event payload,
/// `steps.<id>.*` an earlier step's output).
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterExecutor;

impl FilterExecutor {
    fn parse(config: &Value) -> Result<(&str, &Value, OnFail), String> {
        let path = config
            .get("path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .ok_or("`path` must be a non-empty string")?;
        let expected = config.get("equals").ok_or("`equals` is required")?;
        let on_fail = match config.get("on_fail").and_then(Value::as_str) {
            None | Some("stop") => OnFail::Stop,
            Some("continue") => OnFail::Continue,
            Some(other) => return Err(format!("unknown on_fail `{other}`")),
        };
        Ok((path, expected, on_fail))
    }
}

/// `a.b.0.c` -> `/a/b/0/c`
fn lookup<'a>(inputs: &'a Value, dotted: &str) -> Option<&'a Value> {
    let pointer: String = dotted
        .split('.')
        .map(|part| format!("/{}", part.replace('~', "~0").replace('/', "~1")))
        .collect();
    inputs.pointer(&pointer)
}

#[async_trait]
impl StepExecutor for FilterExecutor {
    async fn execute(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &StepContext,
    ) -> Result<Value, StepError> {
        let (path, expected, on_fail) = Self::parse(config).map_err(StepError::InvalidConfig)?;

        let actual = lookup(inputs, path);
        if actual == Some(expected) {
            return Ok(json!({"passed": true}));
        }
        match on_fail {
            OnFail::Stop => Err(StepError::ConditionNotMet(format!(
                "`{path}` is {}, expected {expected}",
                actual.map_or_else(|| "missing".to_string(), Value::to_string)
            ))),
            OnFail::Continue => Ok(json!({"passed": false})),
        }
    }

    fn validate_config(&self, config: &Value) -> Result<(), String> {
        Self::parse(config).map(|_| ())
    }
}
