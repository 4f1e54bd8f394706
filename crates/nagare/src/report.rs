//! Run state and result shaping.

use nagare_core::{Context, StepName};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, no unit started yet.
    Pending,
    /// Units are executing.
    Running,
    /// Every unit completed.
    Succeeded,
    /// A unit failed and compensation could not complete.
    Failed,
    /// A unit failed and every executed step was compensated.
    RolledBack,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running => write!(f, "running"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
            RunState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    /// The workflow name.
    pub workflow: String,
    /// Final state of the run.
    pub state: RunState,
    /// Steps that ran successfully, in execution order.
    pub steps_executed: Vec<StepName>,
    /// Steps whose guard did not match.
    pub steps_skipped: Vec<StepName>,
    /// `<group>:<branch>` for every branch taken, in execution order.
    pub branches_taken: Vec<String>,
    /// Optional steps that failed without aborting the run.
    pub optional_failures: Vec<StepName>,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// Result of a successful workflow run.
#[derive(Debug)]
pub struct WorkflowOutput {
    /// The final context.
    pub context: Context,
    /// Trace of the run.
    pub metadata: RunMetadata,
}

impl WorkflowOutput {
    /// Shortcut for `self.context.get(key)`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Renders `{success: true, <context keys>, metadata: {..}}`.
    ///
    /// `success` and `metadata` are reserved: a context key with either
    /// name is replaced by the envelope value and only reachable through
    /// [`context`](WorkflowOutput::context).
    pub fn to_json(&self) -> Value {
        let mut body: Map<String, Value> = self.context.to_map();
        body.insert("success".to_string(), Value::Bool(true));
        body.insert(
            "metadata".to_string(),
            serde_json::to_value(&self.metadata).unwrap_or(Value::Null),
        );
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nagare_core::Actor;
    use serde_json::json;

    #[test]
    fn test_to_json() {
        let mut context = Context::new(Actor::system());
        context.insert("order", json!({"id": 42}));
        let output = WorkflowOutput {
            context,
            metadata: RunMetadata {
                workflow: "checkout".to_string(),
                state: RunState::Succeeded,
                steps_executed: vec![StepName::new("create_order")],
                steps_skipped: vec![],
                branches_taken: vec!["branch_1:on_1".to_string()],
                optional_failures: vec![],
                duration_ms: 3,
            },
        };

        assert_eq!(output.get("order"), Some(&json!({"id": 42})));
        assert_eq!(
            output.to_json(),
            json!({
                "success": true,
                "order": {"id": 42},
                "metadata": {
                    "workflow": "checkout",
                    "state": "succeeded",
                    "steps_executed": ["create_order"],
                    "steps_skipped": [],
                    "branches_taken": ["branch_1:on_1"],
                    "optional_failures": [],
                    "duration_ms": 3
                }
            })
        );
    }

    #[test]
    fn test_envelope_keys_are_reserved() {
        let mut context = Context::new(Actor::system());
        context.insert("success", false);
        context.insert("metadata", "user supplied");
        let output = WorkflowOutput {
            context,
            metadata: RunMetadata {
                workflow: "signup".to_string(),
                state: RunState::Succeeded,
                steps_executed: vec![],
                steps_skipped: vec![],
                branches_taken: vec![],
                optional_failures: vec![],
                duration_ms: 0,
            },
        };

        let body = output.to_json();
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["metadata"]["workflow"], json!("signup"));
        assert_eq!(output.get("success"), Some(&json!(false)));
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::RolledBack.to_string(), "rolled_back");
        assert_eq!(RunState::Succeeded.to_string(), "succeeded");
    }
}
