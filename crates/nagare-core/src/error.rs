//! Workflow error types.

use crate::step::StepName;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A service rejected its input.
    ValidationFailed,
    /// The actor may not perform the operation.
    Unauthorized,
    /// A record the service needed does not exist.
    ResourceNotFound,
    /// The backing store reported an error.
    DatabaseError,
    /// A service failed while executing, or raised unexpectedly.
    ExecutionError,
    /// A non-optional workflow step failed.
    StepFailed,
    /// No branch of a branch group matched.
    BranchNotMatched,
    /// A rollback callback failed during compensation.
    RollbackFailed,
    /// The workflow definition is invalid.
    ConfigurationError,
    /// The transaction boundary could not begin or commit.
    TransactionFailed,
    /// A run was started with a context that failed or already ran.
    InvalidContext,
}

impl ErrorCode {
    /// Returns the snake_case wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::ResourceNotFound => "resource_not_found",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::ExecutionError => "execution_error",
            ErrorCode::StepFailed => "step_failed",
            ErrorCode::BranchNotMatched => "branch_not_matched",
            ErrorCode::RollbackFailed => "rollback_failed",
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::TransactionFailed => "transaction_failed",
            ErrorCode::InvalidContext => "invalid_context",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure reported by a service, input mapper, rollback callback or
/// transaction manager.
///
/// # Examples
///
/// ```
/// use nagare_core::{ErrorCode, ServiceFailure};
///
/// let failure = ServiceFailure::new(ErrorCode::ValidationFailed, "amount must be positive")
///     .with_detail("field", "amount");
/// assert_eq!(failure.to_string(), "amount must be positive");
///
/// let failure: ServiceFailure = "gateway unavailable".into();
/// assert_eq!(failure.code, ErrorCode::ExecutionError);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message}")]
pub struct ServiceFailure {
    /// Machine-readable classification.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    pub details: Map<String, Value>,
}

impl ServiceFailure {
    /// Creates a failure with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Map::new(),
        }
    }

    /// Creates an `execution_error` failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    /// Adds a structured detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for ServiceFailure {
    fn from(message: &str) -> Self {
        Self::execution(message)
    }
}

impl From<String> for ServiceFailure {
    fn from(message: String) -> Self {
        Self::execution(message)
    }
}

/// Which transaction operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    /// Opening the transaction.
    Begin,
    /// Committing a successful run.
    Commit,
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionPhase::Begin => write!(f, "begin"),
            TransactionPhase::Commit => write!(f, "commit"),
        }
    }
}

/// Errors raised while a workflow is being defined.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The workflow was given an empty name.
    #[error("workflow name must not be empty")]
    EmptyWorkflowName,

    /// A step or branch group was given an empty name.
    #[error("step and branch names must not be empty (in '{scope}')")]
    EmptyName {
        /// Enclosing scope.
        scope: String,
    },

    /// Two sibling steps share a name.
    #[error("duplicate step '{name}' in '{scope}'")]
    DuplicateStep {
        /// Enclosing scope.
        scope: String,
        /// The repeated step name.
        name: String,
    },

    /// Two sibling branch groups share a name.
    #[error("duplicate branch group '{name}' in '{scope}'")]
    DuplicateBranchGroup {
        /// Enclosing scope.
        scope: String,
        /// The repeated group name.
        name: String,
    },

    /// `otherwise` was declared twice in one group.
    #[error("otherwise already declared in branch group '{group}'")]
    DuplicateOtherwise {
        /// The group name.
        group: String,
    },

    /// A step or nested group was added before any `on`/`otherwise`.
    #[error("'{step}' must be declared within an on or otherwise block of branch group '{group}'")]
    StepOutsideBranch {
        /// The group name.
        group: String,
        /// The offending step or nested group.
        step: String,
    },

    /// A branch group declared no branches at all.
    #[error("branch group '{group}' declares no on or otherwise block")]
    EmptyBranchGroup {
        /// The group name.
        group: String,
    },

    /// Transactions were requested but no transaction manager was given.
    #[error("workflow '{workflow}' requires a transaction manager")]
    MissingTransactionManager {
        /// The workflow name.
        workflow: String,
    },

    /// A configuration file could not be parsed.
    #[error("invalid workflow configuration file: {0}")]
    Parse(String),
}

/// Errors that can occur during workflow definition or execution.
///
/// Callers tell outcomes apart by matching on the variant; every variant
/// also exposes a [`code`](WorkflowError::code) and structured
/// [`details`](WorkflowError::details).
///
/// ```
/// use nagare_core::{ErrorCode, ServiceFailure, StepName, WorkflowError};
///
/// fn handle_error(error: &WorkflowError) {
///     match error {
///         WorkflowError::StepFailed { step, failure, .. } => {
///             eprintln!("Step {} failed: {}", step, failure);
///         }
///         WorkflowError::RollbackFailed { step, original, .. } => {
///             eprintln!("Rollback of {} failed after: {}", step, original);
///         }
///         _ => eprintln!("Error: {}", error),
///     }
/// }
///
/// let error = WorkflowError::StepFailed {
///     workflow: "checkout".to_string(),
///     step: StepName::new("charge"),
///     failure: ServiceFailure::execution("card declined"),
/// };
/// handle_error(&error);
/// assert_eq!(error.code(), ErrorCode::StepFailed);
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A non-optional step failed.
    #[error("Step '{step}' failed in workflow '{workflow}': {failure}")]
    StepFailed {
        /// The workflow name.
        workflow: String,
        /// The step that failed.
        step: StepName,
        /// The failure reported for the step.
        failure: ServiceFailure,
    },

    /// No branch matched and the group has no `otherwise` branch.
    #[error("No branch matched in group '{group}' of workflow '{workflow}'")]
    NoBranchMatched {
        /// The workflow name.
        workflow: String,
        /// The unresolved branch group.
        group: String,
    },

    /// A rollback callback failed while compensating for `original`.
    #[error("Rollback of step '{step}' failed in workflow '{workflow}': {source}")]
    RollbackFailed {
        /// The workflow name.
        workflow: String,
        /// The step whose rollback failed.
        step: StepName,
        /// The failure that triggered the rollback.
        original: Box<WorkflowError>,
        /// The rollback callback's own failure.
        source: ServiceFailure,
    },

    /// The workflow definition is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// The transaction boundary failed.
    #[error("Transaction {phase} failed in workflow '{workflow}': {source}")]
    Transaction {
        /// The workflow name.
        workflow: String,
        /// Which operation failed.
        phase: TransactionPhase,
        /// The failure reported by the transaction manager.
        source: ServiceFailure,
    },

    /// The context handed to a run had already failed or been run.
    #[error("Context cannot be run by workflow '{workflow}': {reason}")]
    InvalidContext {
        /// The workflow name.
        workflow: String,
        /// Why the context was refused.
        reason: String,
    },
}

impl WorkflowError {
    /// Returns the machine-readable code of the error.
    pub fn code(&self) -> ErrorCode {
        match self {
            WorkflowError::StepFailed { .. } => ErrorCode::StepFailed,
            WorkflowError::NoBranchMatched { .. } => ErrorCode::BranchNotMatched,
            WorkflowError::RollbackFailed { .. } => ErrorCode::RollbackFailed,
            WorkflowError::Configuration(_) => ErrorCode::ConfigurationError,
            WorkflowError::Transaction { .. } => ErrorCode::TransactionFailed,
            WorkflowError::InvalidContext { .. } => ErrorCode::InvalidContext,
        }
    }

    /// Returns the workflow name, when the error belongs to a run.
    pub fn workflow(&self) -> Option<&str> {
        match self {
            WorkflowError::StepFailed { workflow, .. }
            | WorkflowError::NoBranchMatched { workflow, .. }
            | WorkflowError::RollbackFailed { workflow, .. }
            | WorkflowError::Transaction { workflow, .. }
            | WorkflowError::InvalidContext { workflow, .. } => Some(workflow),
            WorkflowError::Configuration(_) => None,
        }
    }

    /// Returns the error that started the failure chain.
    ///
    /// For [`WorkflowError::RollbackFailed`] this is the failure that
    /// triggered compensation; every other variant is its own root.
    pub fn root_cause(&self) -> &WorkflowError {
        match self {
            WorkflowError::RollbackFailed { original, .. } => original.root_cause(),
            other => other,
        }
    }

    /// Returns structured details about the error.
    pub fn details(&self) -> Map<String, Value> {
        let value = match self {
            WorkflowError::StepFailed {
                workflow,
                step,
                failure,
            } => json!({
                "workflow": workflow,
                "step": step.as_str(),
                "error_code": failure.code,
                "error": failure.message,
                "details": failure.details,
            }),
            WorkflowError::NoBranchMatched { workflow, group } => json!({
                "workflow": workflow,
                "group": group,
            }),
            WorkflowError::RollbackFailed {
                workflow,
                step,
                original,
                source,
            } => json!({
                "workflow": workflow,
                "step": step.as_str(),
                "rollback_error": source.message,
                "original_code": original.code(),
                "original_error": original.to_string(),
                "original_details": original.details(),
            }),
            WorkflowError::Configuration(error) => json!({
                "error": error.to_string(),
            }),
            WorkflowError::Transaction {
                workflow,
                phase,
                source,
            } => json!({
                "workflow": workflow,
                "phase": phase.to_string(),
                "error": source.message,
            }),
            WorkflowError::InvalidContext { workflow, reason } => json!({
                "workflow": workflow,
                "reason": reason,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn step_failed() -> WorkflowError {
        WorkflowError::StepFailed {
            workflow: "checkout".to_string(),
            step: StepName::new("charge_payment"),
            failure: ServiceFailure::execution("card declined"),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            step_failed().to_string(),
            "Step 'charge_payment' failed in workflow 'checkout': card declined"
        );

        let error = WorkflowError::NoBranchMatched {
            workflow: "checkout".to_string(),
            group: "branch_1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "No branch matched in group 'branch_1' of workflow 'checkout'"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(step_failed().code(), ErrorCode::StepFailed);
        assert_eq!(
            WorkflowError::from(ConfigError::EmptyWorkflowName).code(),
            ErrorCode::ConfigurationError
        );
        assert_eq!(ErrorCode::BranchNotMatched.to_string(), "branch_not_matched");
        assert_eq!(
            serde_json::to_value(ErrorCode::RollbackFailed).expect("serializable"),
            json!("rollback_failed")
        );

        let error = WorkflowError::InvalidContext {
            workflow: "checkout".to_string(),
            reason: "context has already been run".to_string(),
        };
        assert_eq!(error.code(), ErrorCode::InvalidContext);
        assert_eq!(error.details()["reason"], json!("context has already been run"));
    }

    #[test]
    fn test_rollback_failed_keeps_original() {
        let error = WorkflowError::RollbackFailed {
            workflow: "checkout".to_string(),
            step: StepName::new("create_order"),
            original: Box::new(step_failed()),
            source: ServiceFailure::execution("refund api down"),
        };

        assert_eq!(error.code(), ErrorCode::RollbackFailed);
        assert!(matches!(
            error.root_cause(),
            WorkflowError::StepFailed { step, .. } if step.as_str() == "charge_payment"
        ));
        assert_eq!(
            error.source().map(|s| s.to_string()),
            Some("refund api down".to_string())
        );

        let details = error.details();
        assert_eq!(details["step"], json!("create_order"));
        assert_eq!(details["original_code"], json!("step_failed"));
        assert_eq!(details["original_details"]["step"], json!("charge_payment"));
    }

    #[test]
    fn test_step_failed_details() {
        let error = WorkflowError::StepFailed {
            workflow: "checkout".to_string(),
            step: StepName::new("charge_payment"),
            failure: ServiceFailure::new(ErrorCode::ValidationFailed, "bad amount")
                .with_detail("field", "amount"),
        };
        let details = error.details();
        assert_eq!(details["error_code"], json!("validation_failed"));
        assert_eq!(details["details"]["field"], json!("amount"));
        assert_eq!(error.workflow(), Some("checkout"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::StepOutsideBranch {
            group: "branch_1".to_string(),
            step: "charge".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "'charge' must be declared within an on or otherwise block of branch group 'branch_1'"
        );
    }

    #[test]
    fn test_transaction_phase_display() {
        assert_eq!(TransactionPhase::Begin.to_string(), "begin");
        assert_eq!(TransactionPhase::Commit.to_string(), "commit");
    }
}
