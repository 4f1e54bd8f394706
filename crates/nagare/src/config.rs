//! Per-workflow settings.

use nagare_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime settings of a workflow.
///
/// Usually set through the builder, but can also be loaded from a TOML
/// file with one `[workflows.<name>]` table per workflow:
///
/// ```
/// use nagare::WorkflowConfig;
///
/// let toml = r#"
/// [workflows.checkout]
/// with_transaction = true
/// "#;
///
/// let checkout = WorkflowConfig::load_for(toml, "checkout").expect("valid config");
/// assert!(checkout.with_transaction);
///
/// let other = WorkflowConfig::load_for(toml, "signup").expect("valid config");
/// assert_eq!(other, WorkflowConfig::default());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Run every unit inside the workflow's transaction manager.
    pub with_transaction: bool,
    /// Record guard-skipped steps in the run metadata.
    pub record_skipped: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            with_transaction: false,
            record_skipped: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowsFile {
    #[serde(default)]
    workflows: HashMap<String, WorkflowConfig>,
}

impl WorkflowConfig {
    /// Settings with transactions enabled.
    pub fn transactional() -> Self {
        Self {
            with_transaction: true,
            ..Self::default()
        }
    }

    /// Parses a single workflow table.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads the `[workflows.<name>]` table of a config file.
    ///
    /// Falls back to the defaults when the workflow has no table.
    pub fn load_for(source: &str, name: &str) -> Result<Self, ConfigError> {
        let file: WorkflowsFile =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(file.workflows.get(name).cloned().unwrap_or_default())
    }
}
