//! Builders that assemble a workflow definition.

use crate::branch::{BranchGroup, Unit};
use crate::config::WorkflowConfig;
use crate::workflow::Workflow;
use nagare_core::{ConfigError, Context, Step, TransactionManager, WorkflowError, WorkflowHooks};
use std::sync::Arc;

/// Builder for constructing [`Workflow`] instances.
///
/// Definition mistakes are collected while building and the first one is
/// returned by [`build`](WorkflowBuilder::build).
///
/// ```
/// use nagare::prelude::*;
/// use serde_json::{json, Value};
///
/// let ok = || service_fn("ok", |_actor: Actor, _input: Value| async move {
///     Ok::<Value, ServiceFailure>(json!({}))
/// });
///
/// let workflow = Workflow::builder("checkout")
///     .step(Step::new("validate", ok()))
///     .branch(|b| {
///         b.on(|ctx: &Context| ctx.get("method") == Some(&json!("card")))
///             .step(Step::new("charge_card", ok()))
///             .otherwise()
///             .step(Step::new("manual_review", ok()))
///     })
///     .build()
///     .expect("valid workflow");
///
/// assert_eq!(workflow.units().len(), 2);
/// ```
pub struct WorkflowBuilder {
    name: String,
    units: Vec<Unit>,
    group_seq: usize,
    errors: Vec<ConfigError>,
    config: WorkflowConfig,
    transaction: Option<Arc<dyn TransactionManager>>,
    hooks: Option<Arc<dyn WorkflowHooks>>,
}

impl WorkflowBuilder {
    /// Creates an empty builder for a workflow called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            group_seq: 0,
            errors: Vec::new(),
            config: WorkflowConfig::default(),
            transaction: None,
            hooks: None,
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: Step) -> Self {
        push_unit(&mut self.units, Unit::Step(step), &self.name, &mut self.errors);
        self
    }

    /// Appends a branch group named `branch_<n>`.
    pub fn branch<F>(mut self, f: F) -> Self
    where
        F: FnOnce(BranchGroupBuilder) -> BranchGroupBuilder,
    {
        self.group_seq += 1;
        let name = format!("branch_{}", self.group_seq);
        self.branch_named(name, f)
    }

    /// Appends a branch group with an explicit name.
    pub fn branch_named<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(BranchGroupBuilder) -> BranchGroupBuilder,
    {
        let nested = f(BranchGroupBuilder::new(name, self.group_seq));
        let group = nested.finish(&mut self.group_seq, &mut self.errors);
        push_unit(&mut self.units, Unit::Group(group), &self.name, &mut self.errors);
        self
    }

    /// Replaces the workflow settings.
    ///
    /// A config with `with_transaction = false` disables a transaction
    /// manager given earlier.
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the workflow inside `manager`'s transactions.
    pub fn with_transaction(self, manager: impl TransactionManager + 'static) -> Self {
        self.with_transaction_manager(Arc::new(manager))
    }

    /// Runs the workflow inside a shared transaction manager.
    pub fn with_transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction = Some(manager);
        self.config.with_transaction = true;
        self
    }

    /// Installs lifecycle hooks.
    pub fn hooks(mut self, hooks: impl WorkflowHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Builds the workflow.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyWorkflowName.into());
        }
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error.into());
        }
        if self.config.with_transaction && self.transaction.is_none() {
            return Err(ConfigError::MissingTransactionManager {
                workflow: self.name,
            }
            .into());
        }

        Ok(Workflow::new(
            self.name,
            self.units,
            self.config,
            self.transaction,
            self.hooks,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBranch {
    Guarded,
    Default,
}

/// Collects the branches of one [`BranchGroup`].
///
/// `on` and `otherwise` open a branch; `step` and nested `branch` calls are
/// added to the branch opened last.
pub struct BranchGroupBuilder {
    group: BranchGroup,
    open: Option<OpenBranch>,
    group_seq: usize,
    errors: Vec<ConfigError>,
}

impl BranchGroupBuilder {
    fn new(name: impl Into<String>, group_seq: usize) -> Self {
        Self {
            group: BranchGroup::new(name),
            open: None,
            group_seq,
            errors: Vec::new(),
        }
    }

    /// Opens a branch taken when `predicate` holds.
    pub fn on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.group.add_branch(predicate);
        self.open = Some(OpenBranch::Guarded);
        self
    }

    /// Opens the branch taken when no `on` branch matches.
    pub fn otherwise(mut self) -> Self {
        match self.group.add_default() {
            Ok(_) => self.open = Some(OpenBranch::Default),
            Err(error) => {
                self.errors.push(error);
                self.open = None;
            }
        }
        self
    }

    /// Adds a step to the open branch.
    pub fn step(mut self, step: Step) -> Self {
        let name = step.name().to_string();
        self.push(Unit::Step(step), name);
        self
    }

    /// Adds a nested branch group named `branch_<n>` to the open branch.
    pub fn branch<F>(mut self, f: F) -> Self
    where
        F: FnOnce(BranchGroupBuilder) -> BranchGroupBuilder,
    {
        self.group_seq += 1;
        let name = format!("branch_{}", self.group_seq);
        self.branch_named(name, f)
    }

    /// Adds a nested branch group with an explicit name to the open branch.
    pub fn branch_named<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(BranchGroupBuilder) -> BranchGroupBuilder,
    {
        let nested = f(BranchGroupBuilder::new(name, self.group_seq));
        let group = nested.finish(&mut self.group_seq, &mut self.errors);
        let name = group.name().to_string();
        self.push(Unit::Group(group), name);
        self
    }

    fn push(&mut self, unit: Unit, name: String) {
        let group_name = self.group.name().to_string();
        let branch = match self.open {
            Some(OpenBranch::Guarded) => self.group.last_branch_mut(),
            Some(OpenBranch::Default) => self.group.default_mut(),
            None => None,
        };
        match branch {
            Some(branch) => {
                let scope = format!("{}:{}", group_name, branch.name());
                push_unit(branch.units_mut(), unit, &scope, &mut self.errors);
            }
            None => self.errors.push(ConfigError::StepOutsideBranch {
                group: group_name,
                step: name,
            }),
        }
    }

    fn finish(self, group_seq: &mut usize, errors: &mut Vec<ConfigError>) -> BranchGroup {
        *group_seq = self.group_seq;
        errors.extend(self.errors);
        if self.group.is_empty() {
            errors.push(ConfigError::EmptyBranchGroup {
                group: self.group.name().to_string(),
            });
        }
        self.group
    }
}

/// Adds `unit` to a scope, rejecting empty and duplicate sibling names.
fn push_unit(units: &mut Vec<Unit>, unit: Unit, scope: &str, errors: &mut Vec<ConfigError>) {
    if unit.name().trim().is_empty() {
        errors.push(ConfigError::EmptyName {
            scope: scope.to_string(),
        });
        return;
    }

    let duplicate = units.iter().any(|existing| match (existing, &unit) {
        (Unit::Step(a), Unit::Step(b)) => a.name() == b.name(),
        (Unit::Group(a), Unit::Group(b)) => a.name() == b.name(),
        _ => false,
    });
    if duplicate {
        let name = unit.name().to_string();
        let scope = scope.to_string();
        errors.push(match unit {
            Unit::Step(_) => ConfigError::DuplicateStep { scope, name },
            Unit::Group(_) => ConfigError::DuplicateBranchGroup { scope, name },
        });
        return;
    }

    units.push(unit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nagare_core::{service_fn, Actor, ServiceFailure};
    use serde_json::{json, Value};

    fn noop(name: &str) -> Step {
        Step::new(
            name,
            service_fn("noop", |_actor: Actor, _input: Value| async move {
                Ok::<Value, ServiceFailure>(json!({}))
            }),
        )
    }

    fn config_error(result: Result<Workflow, WorkflowError>) -> ConfigError {
        match result {
            Err(WorkflowError::Configuration(error)) => error,
            other => panic!(
                "expected a configuration error, got {:?}",
                other.map(|w| w.name().to_string())
            ),
        }
    }

    #[derive(Debug)]
    struct NoopTransaction;

    #[async_trait]
    impl TransactionManager for NoopTransaction {
        async fn begin(&self) -> Result<(), ServiceFailure> {
            Ok(())
        }

        async fn commit(&self) -> Result<(), ServiceFailure> {
            Ok(())
        }

        async fn rollback(&self) -> Result<(), ServiceFailure> {
            Ok(())
        }
    }

    #[test]
    fn test_build_sequential() {
        let workflow = WorkflowBuilder::new("signup")
            .step(noop("create_user"))
            .step(noop("send_welcome"))
            .build()
            .expect("valid workflow");

        let names: Vec<_> = workflow.units().iter().map(Unit::name).collect();
        assert_eq!(names, vec!["create_user", "send_welcome"]);
        assert!(!workflow.is_transactional());
    }

    #[test]
    fn test_empty_workflow_name() {
        let error = config_error(WorkflowBuilder::new("  ").step(noop("a")).build());
        assert_eq!(error, ConfigError::EmptyWorkflowName);
    }

    #[test]
    fn test_duplicate_top_level_step() {
        let error = config_error(
            WorkflowBuilder::new("signup")
                .step(noop("create_user"))
                .step(noop("create_user"))
                .build(),
        );
        assert_eq!(
            error,
            ConfigError::DuplicateStep {
                scope: "signup".to_string(),
                name: "create_user".to_string(),
            }
        );
    }

    #[test]
    fn test_same_step_name_in_different_branches() {
        let workflow = WorkflowBuilder::new("route")
            .step(noop("notify"))
            .branch(|b| {
                b.on(|_: &Context| true)
                    .step(noop("notify"))
                    .otherwise()
                    .step(noop("notify"))
            })
            .build();
        assert!(workflow.is_ok());
    }

    #[test]
    fn test_duplicate_step_in_branch() {
        let error = config_error(
            WorkflowBuilder::new("route")
                .branch(|b| b.on(|_: &Context| true).step(noop("a")).step(noop("a")))
                .build(),
        );
        assert_eq!(
            error,
            ConfigError::DuplicateStep {
                scope: "branch_1:on_1".to_string(),
                name: "a".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_otherwise() {
        let error = config_error(
            WorkflowBuilder::new("route")
                .branch(|b| {
                    b.on(|_: &Context| true)
                        .step(noop("a"))
                        .otherwise()
                        .step(noop("b"))
                        .otherwise()
                })
                .build(),
        );
        assert_eq!(
            error,
            ConfigError::DuplicateOtherwise {
                group: "branch_1".to_string()
            }
        );
    }

    #[test]
    fn test_step_outside_branch() {
        let error = config_error(
            WorkflowBuilder::new("route")
                .branch(|b| b.step(noop("orphan")).on(|_: &Context| true))
                .build(),
        );
        assert_eq!(
            error,
            ConfigError::StepOutsideBranch {
                group: "branch_1".to_string(),
                step: "orphan".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_branch_group() {
        let error = config_error(WorkflowBuilder::new("route").branch(|b| b).build());
        assert_eq!(
            error,
            ConfigError::EmptyBranchGroup {
                group: "branch_1".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_group_name() {
        let error = config_error(
            WorkflowBuilder::new("route")
                .branch_named("payment", |b| b.otherwise().step(noop("a")))
                .branch_named("payment", |b| b.otherwise().step(noop("b")))
                .build(),
        );
        assert_eq!(
            error,
            ConfigError::DuplicateBranchGroup {
                scope: "route".to_string(),
                name: "payment".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_step_name() {
        let error = config_error(WorkflowBuilder::new("route").step(noop("")).build());
        assert_eq!(
            error,
            ConfigError::EmptyName {
                scope: "route".to_string()
            }
        );
    }

    #[test]
    fn test_group_numbering_spans_nesting() {
        let workflow = WorkflowBuilder::new("route")
            .branch(|b| {
                b.on(|_: &Context| true)
                    .branch(|inner| inner.otherwise().step(noop("a")))
            })
            .branch(|b| b.otherwise().step(noop("b")))
            .build()
            .expect("valid workflow");

        let names: Vec<_> = workflow.units().iter().map(Unit::name).collect();
        assert_eq!(names, vec!["branch_1", "branch_3"]);

        let Unit::Group(outer) = &workflow.units()[0] else {
            panic!("expected a branch group");
        };
        let nested: Vec<_> = outer.branches()[0].units().iter().map(Unit::name).collect();
        assert_eq!(nested, vec!["branch_2"]);
    }

    #[test]
    fn test_missing_transaction_manager() {
        let error = config_error(
            WorkflowBuilder::new("checkout")
                .config(WorkflowConfig::transactional())
                .step(noop("a"))
                .build(),
        );
        assert_eq!(
            error,
            ConfigError::MissingTransactionManager {
                workflow: "checkout".to_string()
            }
        );
    }

    #[test]
    fn test_with_transaction() {
        let workflow = WorkflowBuilder::new("checkout")
            .step(noop("a"))
            .with_transaction(NoopTransaction)
            .build()
            .expect("valid workflow");
        assert!(workflow.is_transactional());

        let workflow = WorkflowBuilder::new("checkout")
            .step(noop("a"))
            .with_transaction(NoopTransaction)
            .config(WorkflowConfig::default())
            .build()
            .expect("valid workflow");
        assert!(!workflow.is_transactional());
    }
}
