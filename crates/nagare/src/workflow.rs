//! Workflow engine for executing steps and branch groups.

use crate::branch::Unit;
use crate::builder::WorkflowBuilder;
use crate::config::WorkflowConfig;
use crate::report::{RunMetadata, RunState, WorkflowOutput};
use futures::future::BoxFuture;
use futures::FutureExt;
use nagare_core::{
    Actor, Context, ServiceFailure, Step, StepName, TransactionManager, TransactionPhase,
    WorkflowError, WorkflowHooks,
};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// A workflow definition: an ordered list of steps and branch groups.
///
/// Definitions are immutable and can be shared; every [`call`](Workflow::call)
/// starts a fresh run with its own [`Context`].
pub struct Workflow {
    name: String,
    units: Vec<Unit>,
    config: WorkflowConfig,
    transaction: Option<Arc<dyn TransactionManager>>,
    hooks: Option<Arc<dyn WorkflowHooks>>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("units", &self.units.iter().map(Unit::name).collect::<Vec<_>>())
            .field("config", &self.config)
            .field("transaction", &self.transaction)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Mutable state of one run.
struct Run<'w> {
    ctx: Context,
    state: RunState,
    executed: Vec<&'w Step>,
    steps_executed: Vec<StepName>,
    steps_skipped: Vec<StepName>,
    branches_taken: Vec<String>,
    optional_failures: Vec<StepName>,
    started_at: Instant,
}

impl<'w> Run<'w> {
    fn new(ctx: Context) -> Self {
        Self {
            ctx,
            state: RunState::Pending,
            executed: Vec::new(),
            steps_executed: Vec::new(),
            steps_skipped: Vec::new(),
            branches_taken: Vec::new(),
            optional_failures: Vec::new(),
            started_at: Instant::now(),
        }
    }

    fn transition(&mut self, state: RunState) {
        debug!("Run state {} -> {}", self.state, state);
        self.state = state;
    }

    fn record_success(&mut self, step: &'w Step, payload: Value) {
        if step.merges_payload() {
            if let Value::Object(map) = &payload {
                for (key, value) in map {
                    self.ctx.insert(key.as_str(), value.clone());
                }
            }
        }
        self.ctx.insert(step.name().as_str(), payload);
        self.executed.push(step);
        self.steps_executed.push(step.name().clone());
    }

    fn finish(self, workflow: &str) -> WorkflowOutput {
        let duration_ms = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        WorkflowOutput {
            context: self.ctx,
            metadata: RunMetadata {
                workflow: workflow.to_string(),
                state: self.state,
                steps_executed: self.steps_executed,
                steps_skipped: self.steps_skipped,
                branches_taken: self.branches_taken,
                optional_failures: self.optional_failures,
                duration_ms,
            },
        }
    }
}

impl Workflow {
    pub(crate) fn new(
        name: String,
        units: Vec<Unit>,
        config: WorkflowConfig,
        transaction: Option<Arc<dyn TransactionManager>>,
        hooks: Option<Arc<dyn WorkflowHooks>>,
    ) -> Self {
        Self {
            name,
            units,
            config,
            transaction,
            hooks,
        }
    }

    /// Creates a new workflow builder.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// Returns the workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the top-level units in declaration order.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Returns the workflow settings.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Returns `true` if runs are wrapped in a transaction.
    pub fn is_transactional(&self) -> bool {
        self.config.with_transaction && self.transaction.is_some()
    }

    /// Runs the workflow for `actor`, seeding the context with `params`.
    ///
    /// Any non-optional failure is returned as an error after every step
    /// that already executed has been rolled back.
    pub async fn call(&self, actor: Actor, params: Value) -> Result<WorkflowOutput, WorkflowError> {
        self.run_with_context(Context::with_params(actor, params)).await
    }

    /// Runs the workflow over a context prepared by the caller.
    ///
    /// A context is single-use: one that already failed or was returned by
    /// an earlier run is refused with [`WorkflowError::InvalidContext`].
    pub async fn run_with_context(&self, ctx: Context) -> Result<WorkflowOutput, WorkflowError> {
        let span = info_span!("workflow", name = %self.name, actor = %ctx.actor().id());
        self.run(ctx).instrument(span).await
    }

    async fn run(&self, mut ctx: Context) -> Result<WorkflowOutput, WorkflowError> {
        let refused = if ctx.is_invoked() {
            Some("context has already been run")
        } else if ctx.is_failure() {
            Some("context has already failed")
        } else {
            None
        };
        if let Some(reason) = refused {
            warn!("Workflow '{}' refused its context: {}", self.name, reason);
            return Err(WorkflowError::InvalidContext {
                workflow: self.name.clone(),
                reason: reason.to_string(),
            });
        }

        ctx.mark_invoked();
        let mut run = Run::new(ctx);
        let transaction = self.transaction.as_ref().filter(|_| self.config.with_transaction);

        info!("Workflow '{}' started", self.name);
        if let Some(transaction) = transaction {
            transaction
                .begin()
                .await
                .map_err(|source| WorkflowError::Transaction {
                    workflow: self.name.clone(),
                    phase: TransactionPhase::Begin,
                    source,
                })?;
        }

        run.transition(RunState::Running);
        let mut outcome = self.execute(&mut run).await;
        if let Some(transaction) = transaction.filter(|_| outcome.is_ok()) {
            outcome = transaction
                .commit()
                .await
                .map_err(|source| WorkflowError::Transaction {
                    workflow: self.name.clone(),
                    phase: TransactionPhase::Commit,
                    source,
                });
        }

        match outcome {
            Ok(()) => {
                run.transition(RunState::Succeeded);
                let output = run.finish(&self.name);
                info!(
                    "Workflow '{}' completed in {}ms",
                    self.name, output.metadata.duration_ms
                );
                Ok(output)
            }
            Err(failure) => {
                run.ctx.fail(failure.to_string(), failure.details());
                let commit_failed = matches!(
                    failure,
                    WorkflowError::Transaction {
                        phase: TransactionPhase::Commit,
                        ..
                    }
                );
                let surfaced = self.compensate(&mut run, failure).await;
                if let (Some(transaction), false) = (transaction, commit_failed) {
                    if let Err(e) = transaction.rollback().await {
                        error!("Transaction rollback failed in '{}': {}", self.name, e);
                    }
                }
                warn!("Workflow '{}' ended {}: {}", self.name, run.state, surfaced);
                Err(surfaced)
            }
        }
    }

    async fn execute<'w>(&'w self, run: &mut Run<'w>) -> Result<(), WorkflowError> {
        if let Some(hooks) = &self.hooks {
            let hooked = AssertUnwindSafe(hooks.before_workflow(&mut run.ctx))
                .catch_unwind()
                .await;
            self.check_hook(run, "before_workflow", hooked)?;
        }

        self.execute_units(&self.units, run).await?;

        if let Some(hooks) = &self.hooks {
            let hooked = AssertUnwindSafe(hooks.after_workflow(&mut run.ctx))
                .catch_unwind()
                .await;
            self.check_hook(run, "after_workflow", hooked)?;
        }
        Ok(())
    }

    fn execute_units<'w, 'r>(
        &'w self,
        units: &'w [Unit],
        run: &'r mut Run<'w>,
    ) -> BoxFuture<'r, Result<(), WorkflowError>>
    where
        'w: 'r,
    {
        async move {
            for unit in units {
                match unit {
                    Unit::Step(step) => self.execute_step(step, run).await?,
                    Unit::Group(group) => {
                        let resolved = catch_unwind(AssertUnwindSafe(|| group.resolve(&run.ctx)))
                            .map_err(|panic| WorkflowError::StepFailed {
                                workflow: self.name.clone(),
                                step: StepName::new(group.name()),
                                failure: panic_failure("branch predicate", panic.as_ref()),
                            })?;
                        let Some(branch) = resolved else {
                            warn!(
                                "No branch matched in group '{}' and no otherwise declared",
                                group.name()
                            );
                            return Err(WorkflowError::NoBranchMatched {
                                workflow: self.name.clone(),
                                group: group.name().to_string(),
                            });
                        };
                        let label = group.label(branch);
                        debug!("Taking branch '{}'", label);
                        run.branches_taken.push(label);
                        self.execute_units(branch.units(), &mut *run).await?;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn execute_step<'w>(
        &'w self,
        step: &'w Step,
        run: &mut Run<'w>,
    ) -> Result<(), WorkflowError> {
        let matched = catch_unwind(AssertUnwindSafe(|| step.matches(&run.ctx))).map_err(|panic| {
            WorkflowError::StepFailed {
                workflow: self.name.clone(),
                step: step.name().clone(),
                failure: panic_failure("guard", panic.as_ref()),
            }
        })?;
        if !matched {
            debug!("Step '{}' skipped, guard did not match", step.name());
            if self.config.record_skipped {
                run.steps_skipped.push(step.name().clone());
            }
            return Ok(());
        }

        if let Some(hooks) = &self.hooks {
            let hooked = AssertUnwindSafe(hooks.before_step(step.name(), &mut run.ctx))
                .catch_unwind()
                .await;
            self.check_hook(run, step.name().as_str(), hooked)?;
        }

        let outcome = AssertUnwindSafe(step.execute(run.ctx.actor(), &run.ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_failure("service", panic.as_ref())));

        match outcome {
            Ok(payload) => {
                info!("Step '{}' completed successfully", step.name());
                run.record_success(step, payload);
                if let Some(hooks) = &self.hooks {
                    let hooked = AssertUnwindSafe(hooks.after_step(step.name(), &mut run.ctx))
                        .catch_unwind()
                        .await;
                    self.check_hook(run, step.name().as_str(), hooked)?;
                }
                Ok(())
            }
            Err(failure) if step.is_optional() => {
                warn!("Optional step '{}' failed, continuing: {}", step.name(), failure);
                run.optional_failures.push(step.name().clone());
                Ok(())
            }
            Err(failure) => {
                warn!("Step '{}' failed: {}", step.name(), failure);
                Err(WorkflowError::StepFailed {
                    workflow: self.name.clone(),
                    step: step.name().clone(),
                    failure,
                })
            }
        }
    }

    /// Turns a panicking hook, or one that failed the context, into a step
    /// failure at `at`.
    fn check_hook(
        &self,
        run: &Run<'_>,
        at: &str,
        hooked: Result<(), Box<dyn Any + Send>>,
    ) -> Result<(), WorkflowError> {
        if let Err(panic) = hooked {
            let failure = panic_failure("hook", panic.as_ref());
            warn!("Workflow '{}' aborted at '{}': {}", self.name, at, failure);
            return Err(WorkflowError::StepFailed {
                workflow: self.name.clone(),
                step: StepName::new(at),
                failure,
            });
        }
        self.check_aborted(run, at)
    }

    /// Turns a failure recorded on the context by a hook into a step failure.
    fn check_aborted(&self, run: &Run<'_>, at: &str) -> Result<(), WorkflowError> {
        match run.ctx.error() {
            Some(error) => {
                warn!("Workflow '{}' aborted at '{}': {}", self.name, at, error.message);
                let mut failure = ServiceFailure::execution(error.message.clone());
                failure.details = error.details.clone();
                Err(WorkflowError::StepFailed {
                    workflow: self.name.clone(),
                    step: StepName::new(at),
                    failure,
                })
            }
            None => Ok(()),
        }
    }

    /// Rolls back executed steps, most recent first.
    ///
    /// Stops at the first rollback that fails and wraps `failure` in a
    /// [`WorkflowError::RollbackFailed`].
    async fn compensate(&self, run: &mut Run<'_>, failure: WorkflowError) -> WorkflowError {
        info!(
            "Rolling back {} executed step(s) of '{}'",
            run.executed.len(),
            self.name
        );

        while let Some(step) = run.executed.pop() {
            if !step.has_rollback() {
                continue;
            }
            debug!("Rolling back step '{}'", step.name());
            let result = AssertUnwindSafe(step.rollback(&run.ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_failure("rollback", panic.as_ref())));

            if let Err(source) = result {
                error!(
                    "Rollback of step '{}' failed, {} step(s) left as-is: {}",
                    step.name(),
                    run.executed.len(),
                    source
                );
                run.transition(RunState::Failed);
                return WorkflowError::RollbackFailed {
                    workflow: self.name.clone(),
                    step: step.name().clone(),
                    original: Box::new(failure),
                    source,
                };
            }
        }

        run.transition(RunState::RolledBack);
        failure
    }
}

fn panic_failure(origin: &str, panic: &(dyn Any + Send)) -> ServiceFailure {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ServiceFailure::execution(format!("{} panicked: {}", origin, message))
        .with_detail("panic", true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nagare_core::{service_fn, ErrorCode};
    use serde_json::json;
    use std::sync::Mutex;

    fn succeed(name: &str, payload: Value) -> Step {
        Step::new(
            name,
            service_fn("succeed", move |_actor: Actor, _input: Value| {
                let payload = payload.clone();
                async move { Ok::<Value, ServiceFailure>(payload) }
            }),
        )
    }

    fn fail(name: &str) -> Step {
        Step::new(
            name,
            service_fn("fail", |_actor: Actor, _input: Value| async move {
                Err::<Value, ServiceFailure>(ServiceFailure::execution("Intentional failure"))
            }),
        )
    }

    #[tokio::test]
    async fn test_workflow_success() {
        let workflow = Workflow::builder("simple")
            .step(succeed("first", json!({"resource": {"id": 1}})))
            .build()
            .expect("valid workflow");

        let output = workflow
            .call(Actor::new("u1"), json!({"seed": true}))
            .await
            .expect("workflow succeeds");

        assert_eq!(output.get("first"), Some(&json!({"id": 1})));
        assert_eq!(output.get("seed"), Some(&json!(true)));
        assert!(output.context.is_invoked());
        assert_eq!(output.metadata.state, RunState::Succeeded);
        assert_eq!(output.metadata.steps_executed, vec![StepName::new("first")]);
    }

    #[tokio::test]
    async fn test_workflow_failure() {
        let workflow = Workflow::builder("simple")
            .step(fail("broken"))
            .build()
            .expect("valid workflow");

        let result = workflow.call(Actor::system(), Value::Null).await;
        match result {
            Err(WorkflowError::StepFailed {
                workflow,
                step,
                failure,
            }) => {
                assert_eq!(workflow, "simple");
                assert_eq!(step, "broken");
                assert_eq!(failure.message, "Intentional failure");
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.metadata)),
        }
    }

    #[tokio::test]
    async fn test_merge_payload() {
        let workflow = Workflow::builder("merge")
            .step(succeed("load", json!({"user": "alice", "plan": "pro"})).merge_payload())
            .build()
            .expect("valid workflow");

        let output = workflow
            .call(Actor::system(), Value::Null)
            .await
            .expect("workflow succeeds");

        assert_eq!(output.get("user"), Some(&json!("alice")));
        assert_eq!(output.get("plan"), Some(&json!("pro")));
        assert_eq!(output.get("load"), Some(&json!({"user": "alice", "plan": "pro"})));
    }

    #[tokio::test]
    async fn test_panicking_service_is_a_step_failure() {
        let workflow = Workflow::builder("panics")
            .step(Step::new(
                "explode",
                service_fn("explode", |_actor: Actor, input: Value| async move {
                    if input.is_object() {
                        panic!("boom");
                    }
                    Ok::<Value, ServiceFailure>(input)
                }),
            ))
            .build()
            .expect("valid workflow");

        let error = workflow
            .call(Actor::system(), json!({}))
            .await
            .expect_err("panic is a failure");
        match error {
            WorkflowError::StepFailed { failure, .. } => {
                assert_eq!(failure.code, ErrorCode::ExecutionError);
                assert_eq!(failure.message, "service panicked: boom");
                assert_eq!(failure.details.get("panic"), Some(&json!(true)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_record_skipped_can_be_disabled() {
        let workflow = Workflow::builder("skips")
            .config(WorkflowConfig {
                record_skipped: false,
                ..WorkflowConfig::default()
            })
            .step(succeed("never", json!({})).guard(|_: &Context| false))
            .build()
            .expect("valid workflow");

        let output = workflow
            .call(Actor::system(), Value::Null)
            .await
            .expect("workflow succeeds");
        assert!(output.metadata.steps_skipped.is_empty());
        assert!(output.metadata.steps_executed.is_empty());
    }

    #[tokio::test]
    async fn test_compensation_reads_final_context() {
        let seen = Arc::new(Mutex::new(None));
        let recorder = Arc::clone(&seen);
        let workflow = Workflow::builder("compensate")
            .step(
                succeed("reserve", json!({"resource": {"sku": "A-1"}})).with_rollback(
                    move |ctx: &Context| -> Result<(), ServiceFailure> {
                        let sku = ctx.get_path("reserve.sku").cloned();
                        *recorder.lock().map_err(|_| "poisoned")? = sku;
                        Ok(())
                    },
                ),
            )
            .step(fail("charge"))
            .build()
            .expect("valid workflow");

        let error = workflow
            .call(Actor::system(), Value::Null)
            .await
            .expect_err("charge fails");
        assert_eq!(error.code(), ErrorCode::StepFailed);
        assert_eq!(*seen.lock().expect("lock"), Some(json!("A-1")));
    }

    #[test]
    fn test_blocking_call() {
        let workflow = Workflow::builder("blocking")
            .step(succeed("only", json!(1)))
            .build()
            .expect("valid workflow");

        let output = tokio_test::block_on(workflow.call(Actor::system(), Value::Null))
            .expect("workflow succeeds");
        assert_eq!(output.get("only"), Some(&json!(1)));
    }
}
