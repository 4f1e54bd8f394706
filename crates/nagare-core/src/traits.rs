//! Callback traits the engine calls into.

use crate::context::Context;
use crate::error::ServiceFailure;
use crate::step::StepName;
use async_trait::async_trait;
use std::fmt::Debug;

/// Compensating action for a step that already executed.
///
/// Closures of the shape `Fn(&Context) -> Result<(), ServiceFailure>` are
/// rollbacks too.
///
/// # Examples
///
/// ```
/// use nagare_core::{Context, Rollback, ServiceFailure};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct RefundPayment;
///
/// #[async_trait]
/// impl Rollback for RefundPayment {
///     async fn rollback(&self, ctx: &Context) -> Result<(), ServiceFailure> {
///         let _charge = ctx.get_path("charge_payment.id").ok_or("no charge recorded")?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Rollback: Send + Sync {
    /// Undoes the effects of the step, reading whatever it needs from `ctx`.
    async fn rollback(&self, ctx: &Context) -> Result<(), ServiceFailure>;
}

#[async_trait]
impl<F> Rollback for F
where
    F: Fn(&Context) -> Result<(), ServiceFailure> + Send + Sync,
{
    async fn rollback(&self, ctx: &Context) -> Result<(), ServiceFailure> {
        self(ctx)
    }
}

/// An atomic transaction boundary around a whole run.
///
/// The engine calls `begin` before the first step, `commit` after a
/// successful run and `rollback` after compensating a failed one. Writes
/// that services make through the same store are expected to be discarded
/// by `rollback`.
#[async_trait]
pub trait TransactionManager: Send + Sync + Debug {
    /// Opens the transaction.
    async fn begin(&self) -> Result<(), ServiceFailure>;

    /// Makes the run's writes permanent.
    async fn commit(&self) -> Result<(), ServiceFailure>;

    /// Discards the run's writes.
    async fn rollback(&self) -> Result<(), ServiceFailure>;
}

/// Optional lifecycle callbacks for a workflow.
///
/// A hook that calls [`Context::fail`] aborts the run at that point, with
/// the same rollback as a failing step.
///
/// ```
/// use nagare_core::{Context, StepName, WorkflowHooks};
/// use async_trait::async_trait;
/// use serde_json::Map;
///
/// #[derive(Debug)]
/// struct RequireAmount;
///
/// #[async_trait]
/// impl WorkflowHooks for RequireAmount {
///     async fn before_workflow(&self, ctx: &mut Context) {
///         if !ctx.contains_key("amount") {
///             ctx.fail("amount is required", Map::new());
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait WorkflowHooks: Send + Sync + Debug {
    /// Called once before the first unit runs.
    async fn before_workflow(&self, _ctx: &mut Context) {}

    /// Called once after every unit ran successfully.
    async fn after_workflow(&self, _ctx: &mut Context) {}

    /// Called before a step whose guard matched.
    async fn before_step(&self, _step: &StepName, _ctx: &mut Context) {}

    /// Called after a step succeeded and its payload was stored.
    async fn after_step(&self, _step: &StepName, _ctx: &mut Context) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Actor;

    #[tokio::test]
    async fn test_closure_rollback() {
        let ok = |_ctx: &Context| -> Result<(), ServiceFailure> { Ok(()) };
        let failing = |ctx: &Context| -> Result<(), ServiceFailure> {
            Err(format!("cannot undo for {}", ctx.actor().id()).into())
        };

        let ctx = Context::new(Actor::new("u1"));
        assert!(ok.rollback(&ctx).await.is_ok());
        assert_eq!(
            failing.rollback(&ctx).await,
            Err(ServiceFailure::execution("cannot undo for u1"))
        );
    }
}
