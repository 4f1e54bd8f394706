//! Step descriptor and related types.

use crate::context::{Actor, Context};
use crate::error::ServiceFailure;
use crate::service::{extract_payload, Service};
use crate::traits::Rollback;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Type-safe step name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StepName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Predicate evaluated against the context.
pub type Guard = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Builds a step's service input from the context.
pub type InputMapper = Arc<dyn Fn(&Context) -> Result<Value, ServiceFailure> + Send + Sync>;

/// A named call to a [`Service`] inside a workflow.
///
/// Steps are plain data: built once when the workflow is defined and shared
/// by every run.
///
/// # Examples
///
/// ```
/// use nagare_core::{service_fn, Actor, Context, ServiceFailure, Step};
/// use serde_json::json;
///
/// let charge = Step::new(
///     "charge_payment",
///     service_fn("charge", |_actor: Actor, input| async move {
///         Ok(json!({ "resource": { "charged": input["amount"] } }))
///     }),
/// )
/// .input(|ctx: &Context| Ok(json!({ "amount": ctx.get("amount").cloned() })))
/// .guard(|ctx: &Context| ctx.get("payment_method") == Some(&json!("card")))
/// .with_rollback(|_ctx: &Context| -> Result<(), ServiceFailure> { Ok(()) })
/// .optional();
///
/// assert_eq!(charge.name().as_str(), "charge_payment");
/// assert!(charge.is_optional());
/// ```
#[derive(Clone)]
pub struct Step {
    name: StepName,
    service: Arc<dyn Service>,
    input: Option<InputMapper>,
    guard: Option<Guard>,
    rollback: Option<Arc<dyn Rollback>>,
    optional: bool,
    merge_payload: bool,
}

impl Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("has_input", &self.input.is_some())
            .field("has_guard", &self.guard.is_some())
            .field("has_rollback", &self.rollback.is_some())
            .field("optional", &self.optional)
            .field("merge_payload", &self.merge_payload)
            .finish()
    }
}

impl Step {
    /// Creates a step that calls `service`.
    pub fn new(name: impl Into<StepName>, service: impl Service + 'static) -> Self {
        Self::with_service(name, Arc::new(service))
    }

    /// Creates a step that calls a shared service.
    pub fn with_service(name: impl Into<StepName>, service: Arc<dyn Service>) -> Self {
        Self {
            name: name.into(),
            service,
            input: None,
            guard: None,
            rollback: None,
            optional: false,
            merge_payload: false,
        }
    }

    /// Sets the function that builds the service input.
    ///
    /// Without one, the service receives the whole context as a JSON object.
    pub fn input<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Context) -> Result<Value, ServiceFailure> + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(mapper));
        self
    }

    /// Runs the step only when `guard` holds.
    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Sets the compensating action run if a later step fails.
    pub fn with_rollback(mut self, rollback: impl Rollback + 'static) -> Self {
        self.rollback = Some(Arc::new(rollback));
        self
    }

    /// Lets the workflow continue when this step fails.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Also merges an object payload's keys into the top-level context.
    pub fn merge_payload(mut self) -> Self {
        self.merge_payload = true;
        self
    }

    /// Returns the step name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns `true` if the step's failure does not abort the workflow.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Returns `true` if the payload is merged into top-level keys.
    pub fn merges_payload(&self) -> bool {
        self.merge_payload
    }

    /// Returns `true` if the step has a compensating action.
    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    /// Returns `true` if the step has no guard or its guard holds.
    pub fn matches(&self, ctx: &Context) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(ctx))
    }

    /// Builds the service input for the current context.
    pub fn build_input(&self, ctx: &Context) -> Result<Value, ServiceFailure> {
        match &self.input {
            Some(mapper) => mapper(ctx),
            None => Ok(ctx.to_value()),
        }
    }

    /// Calls the service and returns the payload it contributes.
    ///
    /// Errors from the input mapper are reported like service errors.
    pub async fn execute(&self, actor: &Actor, ctx: &Context) -> Result<Value, ServiceFailure> {
        let input = self.build_input(ctx)?;
        let payload = self.service.call(actor, input).await?;
        Ok(extract_payload(payload))
    }

    /// Runs the compensating action, if any.
    pub async fn rollback(&self, ctx: &Context) -> Result<(), ServiceFailure> {
        match &self.rollback {
            Some(rollback) => rollback.rollback(ctx).await,
            None => Ok(()),
        }
    }
}
