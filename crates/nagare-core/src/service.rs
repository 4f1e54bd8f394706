//! The service contract steps delegate to.

use crate::context::Actor;
use crate::error::ServiceFailure;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::future::Future;

/// A unit of business logic invoked by a workflow step.
///
/// The engine treats services as opaque: it hands over the actor and the
/// step input and only looks at whether the call succeeded.
///
/// # Examples
///
/// ```
/// use nagare_core::{Actor, Service, ServiceFailure};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// #[derive(Debug)]
/// struct CreateOrder;
///
/// #[async_trait]
/// impl Service for CreateOrder {
///     async fn call(&self, _actor: &Actor, input: Value) -> Result<Value, ServiceFailure> {
///         let amount = input["amount"].as_u64().ok_or("amount is required")?;
///         Ok(json!({ "resource": { "id": 42, "amount": amount } }))
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync + Debug {
    /// Runs the service for `actor` with the given input.
    async fn call(&self, actor: &Actor, input: Value) -> Result<Value, ServiceFailure>;
}

/// A [`Service`] backed by an async closure. Created by [`service_fn`].
pub struct ServiceFn<F> {
    name: &'static str,
    f: F,
}

impl<F> Debug for ServiceFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFn").field("name", &self.name).finish()
    }
}

/// Wraps an async closure as a [`Service`].
///
/// ```
/// use nagare_core::{service_fn, Actor, Service, ServiceFailure};
/// use serde_json::Value;
///
/// let echo = service_fn("echo", |_actor: Actor, input: Value| async move {
///     Ok::<Value, ServiceFailure>(input)
/// });
/// # fn assert_service<S: Service>(_: &S) {}
/// # assert_service(&echo);
/// ```
pub fn service_fn<F, Fut>(name: &'static str, f: F) -> ServiceFn<F>
where
    F: Fn(Actor, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ServiceFailure>> + Send + 'static,
{
    ServiceFn { name, f }
}

#[async_trait]
impl<F, Fut> Service for ServiceFn<F>
where
    F: Fn(Actor, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ServiceFailure>> + Send + 'static,
{
    async fn call(&self, actor: &Actor, input: Value) -> Result<Value, ServiceFailure> {
        (self.f)(actor.clone(), input).await
    }
}

/// Picks the value a service result contributes to the context.
///
/// A payload object carrying `resource` yields that value, one carrying
/// `items` yields the collection, anything else is used whole.
pub fn extract_payload(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            if let Some(resource) = map.remove("resource") {
                resource
            } else if let Some(items) = map.remove("items") {
                items
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}
