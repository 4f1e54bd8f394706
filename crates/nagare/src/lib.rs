//! A lightweight service-object workflow engine for Rust.
//!
//! A workflow is an ordered list of named steps and branch groups. Each
//! step calls a [`Service`], its payload is stored on the shared
//! [`Context`], and when a later step fails the steps that already ran are
//! rolled back in reverse order.
//!
//! # Example
//!
//! ```rust
//! use nagare::prelude::*;
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() {
//!     let create_order = service_fn("create_order", |_actor: Actor, input: Value| async move {
//!         let order = json!({"id": 1, "total": input["total"].clone()});
//!         Ok::<Value, ServiceFailure>(json!({ "resource": order }))
//!     });
//!     let charge = service_fn("charge", |_actor: Actor, _input: Value| async move {
//!         Ok::<Value, ServiceFailure>(json!({"resource": {"status": "paid"}}))
//!     });
//!
//!     let workflow = Workflow::builder("checkout")
//!         .step(Step::new("create_order", create_order))
//!         .branch(|b| {
//!             b.on(|ctx: &Context| ctx.get_path("create_order.total") != Some(&json!(0)))
//!                 .step(Step::new("charge", charge))
//!         })
//!         .build()
//!         .expect("valid workflow");
//!
//!     let output = workflow
//!         .call(Actor::new("user-1"), json!({"total": 25}))
//!         .await
//!         .expect("workflow failed");
//!
//!     assert_eq!(output.context.get_path("charge.status"), Some(&json!("paid")));
//! }
//! ```

mod branch;
mod builder;
mod config;
mod report;
mod workflow;

// Re-export core types
pub use nagare_core::*;

// Export workflow types
pub use branch::{Branch, BranchGroup, Unit, OTHERWISE};
pub use builder::{BranchGroupBuilder, WorkflowBuilder};
pub use config::WorkflowConfig;
pub use report::{RunMetadata, RunState, WorkflowOutput};
pub use workflow::Workflow;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        service_fn, Actor, BranchGroupBuilder, ConfigError, Context, ContextKey, ErrorCode,
        Rollback, Service, ServiceFailure, Step, StepName, TransactionManager, Workflow,
        WorkflowBuilder, WorkflowConfig, WorkflowError, WorkflowHooks, WorkflowOutput,
    };
}
