//! Core traits and types for the nagare workflow engine.
//!
//! This crate provides the building blocks without the runner itself.
//! Service authors should depend on this crate to implement services,
//! rollbacks and transaction managers.
//!
//! # Core Types
//!
//! - [`Context`] - Per-run key/value state shared by all steps
//! - [`Service`] - The unit of business logic a step calls
//! - [`Step`] - Declarative descriptor binding a name to a service
//! - [`WorkflowError`] - Error types for workflow definition and execution
//!
//! # Callback Traits
//!
//! - [`Rollback`] - Compensating action for an executed step
//! - [`TransactionManager`] - Atomic boundary around a whole run
//! - [`WorkflowHooks`] - Lifecycle callbacks (before/after workflow and step)

mod context;
mod error;
mod service;
mod step;
mod traits;

pub use context::{Actor, Context, ContextError, ContextKey};
pub use error::{ConfigError, ErrorCode, ServiceFailure, TransactionPhase, WorkflowError};
pub use service::{extract_payload, service_fn, Service, ServiceFn};
pub use step::{Guard, InputMapper, Step, StepName};
pub use traits::{Rollback, TransactionManager, WorkflowHooks};
