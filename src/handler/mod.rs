//! Handler module - job definitions, argument binding, and lookup.
//!
//! Provides:
//! - [`JobDescriptor`] - a job's name, parameters, and handler
//! - [`JobRegistry`] - maps job names to descriptors
//! - [`Arguments`] / [`bind_arguments`] - request parameters bound to a job
//! - [`ConnectionContext`] - lets jobs send extra frames and observe disconnect
//!
//! # Example
//!
//! ```
//! use jobwire::handler::{JobDescriptor, JobRegistry};
//! use serde_json::json;
//!
//! let mut registry = JobRegistry::new();
//!
//! // Single-value job
//! registry
//!     .register(JobDescriptor::plain("echo", |args| args.get::<String>("text")).param("text"))
//!     .unwrap();
//!
//! // Streaming job
//! registry
//!     .register(
//!         JobDescriptor::finite("countUp", |args| Ok(1..=args.get::<u32>("n")?))
//!             .param_default("n", json!(3)),
//!     )
//!     .unwrap();
//! ```

mod binder;
mod context;
mod descriptor;
mod registry;

pub use binder::{bind_arguments, Arguments};
pub use context::ConnectionContext;
pub use descriptor::{
    is_context_name, BoxFuture, HandlerKind, JobDescriptor, JobHandler, JobResult, Outcome,
    ParameterSpec, ResultStream, ValueIter, CONNECTION, DATA_STREAM,
};
pub use registry::JobRegistry;
