//! # jobwire
//!
//! Job-dispatch runtime: clients invoke named server jobs over one
//! persistent WebSocket connection.
//!
//! ## Architecture
//!
//! - **Request frame**: 8-byte job name header, JSON parameter object, raw
//!   payload bytes, then an empty message marking the end of the request
//! - **Response frame**: one JSON object per result, `{"status", "result", "message"}`
//! - **Connection loop**: any number of requests per connection, handled in
//!   order; per-request errors become error frames and the loop continues
//!
//! ## Example
//!
//! ```no_run
//! use jobwire::handler::JobDescriptor;
//! use jobwire::Server;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> jobwire::Result<()> {
//!     let server = Server::builder()
//!         .job(JobDescriptor::plain("echo", |args| args.get::<String>("text")).param("text"))
//!         .job(
//!             JobDescriptor::finite("countUp", |args| Ok(1..=args.get::<u32>("n")?))
//!                 .param_default("n", json!(3)),
//!         )
//!         .bind()
//!         .await?;
//!
//!     server.run().await
//! }
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod writer;

pub use connection::{ConnectionLoop, LoopState};
pub use dispatcher::Dispatcher;
pub use error::{JobwireError, Result};
pub use handler::{Arguments, ConnectionContext, JobDescriptor, JobRegistry};
pub use server::{Server, ServerBuilder, ServerConfig};
