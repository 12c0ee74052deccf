//! Transport module - inbound chunk queue and the WebSocket adapter.
//!
//! The dispatch core only sees:
//! - an [`Inbox`] of [`Inbound`] chunks (receive side)
//! - a `futures::Sink<Bytes>` driven by the writer task (send side)
//!
//! [`websocket`] adapts a tokio-tungstenite stream to both.

mod inbox;
pub mod websocket;

pub use inbox::{Inbound, Inbox, PayloadStream, SharedInbox};
