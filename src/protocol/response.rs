//! Response frames sent back to the client.
//!
//! Every response is a single UTF-8 JSON object:
//!
//! ```text
//! {"status": "success"|"error", "result": <any JSON value>?, "message": <string>?}
//! ```
//!
//! Result streams end with [`ResponseFrame::done`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Message carried by the terminal frame of a result stream.
pub const DONE_MESSAGE: &str = "done";

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// A single response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseFrame {
    /// Successful result. `Value::Null` is sent as `"result": null`.
    pub fn success(result: Value) -> Self {
        Self {
            status: Status::Success,
            result: Some(result),
            message: None,
        }
    }

    /// Error frame with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            result: None,
            message: Some(message.into()),
        }
    }

    /// Terminal frame of a result stream.
    pub fn done() -> Self {
        Self {
            status: Status::Success,
            result: Some(Value::Null),
            message: Some(DONE_MESSAGE.to_string()),
        }
    }

    /// Attach a status message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// True for the terminal frame produced by [`ResponseFrame::done`].
    pub fn is_done(&self) -> bool {
        self.is_success()
            && self.message.as_deref() == Some(DONE_MESSAGE)
            && self.result.as_ref().map_or(true, Value::is_null)
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a frame received from the server.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
