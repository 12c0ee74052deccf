//! Request framing on top of the inbound chunk queue.
//!
//! Implements one read cycle per request:
//! - `WaitingForHeader`: accumulate chunks until 8 bytes are buffered
//! - header decode: job name, trimmed
//! - parameter parse: one JSON object from the buffered bytes
//! - everything after the object becomes the request's payload stream
//!
//! # Example
//!
//! ```ignore
//! use jobwire::protocol::FrameReader;
//!
//! let mut reader = FrameReader::new();
//!
//! while let Some(request) = reader.read_request(&inbox).await? {
//!     println!("Got request for job: {}", request.job_name);
//! }
//! ```

use bytes::{Bytes, BytesMut};
use serde_json::{Map, Value};

use super::wire_format::{decode_job_name, HEADER_SIZE};
use crate::error::{JobwireError, Result};
use crate::transport::{Inbound, PayloadStream, SharedInbox};

/// Parameters decoded from the request's JSON blob.
pub type Params = Map<String, Value>;

/// One parsed request.
#[derive(Debug)]
pub struct Request {
    /// Job name from the 8-byte header.
    pub job_name: String,
    /// Decoded parameters, or `MalformedParameters`.
    pub params: Result<Params>,
    /// Remaining payload bytes.
    pub payload: PayloadStream,
}

/// Reads one request per cycle from a connection's inbox.
///
/// Holds no state between cycles other than a reusable buffer.
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    /// Create a new frame reader.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read the next request.
    ///
    /// Returns:
    /// - `Ok(Some(request))` for a request with a decodable header
    /// - `Ok(None)` if the transport closed before a full header arrived
    /// - `Err(MalformedHeader)` if the header could not be decoded; the
    ///   cycle is abandoned and the caller may read again
    pub async fn read_request(&mut self, inbox: &SharedInbox) -> Result<Option<Request>> {
        self.buffer.clear();

        let cycle = {
            let mut guard = inbox.lock().await;
            let cycle = guard.begin_cycle();

            while self.buffer.len() < HEADER_SIZE {
                match guard.recv().await {
                    Some(Inbound::Chunk(bytes)) => self.buffer.extend_from_slice(&bytes),
                    // Stray end-of-message markers between requests are ignored.
                    Some(Inbound::EndOfMessage) if self.buffer.is_empty() => {}
                    Some(Inbound::EndOfMessage) => {
                        guard.end_message();
                        let len = self.buffer.len();
                        self.buffer.clear();
                        return Err(JobwireError::MalformedHeader(format!(
                            "message ended after {} of {} header bytes",
                            len, HEADER_SIZE
                        )));
                    }
                    None => {
                        if !self.buffer.is_empty() {
                            tracing::debug!(
                                "Connection closed with {} header bytes buffered",
                                self.buffer.len()
                            );
                        }
                        return Ok(None);
                    }
                }
            }

            cycle
        };

        let frame = self.buffer.split().freeze();
        let job_name = decode_job_name(&frame)?;
        let (params, residual) = parse_params(frame.slice(HEADER_SIZE..));

        Ok(Some(Request {
            job_name,
            params,
            payload: PayloadStream::new(inbox.clone(), cycle, residual),
        }))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the parameter object at the start of `blob`.
///
/// Returns the parameters and the bytes following the object. An empty or
/// whitespace-only blob is an empty parameter set. On failure the residual
/// is empty, since the payload boundary is unknown.
pub fn parse_params(blob: Bytes) -> (Result<Params>, Bytes) {
    if blob.iter().all(u8::is_ascii_whitespace) {
        return (Ok(Map::new()), Bytes::new());
    }

    let mut values = serde_json::Deserializer::from_slice(&blob).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(params))) => {
            let consumed = values.byte_offset();
            (Ok(params), blob.slice(consumed..))
        }
        Some(Ok(other)) => (
            Err(JobwireError::MalformedParameters(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Bytes::new(),
        ),
        Some(Err(e)) => (
            Err(JobwireError::MalformedParameters(e.to_string())),
            Bytes::new(),
        ),
        None => (Ok(Map::new()), Bytes::new()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
