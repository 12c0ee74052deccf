//! Error types for jobwire.

use thiserror::Error;

/// Main error type for all jobwire operations.
#[derive(Debug, Error)]
pub enum JobwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Requested job is not registered.
    #[error("Job '{0}' not found.")]
    UnknownJob(String),

    /// Frame header could not be decoded into a job name.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Parameter blob is not a JSON object.
    #[error("Failed to decode the data as JSON.")]
    MalformedParameters(String),

    /// A declared parameter without default was not supplied.
    #[error("Job '{job}' is missing required parameter '{name}'.")]
    MissingRequiredParameter { job: String, name: String },

    /// Two jobs were registered under the same name.
    #[error("Job '{0}' is already registered")]
    DuplicateJobName(String),

    /// The job handler failed or panicked.
    #[error("Job '{job}' encountered an error: {message}")]
    Handler { job: String, message: String },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport-level failure reported by the outbound sink.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl JobwireError {
    /// True for errors that mean the peer is gone and the connection loop
    /// must stop.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            JobwireError::Io(_)
                | JobwireError::WebSocket(_)
                | JobwireError::ConnectionClosed
                | JobwireError::Transport(_)
        )
    }

    /// Text sent to the client in an error response frame.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

/// Result type alias using JobwireError.
pub type Result<T> = std::result::Result<T, JobwireError>;
