//! Per-connection request loop.
//!
//! ```text
//! AwaitingFrame ──request──► Dispatching ──done──► AwaitingFrame
//!       │                         │
//!       └──── transport closed ───┴──────────────► Closed
//! ```
//!
//! Per-request failures never close the loop; only loss of the transport
//! does. Each cycle ends at the request's end-of-message marker: whatever
//! the job left unread is discarded before the next header is read.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::handler::{ConnectionContext, JobRegistry};
use crate::protocol::{FrameReader, Request};
use crate::transport::{Inbox, SharedInbox};

/// State of a [`ConnectionLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next request header.
    AwaitingFrame,
    /// A request is being handled.
    Dispatching,
    /// Terminal; the transport is gone.
    Closed,
}

/// Reads requests from one connection and dispatches them one at a time.
pub struct ConnectionLoop {
    inbox: SharedInbox,
    reader: FrameReader,
    dispatcher: Dispatcher,
    context: ConnectionContext,
    state: LoopState,
    pending: Option<Request>,
    requests: u64,
}

impl ConnectionLoop {
    pub fn new(registry: Arc<JobRegistry>, inbox: Inbox, context: ConnectionContext) -> Self {
        Self {
            inbox: inbox.into_shared(),
            reader: FrameReader::new(),
            dispatcher: Dispatcher::new(registry),
            context,
            state: LoopState::AwaitingFrame,
            pending: None,
            requests: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Requests dispatched so far.
    #[inline]
    pub fn requests(&self) -> u64 {
        self.requests
    }

    #[inline]
    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Run until the transport closes. Returns the number of requests
    /// dispatched.
    pub async fn run(mut self) -> u64 {
        let id = self.context.id();
        tracing::info!(connection = id, "Connection opened");

        while self.state != LoopState::Closed {
            self.step().await;
        }

        self.context.cancel();
        tracing::info!(connection = id, requests = self.requests, "WebSocket connection closed.");
        self.requests
    }

    /// Advance the state machine by one transition.
    pub async fn step(&mut self) -> LoopState {
        self.state = match self.state {
            LoopState::AwaitingFrame => self.await_frame().await,
            LoopState::Dispatching => self.dispatch_pending().await,
            LoopState::Closed => LoopState::Closed,
        };
        self.state
    }

    async fn await_frame(&mut self) -> LoopState {
        let read = tokio::select! {
            biased;
            _ = self.context.cancelled() => return LoopState::Closed,
            read = self.reader.read_request(&self.inbox) => read,
        };

        match read {
            Ok(Some(request)) => {
                self.pending = Some(request);
                LoopState::Dispatching
            }
            Ok(None) => LoopState::Closed,
            Err(e) if e.is_transport() => LoopState::Closed,
            Err(e) => {
                tracing::warn!(connection = self.context.id(), error = %e, "Abandoning request cycle");
                self.finish_cycle().await
            }
        }
    }

    async fn dispatch_pending(&mut self) -> LoopState {
        let Some(request) = self.pending.take() else {
            return LoopState::AwaitingFrame;
        };
        self.requests += 1;

        if let Err(e) = self.dispatcher.dispatch(request, &self.context).await {
            tracing::debug!(connection = self.context.id(), error = %e, "Transport lost during dispatch");
            return LoopState::Closed;
        }

        self.finish_cycle().await
    }

    /// Consume the rest of the current request through its end marker.
    async fn finish_cycle(&self) -> LoopState {
        let drained = tokio::select! {
            biased;
            _ = self.context.cancelled() => return LoopState::Closed,
            drained = drain(&self.inbox) => drained,
        };

        match drained {
            Some(0) => LoopState::AwaitingFrame,
            Some(bytes) => {
                tracing::debug!(connection = self.context.id(), bytes, "Discarded unread payload");
                LoopState::AwaitingFrame
            }
            None => LoopState::Closed,
        }
    }
}

/// Drain the current request. `None` if the transport closed before its
/// end-of-message marker arrived.
async fn drain(inbox: &SharedInbox) -> Option<usize> {
    inbox.lock().await.drain_payload().await
}

impl std::fmt::Debug for ConnectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLoop")
            .field("connection", &self.context.id())
            .field("state", &self.state)
            .field("requests", &self.requests)
            .finish()
    }
}
