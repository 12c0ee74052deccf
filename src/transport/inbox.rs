//! Inbound chunk queue shared by the frame reader and payload streams.
//!
//! The transport pushes [`Inbound`] items into an mpsc channel. The
//! connection loop reads request headers from it, and the job that handles
//! the request reads the rest of the payload from it through a
//! [`PayloadStream`]. A zero-length chunk marks the end of a message.
//!
//! ```text
//! Transport ─► mpsc::Sender<Inbound> ─► Inbox ─┬─► FrameReader (header + params)
//!                                              └─► PayloadStream (job's dataStream)
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use tokio::sync::{mpsc, Mutex};

/// An item received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A non-empty chunk of bytes.
    Chunk(Bytes),
    /// The client finished the current message.
    EndOfMessage,
}

impl Inbound {
    /// Map raw transport bytes; an empty chunk is the end-of-message marker.
    pub fn from_bytes(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Inbound::EndOfMessage
        } else {
            Inbound::Chunk(bytes)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadState {
    /// The current request's end-of-message marker has not been seen.
    Pending,
    /// End-of-message or disconnect was observed.
    Finished,
}

/// Receiving side of a connection.
///
/// Every request ends with an end-of-message marker. A cycle is over only
/// once that marker has been consumed, so payload chunks are never read as
/// the next request's header.
pub struct Inbox {
    rx: mpsc::Receiver<Inbound>,
    cycle: u64,
    payload: PayloadState,
}

/// Inbox shared between the connection loop and the in-flight job.
pub type SharedInbox = Arc<Mutex<Inbox>>;

impl Inbox {
    pub fn new(rx: mpsc::Receiver<Inbound>) -> Self {
        Self {
            rx,
            cycle: 0,
            payload: PayloadState::Pending,
        }
    }

    /// Create a bounded channel and the inbox reading from it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Inbound>, Inbox) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Inbox::new(rx))
    }

    pub fn into_shared(self) -> SharedInbox {
        Arc::new(Mutex::new(self))
    }

    /// Receive the next item. `None` means the transport is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    /// Start a new request cycle and return its number.
    ///
    /// Payload streams from earlier cycles stop yielding once this is called.
    pub fn begin_cycle(&mut self) -> u64 {
        self.cycle += 1;
        self.payload = PayloadState::Pending;
        self.cycle
    }

    /// Record that the current request's end-of-message marker was consumed.
    pub fn end_message(&mut self) {
        self.payload = PayloadState::Finished;
    }

    /// True once the current request's end-of-message marker was consumed.
    #[inline]
    pub fn message_ended(&self) -> bool {
        self.payload == PayloadState::Finished
    }

    /// Discard whatever is left of the current request, through its
    /// end-of-message marker.
    ///
    /// Returns the number of bytes thrown away, or `None` if the transport
    /// closed first. Does nothing if the marker was already consumed.
    pub async fn drain_payload(&mut self) -> Option<usize> {
        if self.message_ended() {
            return Some(0);
        }

        let mut drained = 0;
        loop {
            match self.rx.recv().await {
                Some(Inbound::Chunk(bytes)) => drained += bytes.len(),
                Some(Inbound::EndOfMessage) => break,
                None => {
                    self.payload = PayloadState::Finished;
                    return None;
                }
            }
        }
        self.payload = PayloadState::Finished;
        Some(drained)
    }
}

/// The request's raw payload, handed to jobs as `dataStream`.
///
/// First yields the bytes that followed the parameter object in the
/// request frame, then pulls further chunks from the connection until the
/// end-of-message marker or disconnect. Single consumption: once it returns
/// `None` it stays exhausted.
pub struct PayloadStream {
    inbox: SharedInbox,
    cycle: u64,
    residual: Option<Bytes>,
    exhausted: bool,
}

impl PayloadStream {
    pub fn new(inbox: SharedInbox, cycle: u64, residual: Bytes) -> Self {
        Self {
            inbox,
            cycle,
            residual: if residual.is_empty() {
                None
            } else {
                Some(residual)
            },
            exhausted: false,
        }
    }

    /// Next chunk of payload, or `None` when the message is complete.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.exhausted {
            return None;
        }
        if let Some(bytes) = self.residual.take() {
            return Some(bytes);
        }

        let mut inbox = self.inbox.lock().await;
        if inbox.cycle != self.cycle || inbox.payload == PayloadState::Finished {
            self.exhausted = true;
            return None;
        }

        match inbox.rx.recv().await {
            Some(Inbound::Chunk(bytes)) => Some(bytes),
            Some(Inbound::EndOfMessage) | None => {
                inbox.payload = PayloadState::Finished;
                self.exhausted = true;
                None
            }
        }
    }

    /// Read every remaining chunk into one buffer.
    pub async fn read_to_end(&mut self) -> Bytes {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }

    /// Convert into a `futures::Stream` of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        stream::unfold(self, |mut payload| async move {
            payload.next_chunk().await.map(|chunk| (chunk, payload))
        })
    }
}

impl std::fmt::Debug for PayloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadStream")
            .field("cycle", &self.cycle)
            .field("residual", &self.residual.as_ref().map(Bytes::len))
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn chunk(data: &'static [u8]) -> Inbound {
        Inbound::Chunk(Bytes::from_static(data))
    }

    #[test]
    fn test_empty_bytes_is_end_of_message() {
        assert_eq!(Inbound::from_bytes(Bytes::new()), Inbound::EndOfMessage);
        assert_eq!(
            Inbound::from_bytes(Bytes::from_static(b"x")),
            Inbound::Chunk(Bytes::from_static(b"x"))
        );
    }

    #[tokio::test]
    async fn test_payload_yields_residual_then_transport() {
        let (tx, mut inbox) = Inbox::channel(8);
        let cycle = inbox.begin_cycle();
        let shared = inbox.into_shared();

        tx.send(chunk(b"world")).await.unwrap();
        tx.send(Inbound::EndOfMessage).await.unwrap();

        let mut payload = PayloadStream::new(shared, cycle, Bytes::from_static(b"hello "));
        assert_eq!(payload.read_to_end().await, Bytes::from_static(b"hello world"));
        assert!(payload.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_payload_ends_on_disconnect() {
        let (tx, mut inbox) = Inbox::channel(8);
        let cycle = inbox.begin_cycle();
        let shared = inbox.into_shared();

        tx.send(chunk(b"abc")).await.unwrap();
        drop(tx);

        let mut payload = PayloadStream::new(shared, cycle, Bytes::new());
        assert_eq!(payload.next_chunk().await, Some(Bytes::from_static(b"abc")));
        assert_eq!(payload.next_chunk().await, None);
    }

    #[tokio::test]
    async fn test_stale_payload_yields_nothing() {
        let (tx, mut inbox) = Inbox::channel(8);
        let cycle = inbox.begin_cycle();
        let shared = inbox.into_shared();
        shared.lock().await.begin_cycle();

        tx.send(chunk(b"next request")).await.unwrap();

        let mut payload = PayloadStream::new(shared.clone(), cycle, Bytes::new());
        assert!(payload.next_chunk().await.is_none());

        // The chunk is still there for the new cycle.
        assert_eq!(shared.lock().await.recv().await, Some(chunk(b"next request")));
    }

    #[tokio::test]
    async fn test_drain_after_partial_read() {
        let (tx, mut inbox) = Inbox::channel(8);
        let cycle = inbox.begin_cycle();
        let shared = inbox.into_shared();

        for part in [&b"aa"[..], b"bbb", b"cccc"] {
            tx.send(Inbound::Chunk(Bytes::copy_from_slice(part))).await.unwrap();
        }
        tx.send(Inbound::EndOfMessage).await.unwrap();
        tx.send(chunk(b"after")).await.unwrap();

        let mut payload = PayloadStream::new(shared.clone(), cycle, Bytes::new());
        assert_eq!(payload.next_chunk().await, Some(Bytes::from_static(b"aa")));

        let mut guard = shared.lock().await;
        assert_eq!(guard.drain_payload().await, Some(7));
        assert_eq!(guard.recv().await, Some(chunk(b"after")));
    }

    #[tokio::test]
    async fn test_drain_untouched_payload_through_marker() {
        let (tx, mut inbox) = Inbox::channel(8);
        inbox.begin_cycle();

        tx.send(chunk(b"payload-bytes-part-2")).await.unwrap();
        tx.send(Inbound::EndOfMessage).await.unwrap();
        tx.send(chunk(b"echo    {}")).await.unwrap();

        assert_eq!(inbox.drain_payload().await, Some(20));
        assert!(inbox.message_ended());
        assert_eq!(inbox.recv().await, Some(chunk(b"echo    {}")));
    }

    #[tokio::test]
    async fn test_drain_after_full_read_is_noop() {
        let (tx, mut inbox) = Inbox::channel(8);
        let cycle = inbox.begin_cycle();
        let shared = inbox.into_shared();

        tx.send(chunk(b"body")).await.unwrap();
        tx.send(Inbound::EndOfMessage).await.unwrap();
        tx.send(chunk(b"echo    {}")).await.unwrap();

        let mut payload = PayloadStream::new(shared.clone(), cycle, Bytes::new());
        assert_eq!(payload.read_to_end().await, Bytes::from_static(b"body"));

        let mut guard = shared.lock().await;
        assert_eq!(guard.drain_payload().await, Some(0));
        assert_eq!(guard.recv().await, Some(chunk(b"echo    {}")));
    }

    #[tokio::test]
    async fn test_drain_reports_disconnect() {
        let (tx, mut inbox) = Inbox::channel(8);
        inbox.begin_cycle();

        tx.send(chunk(b"partial")).await.unwrap();
        drop(tx);

        assert_eq!(inbox.drain_payload().await, None);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (tx, mut inbox) = Inbox::channel(8);
        let cycle = inbox.begin_cycle();
        let shared = inbox.into_shared();

        tx.send(chunk(b"2")).await.unwrap();
        tx.send(chunk(b"3")).await.unwrap();
        tx.send(Inbound::EndOfMessage).await.unwrap();

        let payload = PayloadStream::new(shared, cycle, Bytes::from_static(b"1"));
        let chunks: Vec<Bytes> = payload.into_stream().collect().await;
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"1"),
                Bytes::from_static(b"2"),
                Bytes::from_static(b"3"),
            ]
        );
    }
}
