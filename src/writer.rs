//! Dedicated writer task for sending response frames.
//!
//! Every frame for a connection goes through one writer task fed by an
//! mpsc channel, so frames leave in the order they were produced and jobs
//! never share a lock on the socket.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher ────┐
//! Job (send) ────┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Sink<Bytes>
//! Job (send) ────┘
//! ```
//!
//! # Benefits
//!
//! - **No lock contention**: Channel-based, not mutex-based
//! - **Batching**: Ready frames are fed to the sink and flushed once
//! - **Backpressure**: Built-in pending count tracking with configurable limits

use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{JobwireError, Result};
use crate::protocol::ResponseFrame;

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch before a flush.
const MAX_BATCH_SIZE: usize = 64;

/// A response frame ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Encoded JSON bytes.
    pub bytes: Bytes,
}

impl OutboundFrame {
    /// Encode a response frame.
    pub fn encode(frame: &ResponseFrame) -> Result<Self> {
        Ok(Self {
            bytes: frame.encode()?,
        })
    }

    /// Size of the encoded frame.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across jobs.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Pending frame count (for backpressure).
    pending: Arc<AtomicUsize>,
    /// Maximum pending frames.
    max_pending: usize,
    /// Backpressure timeout.
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits if backpressure is active, timing out after the configured
    /// duration. Fails with `ConnectionClosed` once the writer task is gone.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            JobwireError::ConnectionClosed
        })
    }

    /// Encode and send a response frame.
    pub async fn send_response(&self, frame: &ResponseFrame) -> Result<()> {
        self.send(OutboundFrame::encode(frame)?).await
    }

    /// Wait for backpressure to clear with timeout.
    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if self.tx.is_closed() {
                return Err(JobwireError::ConnectionClosed);
            }

            if start.elapsed() > self.timeout {
                return Err(JobwireError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Try to send a frame without waiting for backpressure.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(JobwireError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => JobwireError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => JobwireError::ConnectionClosed,
            }
        })
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// A write failure cancels `cancel`, so whatever is producing frames for
/// this connection stops. When every handle is dropped the task closes the
/// sink and exits.
pub fn spawn_writer_task<S>(
    sink: S,
    config: WriterConfig,
    cancel: CancellationToken,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    S: Sink<Bytes> + Unpin + Send + 'static,
    S::Error: Display,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, sink, pending).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Writer stopped");
            cancel.cancel();
        }
        result
    });

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<S>(
    sink: S,
    cancel: CancellationToken,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    S: Sink<Bytes> + Unpin + Send + 'static,
    S::Error: Display,
{
    spawn_writer_task(sink, WriterConfig::default(), cancel)
}

/// Main writer loop - receives frames and feeds them to the sink.
async fn writer_loop<S>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut sink: S,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    S: Sink<Bytes> + Unpin,
    S::Error: Display,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                // Channel closed, clean shutdown
                return sink.close().await.map_err(transport_error);
            }
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut sink, batch).await?;

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Feed a batch of frames in order, then flush once.
async fn write_batch<S>(sink: &mut S, batch: Vec<OutboundFrame>) -> Result<()>
where
    S: Sink<Bytes> + Unpin,
    S::Error: Display,
{
    for frame in batch {
        sink.feed(frame.bytes).await.map_err(transport_error)?;
    }
    sink.flush().await.map_err(transport_error)
}

fn transport_error<E: Display>(e: E) -> JobwireError {
    JobwireError::Transport(e.to_string())
}
