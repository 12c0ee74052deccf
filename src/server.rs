//! Server builder and accept loop.
//!
//! The [`ServerBuilder`] provides a fluent API for registering jobs and
//! configuring the listener. The [`Server`] manages the lifecycle:
//! 1. Bind the TCP listener
//! 2. Accept connections, one task each
//! 3. Upgrade to WebSocket on the configured path
//! 4. Run a [`ConnectionLoop`] until the client goes away
//!
//! # Example
//!
//! ```no_run
//! use jobwire::handler::JobDescriptor;
//! use jobwire::Server;
//!
//! #[tokio::main]
//! async fn main() -> jobwire::Result<()> {
//!     let server = Server::builder()
//!         .job(JobDescriptor::plain("echo", |args| args.get::<String>("text")).param("text"))
//!         .bind_addr("127.0.0.1:3000")
//!         .bind()
//!         .await?;
//!
//!     server.run().await
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionLoop;
use crate::error::{JobwireError, Result};
use crate::handler::{ConnectionContext, JobDescriptor, JobRegistry};
use crate::transport::{websocket, Inbox};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Default WebSocket endpoint path.
pub const DEFAULT_PATH: &str = "/websocket";

/// Default capacity of each connection's inbound chunk queue.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Path accepted for the WebSocket upgrade.
    pub path: String,
    /// Inbound chunks buffered per connection.
    pub inbound_capacity: usize,
    /// Outbound writer settings.
    pub writer: WriterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            path: DEFAULT_PATH.to_string(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            writer: WriterConfig::default(),
        }
    }
}

/// Builder for configuring and creating a server.
pub struct ServerBuilder {
    registry: JobRegistry,
    config: ServerConfig,
    registration_error: Option<JobwireError>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            registry: JobRegistry::new(),
            config: ServerConfig::default(),
            registration_error: None,
        }
    }

    /// Register a job.
    ///
    /// A duplicate name is reported by [`ServerBuilder::bind`].
    pub fn job(mut self, descriptor: JobDescriptor) -> Self {
        if let Err(e) = self.registry.register(descriptor) {
            self.registration_error.get_or_insert(e);
        }
        self
    }

    /// Add every job from a registry built elsewhere.
    ///
    /// Jobs already added with [`ServerBuilder::job`] are kept. A name
    /// present in both is reported by [`ServerBuilder::bind`].
    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        if let Err(e) = self.registry.merge(registry) {
            self.registration_error.get_or_insert(e);
        }
        self
    }

    /// Jobs registered so far.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the listen address.
    ///
    /// Default: 127.0.0.1:3000
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Set the WebSocket endpoint path.
    ///
    /// Default: /websocket
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the inbound chunk queue capacity.
    ///
    /// Default: 64
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Validate registrations and bind the listener.
    pub async fn bind(self) -> Result<Server> {
        if let Some(e) = self.registration_error {
            return Err(e);
        }

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            path = %self.config.path,
            jobs = self.registry.len(),
            "Listening"
        );

        Ok(Server {
            listener,
            registry: Arc::new(self.registry),
            config: Arc::new(self.config),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound server, ready to accept connections.
pub struct Server {
    listener: TcpListener,
    registry: Arc<JobRegistry>,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(futures::future::pending()).await
    }

    /// Accept connections until `shutdown` completes, then cancel every open
    /// connection.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let shutdown_token = CancellationToken::new();
        let mut next_id = 0u64;
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            next_id += 1;
            let id = next_id;
            let registry = self.registry.clone();
            let config = self.config.clone();
            let cancel = shutdown_token.child_token();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, id, registry, config, cancel).await {
                    tracing::warn!(connection = id, peer = %peer, error = %e, "Connection failed");
                }
            });
        }

        tracing::info!("Shutting down");
        shutdown_token.cancel();
        Ok(())
    }
}

/// Serve one TCP connection.
async fn handle_connection(
    stream: TcpStream,
    id: u64,
    registry: Arc<JobRegistry>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) -> Result<()> {
    let ws = websocket::accept(stream, &config.path).await?;
    let (sink, source) = ws.split();

    let (inbound_tx, inbox) = Inbox::channel(config.inbound_capacity);
    let reader = websocket::spawn_reader(source, inbound_tx, cancel.clone());
    let (writer, writer_task) =
        spawn_writer_task(websocket::frame_sink(sink), config.writer.clone(), cancel.clone());

    let context = ConnectionContext::with_writer(id, writer, cancel.clone());
    ConnectionLoop::new(registry, inbox, context).run().await;

    cancel.cancel();
    join_reader(id, reader).await;
    match writer_task.await {
        Ok(Err(e)) => {
            tracing::debug!(connection = id, error = %e, "Writer closed with error");
        }
        Err(e) => return Err(JobwireError::Transport(e.to_string())),
        Ok(Ok(())) => {}
    }
    Ok(())
}

/// Wait for the reader task. Returns false if it panicked or was aborted.
async fn join_reader(id: u64, reader: JoinHandle<()>) -> bool {
    match reader.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(connection = id, error = %e, "Reader task failed");
            false
        }
    }
}
