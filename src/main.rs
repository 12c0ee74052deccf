//! jobwire server
//!
//! Entry point for the `jobwire-server` binary.

use std::io::{self, IsTerminal};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use jobwire::server::{Server, DEFAULT_PATH};

mod demo_jobs;

#[derive(Debug, Parser)]
#[command(name = "jobwire-server")]
#[command(about = "Serve jobs over a WebSocket connection", version)]
struct Cli {
    /// Port to listen on
    #[arg(env = "JOBWIRE_PORT", default_value_t = 3000)]
    port: u16,

    /// Interface to bind
    #[arg(long, env = "JOBWIRE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// WebSocket endpoint path
    #[arg(long, env = "JOBWIRE_PATH", default_value = DEFAULT_PATH)]
    path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let registry = demo_jobs::registry().context("failed to register jobs")?;
    let server = Server::builder()
        .with_registry(registry)
        .bind_addr(format!("{}:{}", cli.host, cli.port))
        .path(cli.path)
        .bind()
        .await
        .context("failed to start server")?;

    server.run_until(shutdown_signal()).await?;
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
        futures::future::pending::<()>().await;
    }
}
