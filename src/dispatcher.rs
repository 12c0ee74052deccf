//! Request dispatch: lookup, binding, invocation, and response frames.
//!
//! For one [`Request`] the dispatcher:
//! 1. looks the job up in the registry
//! 2. binds the request parameters to the job's declared shape
//! 3. invokes the handler, catching errors and panics
//! 4. turns the [`Outcome`] into response frames
//!
//! Every per-request failure becomes one error frame. Only transport
//! failures are returned to the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};

use crate::error::{JobwireError, Result};
use crate::handler::{
    bind_arguments, ConnectionContext, JobDescriptor, JobRegistry, Outcome, ResultStream,
};
use crate::protocol::{Request, ResponseFrame};

/// Invokes jobs for one connection.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Run one request to completion.
    ///
    /// Returns `Err` only if the connection is gone; every other failure is
    /// reported to the client as an error frame. A client too slow to take
    /// the error frame within the backpressure timeout does not get it.
    pub async fn dispatch(&self, request: Request, connection: &ConnectionContext) -> Result<()> {
        let job = request.job_name.clone();
        tracing::debug!(connection = connection.id(), job = %job, "Dispatching request");

        let e = match self.execute(request, connection).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => e,
        };

        if !matches!(e, JobwireError::Handler { .. }) {
            tracing::warn!(connection = connection.id(), job = %job, error = %e, "Request rejected");
        }
        match connection
            .send(&ResponseFrame::error(e.client_message()))
            .await
        {
            Err(send_err) if send_err.is_transport() => Err(send_err),
            Err(send_err) => {
                tracing::warn!(connection = connection.id(), job = %job, error = %send_err, "Error frame dropped");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn execute(&self, request: Request, connection: &ConnectionContext) -> Result<()> {
        let Request {
            job_name,
            params,
            payload,
        } = request;

        let descriptor = self.registry.lookup(&job_name)?;
        let args = bind_arguments(&descriptor, params?, payload, connection)?;

        let invocation = AssertUnwindSafe(descriptor.handler().invoke(args)).catch_unwind();
        let invoked = tokio::select! {
            biased;
            _ = connection.cancelled() => return Err(JobwireError::ConnectionClosed),
            invoked = invocation => invoked,
        };

        let outcome = match invoked {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(handler_error(&descriptor, e)),
            Err(panic) => return Err(handler_panic(&descriptor, panic)),
        };

        match outcome {
            Outcome::Value(value) => connection.send(&ResponseFrame::success(value)).await,
            Outcome::Stream(items) => forward_stream(&descriptor, items, connection).await,
        }
    }
}

/// Forward stream items one frame each, then the terminal frame.
///
/// Stops without further frames when the connection is cancelled.
async fn forward_stream(
    descriptor: &JobDescriptor,
    mut items: ResultStream,
    connection: &ConnectionContext,
) -> Result<()> {
    let mut sent = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = connection.cancelled() => {
                tracing::debug!(job = descriptor.name(), sent, "Stream stopped, connection closed");
                return Err(JobwireError::ConnectionClosed);
            }
            next = AssertUnwindSafe(items.next()).catch_unwind() => next,
        };

        match next {
            Ok(Some(Ok(value))) => {
                connection.send(&ResponseFrame::success(value)).await?;
                sent += 1;
            }
            Ok(Some(Err(e))) => return Err(handler_error(descriptor, e)),
            Ok(None) => break,
            Err(panic) => return Err(handler_panic(descriptor, panic)),
        }
    }

    tracing::debug!(job = descriptor.name(), sent, "Stream complete");
    connection.send(&ResponseFrame::done()).await
}

fn handler_error(descriptor: &JobDescriptor, e: anyhow::Error) -> JobwireError {
    tracing::error!(job = descriptor.name(), error = %format!("{:#}", e), "Job failed");
    JobwireError::Handler {
        job: descriptor.name().to_string(),
        message: e.to_string(),
    }
}

fn handler_panic(descriptor: &JobDescriptor, panic: Box<dyn Any + Send>) -> JobwireError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    };

    tracing::error!(job = descriptor.name(), panic = %message, "Job panicked");
    JobwireError::Handler {
        job: descriptor.name().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Params, Status};
    use crate::transport::{Inbox, PayloadStream};
    use crate::writer::spawn_writer_task_default;
    use bytes::Bytes;
    use futures::channel::mpsc as fmpsc;
    use futures::stream;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    fn registry() -> Arc<JobRegistry> {
        let mut registry = JobRegistry::new();
        registry
            .register(JobDescriptor::plain("echo", |args| args.get::<String>("text")).param("text"))
            .unwrap();
        registry
            .register(JobDescriptor::finite("countUp", |_| Ok(vec![1, 2, 3])))
            .unwrap();
        registry
            .register(JobDescriptor::plain("fail", |_| -> anyhow::Result<()> {
                Err(anyhow::anyhow!("disk full").context("writing output"))
            }))
            .unwrap();
        registry
            .register(JobDescriptor::plain("panic", |_| -> anyhow::Result<()> {
                panic!("bad state")
            }))
            .unwrap();
        registry
            .register(JobDescriptor::stream("halfway", |_| async {
                Ok::<_, anyhow::Error>(stream::iter(vec![
                    Ok(json!(1)),
                    Err(anyhow::anyhow!("upstream gone")),
                    Ok(json!(2)),
                ]))
            }))
            .unwrap();
        registry
            .register(JobDescriptor::deferred("forever", |_| async {
                futures::future::pending::<()>().await;
                Ok::<_, anyhow::Error>(())
            }))
            .unwrap();
        Arc::new(registry)
    }

    fn request(job: &str, params: Value) -> Request {
        let (_tx, mut inbox) = Inbox::channel(1);
        let cycle = inbox.begin_cycle();
        let params: Params = match params {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        Request {
            job_name: job.to_string(),
            params: Ok(params),
            payload: PayloadStream::new(inbox.into_shared(), cycle, Bytes::new()),
        }
    }

    async fn run(job: &str, params: Value) -> Vec<ResponseFrame> {
        let (tx, rx) = fmpsc::unbounded::<Bytes>();
        let cancel = CancellationToken::new();
        let (writer, task) = spawn_writer_task_default(tx, cancel.clone());
        let connection = ConnectionContext::with_writer(1, writer, cancel);

        Dispatcher::new(registry())
            .dispatch(request(job, params), &connection)
            .await
            .unwrap();
        drop(connection);
        task.await.unwrap().unwrap();

        rx.map(|bytes| ResponseFrame::decode(&bytes).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_plain_value() {
        let frames = run("echo", json!({"text": "hi"})).await;
        assert_eq!(frames, vec![ResponseFrame::success(json!("hi"))]);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let frames = run("missing", json!({})).await;
        assert_eq!(frames, vec![ResponseFrame::error("Job 'missing' not found.")]);
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let frames = run("echo", json!({})).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].status, Status::Error);
        assert!(frames[0].message.as_deref().unwrap().contains("'text'"));
    }

    #[tokio::test]
    async fn test_malformed_parameters() {
        let (tx, rx) = fmpsc::unbounded::<Bytes>();
        let cancel = CancellationToken::new();
        let (writer, task) = spawn_writer_task_default(tx, cancel.clone());
        let connection = ConnectionContext::with_writer(1, writer, cancel);

        let mut bad = request("echo", json!({}));
        bad.params = Err(JobwireError::MalformedParameters("eof".into()));
        Dispatcher::new(registry()).dispatch(bad, &connection).await.unwrap();
        drop(connection);
        task.await.unwrap().unwrap();

        let frames: Vec<Bytes> = rx.collect().await;
        assert_eq!(
            &frames[0][..],
            br#"{"status":"error","message":"Failed to decode the data as JSON."}"#
        );
    }

    #[tokio::test]
    async fn test_finite_stream_with_terminal_frame() {
        let frames = run("countUp", json!({})).await;
        assert_eq!(frames.len(), 4);
        assert_eq!(
            &frames[..3],
            &[
                ResponseFrame::success(json!(1)),
                ResponseFrame::success(json!(2)),
                ResponseFrame::success(json!(3)),
            ]
        );
        assert!(frames[3].is_done());
    }

    #[tokio::test]
    async fn test_handler_error_message() {
        let frames = run("fail", json!({})).await;
        assert_eq!(
            frames,
            vec![ResponseFrame::error(
                "Job 'fail' encountered an error: writing output"
            )]
        );
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let frames = run("panic", json!({})).await;
        assert_eq!(
            frames,
            vec![ResponseFrame::error("Job 'panic' encountered an error: bad state")]
        );
    }

    #[tokio::test]
    async fn test_stream_error_stops_stream() {
        let frames = run("halfway", json!({})).await;
        assert_eq!(
            frames,
            vec![
                ResponseFrame::success(json!(1)),
                ResponseFrame::error("Job 'halfway' encountered an error: upstream gone"),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancellation_ends_dispatch() {
        let connection = ConnectionContext::new(1);
        let dispatcher = Dispatcher::new(registry());

        let canceller = connection.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            canceller.cancel();
        });

        let err = dispatcher
            .dispatch(request("forever", json!({})), &connection)
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
