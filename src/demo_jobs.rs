//! Jobs served by the `jobwire-server` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::{stream, StreamExt};
use serde_json::{json, Value};

use jobwire::handler::{JobDescriptor, JobRegistry, CONNECTION, DATA_STREAM};
use jobwire::Result;

/// Build the registry with every demo job.
pub fn registry() -> Result<JobRegistry> {
    let mut registry = JobRegistry::new();

    registry.register(
        JobDescriptor::plain("test", |args| {
            let job_num = args.value("job_num").cloned().unwrap_or(Value::Null);
            let test = args.value("test").cloned().unwrap_or(Value::Null);
            let keys: Vec<&String> = args.values().keys().collect();
            tracing::info!(%test, %job_num, ?keys, "test job");
            Ok(format!("Job: {}", display(&job_num)))
        })
        .param("test")
        .param("job_num")
        .extra_params()
        .with_description("Log the parameters and echo the job number"),
    )?;

    registry.register(
        JobDescriptor::plain("echo", |args| args.get::<String>("text"))
            .param("text")
            .with_description("Return the text parameter"),
    )?;

    registry.register(
        JobDescriptor::plain("sum3", |args| {
            Ok(args.get::<i64>("a")? + args.get::<i64>("b")? + args.get::<i64>("c")?)
        })
        .param("a")
        .param_default("b", json!(0))
        .param_default("c", json!(0))
        .with_description("Add up to three integers"),
    )?;

    registry.register(
        JobDescriptor::finite("countUp", |args| Ok(1..=args.get::<u64>("n")?))
            .param_default("n", json!(3))
            .with_description("Stream the integers 1..=n"),
    )?;

    registry.register(
        JobDescriptor::deferred("upload", |mut args| async move {
            let data = args
                .take_data_stream()
                .context("no payload stream bound")?;
            let (bytes, chunks) = data
                .into_stream()
                .fold((0usize, 0usize), |(bytes, chunks), chunk| async move {
                    (bytes + chunk.len(), chunks + 1)
                })
                .await;
            Ok::<_, anyhow::Error>(json!({ "bytes": bytes, "chunks": chunks }))
        })
        .param(DATA_STREAM)
        .with_description("Read the request payload and report its size"),
    )?;

    registry.register(
        JobDescriptor::stream("ticker", |args| async move {
            let count = args.get::<u64>("count")?;
            let interval = Duration::from_millis(args.get::<u64>("interval_ms")?);
            let ticks = stream::unfold(0u64, move |tick| async move {
                if tick >= count {
                    return None;
                }
                tokio::time::sleep(interval).await;
                Some((Ok::<_, anyhow::Error>(json!({ "tick": tick + 1 })), tick + 1))
            });
            Ok::<_, anyhow::Error>(ticks)
        })
        .param_default("count", json!(5))
        .param_default("interval_ms", json!(250))
        .with_description("Emit a tick every interval_ms milliseconds"),
    )?;

    registry.register(
        JobDescriptor::deferred("progress", |args| async move {
            let steps = args.get::<u64>("steps")?;
            let connection = args.connection().context("no connection bound")?;
            for step in 1..=steps {
                if connection.is_cancelled() {
                    anyhow::bail!("connection closed at step {}", step);
                }
                connection
                    .send_result(&json!({ "progress": step * 100 / steps.max(1) }))
                    .await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok::<_, anyhow::Error>("finished")
        })
        .param_default("steps", json!(4))
        .param(CONNECTION)
        .with_description("Report progress through the connection, then finish"),
    )?;

    let mut listing: Vec<Value> = registry
        .descriptors()
        .iter()
        .map(|job| {
            json!({
                "name": job.name(),
                "kind": job.handler().kind().as_str(),
                "description": job.description(),
            })
        })
        .collect();
    listing.push(json!({
        "name": "jobs",
        "kind": "plain",
        "description": "List the available jobs",
    }));
    let listing = Arc::new(listing);

    registry.register(
        JobDescriptor::plain("jobs", move |_| Ok(listing.as_ref().clone()))
            .with_description("List the available jobs"),
    )?;

    Ok(registry)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
