//! Job descriptors: name, parameter shape, and handler.
//!
//! A handler declares up front which of the four calling conventions it
//! uses, so dispatch is an exhaustive `match` rather than an inspection of
//! whatever the job returned:
//!
//! | Kind | Produces |
//! |------|----------|
//! | [`JobHandler::Plain`] | one value, computed synchronously |
//! | [`JobHandler::Deferred`] | one value, awaited |
//! | [`JobHandler::Finite`] | a bounded iterator of values |
//! | [`JobHandler::Stream`] | an awaited, possibly unbounded async stream |
//!
//! # Example
//!
//! ```
//! use jobwire::handler::JobDescriptor;
//! use serde_json::json;
//!
//! let echo = JobDescriptor::plain("echo", |args| args.get::<String>("text"))
//!     .param("text")
//!     .with_description("Return the text parameter");
//!
//! let sum3 = JobDescriptor::plain("sum3", |args| {
//!     Ok(args.get::<i64>("a")? + args.get::<i64>("b")?)
//! })
//! .param("a")
//! .param_default("b", json!(0));
//!
//! assert_eq!(echo.parameters().len(), 1);
//! assert!(sum3.parameters()[1].has_default());
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use super::Arguments;

/// Parameter name bound to the request's payload stream.
pub const DATA_STREAM: &str = "dataStream";

/// Parameter name bound to the connection context.
pub const CONNECTION: &str = "connection";

/// True for the parameter names the binder fills from context.
#[inline]
pub fn is_context_name(name: &str) -> bool {
    name == DATA_STREAM || name == CONNECTION
}

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type returned by job code.
pub type JobResult<T> = anyhow::Result<T>;

/// Stream of results produced by a streaming job.
pub type ResultStream = BoxStream<'static, JobResult<Value>>;

/// What an invocation produced.
pub enum Outcome {
    /// Exactly one value.
    Value(Value),
    /// Zero or more values, one response frame each.
    Stream(ResultStream),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Outcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

type PlainFn = dyn Fn(Arguments) -> JobResult<Value> + Send + Sync;
type DeferredFn = dyn Fn(Arguments) -> BoxFuture<'static, JobResult<Value>> + Send + Sync;
type FiniteFn = dyn Fn(Arguments) -> JobResult<ValueIter> + Send + Sync;
type StreamFn = dyn Fn(Arguments) -> BoxFuture<'static, JobResult<ResultStream>> + Send + Sync;

/// Iterator produced by a finite-stream job.
pub type ValueIter = Box<dyn Iterator<Item = JobResult<Value>> + Send>;

/// Calling convention of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Plain,
    Deferred,
    FiniteStream,
    UnboundedStream,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Plain => "plain",
            HandlerKind::Deferred => "deferred",
            HandlerKind::FiniteStream => "finite-stream",
            HandlerKind::UnboundedStream => "stream",
        }
    }

    /// True for kinds that answer with a result stream.
    pub fn is_stream(&self) -> bool {
        matches!(self, HandlerKind::FiniteStream | HandlerKind::UnboundedStream)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job's callable, tagged with its calling convention.
#[derive(Clone)]
pub enum JobHandler {
    Plain(Arc<PlainFn>),
    Deferred(Arc<DeferredFn>),
    Finite(Arc<FiniteFn>),
    Stream(Arc<StreamFn>),
}

fn to_json<T: Serialize>(value: T) -> JobResult<Value> {
    Ok(serde_json::to_value(value)?)
}

impl JobHandler {
    /// Synchronous job returning one value.
    pub fn plain<F, T>(f: F) -> Self
    where
        F: Fn(Arguments) -> JobResult<T> + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        JobHandler::Plain(Arc::new(move |args| to_json(f(args)?)))
    }

    /// Async job returning one value.
    pub fn deferred<F, Fut, T>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<T>> + Send + 'static,
        T: Serialize + 'static,
    {
        JobHandler::Deferred(Arc::new(
            move |args: Arguments| -> BoxFuture<'static, JobResult<Value>> {
                let fut = f(args);
                Box::pin(async move { to_json(fut.await?) })
            },
        ))
    }

    /// Job returning a bounded sequence of values.
    pub fn finite<F, I, T>(f: F) -> Self
    where
        F: Fn(Arguments) -> JobResult<I> + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Serialize + 'static,
    {
        JobHandler::Finite(Arc::new(move |args| {
            let items = f(args)?.into_iter().map(to_json);
            Ok::<ValueIter, anyhow::Error>(Box::new(items))
        }))
    }

    /// Async job resolving to a stream of values.
    pub fn stream<F, Fut, S, T>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<S>> + Send + 'static,
        S: Stream<Item = JobResult<T>> + Send + 'static,
        T: Serialize + 'static,
    {
        JobHandler::Stream(Arc::new(
            move |args: Arguments| -> BoxFuture<'static, JobResult<ResultStream>> {
                let fut = f(args);
                Box::pin(async move {
                    let items = fut.await?;
                    let items: ResultStream = items.map(|item| item.and_then(to_json)).boxed();
                    Ok::<_, anyhow::Error>(items)
                })
            },
        ))
    }

    pub fn kind(&self) -> HandlerKind {
        match self {
            JobHandler::Plain(_) => HandlerKind::Plain,
            JobHandler::Deferred(_) => HandlerKind::Deferred,
            JobHandler::Finite(_) => HandlerKind::FiniteStream,
            JobHandler::Stream(_) => HandlerKind::UnboundedStream,
        }
    }

    /// Invoke the job. Nothing runs until the returned future is polled.
    ///
    /// Deferred work is resolved before the outcome is classified, so a
    /// stream job's setup future is awaited here and only its items are
    /// left to the caller.
    pub fn invoke(&self, args: Arguments) -> BoxFuture<'static, JobResult<Outcome>> {
        match self {
            JobHandler::Plain(f) => {
                let f = f.clone();
                Box::pin(async move { f(args).map(Outcome::Value) })
            }
            JobHandler::Deferred(f) => {
                let f = f.clone();
                Box::pin(async move { f(args).await.map(Outcome::Value) })
            }
            JobHandler::Finite(f) => {
                let f = f.clone();
                Box::pin(async move {
                    let items = f(args)?;
                    Ok::<_, anyhow::Error>(Outcome::Stream(stream::iter(items).boxed()))
                })
            }
            JobHandler::Stream(f) => {
                let f = f.clone();
                Box::pin(async move { f(args).await.map(Outcome::Stream) })
            }
        }
    }
}

impl fmt::Debug for JobHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobHandler::{}", self.kind())
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    name: String,
    default: Option<Value>,
}

impl ParameterSpec {
    /// A parameter the client must supply.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// A parameter with a default value.
    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[inline]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// True for `dataStream` and `connection`.
    #[inline]
    pub fn is_context_slot(&self) -> bool {
        is_context_name(&self.name)
    }
}

/// Static metadata about a registered job.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    name: String,
    handler: JobHandler,
    parameters: Vec<ParameterSpec>,
    accepts_extra: bool,
    description: String,
}

impl JobDescriptor {
    /// Create a descriptor with no declared parameters.
    pub fn new(name: impl Into<String>, handler: JobHandler) -> Self {
        Self {
            name: name.into(),
            handler,
            parameters: Vec::new(),
            accepts_extra: false,
            description: String::new(),
        }
    }

    /// Shorthand for `JobDescriptor::new(name, JobHandler::plain(f))`.
    pub fn plain<F, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arguments) -> JobResult<T> + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        Self::new(name, JobHandler::plain(f))
    }

    /// Shorthand for `JobDescriptor::new(name, JobHandler::deferred(f))`.
    pub fn deferred<F, Fut, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<T>> + Send + 'static,
        T: Serialize + 'static,
    {
        Self::new(name, JobHandler::deferred(f))
    }

    /// Shorthand for `JobDescriptor::new(name, JobHandler::finite(f))`.
    pub fn finite<F, I, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arguments) -> JobResult<I> + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Serialize + 'static,
    {
        Self::new(name, JobHandler::finite(f))
    }

    /// Shorthand for `JobDescriptor::new(name, JobHandler::stream(f))`.
    pub fn stream<F, Fut, S, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<S>> + Send + 'static,
        S: Stream<Item = JobResult<T>> + Send + 'static,
        T: Serialize + 'static,
    {
        Self::new(name, JobHandler::stream(f))
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterSpec::required(name));
        self
    }

    /// Declare a parameter with a default value.
    pub fn param_default(mut self, name: impl Into<String>, default: Value) -> Self {
        self.parameters.push(ParameterSpec::with_default(name, default));
        self
    }

    /// Accept any additional named parameters, and always receive both
    /// context values.
    pub fn extra_params(mut self) -> Self {
        self.accepts_extra = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn handler(&self) -> &JobHandler {
        &self.handler
    }

    #[inline]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    #[inline]
    pub fn accepts_extra(&self) -> bool {
        self.accepts_extra
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// True if `name` is a declared parameter.
    pub fn declares(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }
}
