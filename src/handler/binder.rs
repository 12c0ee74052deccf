//! Argument binding: request parameters onto a job's declared shape.
//!
//! Binding order for one request:
//! 1. defaults of declared parameters
//! 2. client values for declared names (or every name, for jobs that
//!    accept extra parameters)
//! 3. `dataStream` / `connection`, when declared or when extras are accepted
//!
//! Client keys named `dataStream` or `connection` never become values.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::descriptor::{is_context_name, JobDescriptor, CONNECTION, DATA_STREAM};
use super::ConnectionContext;
use crate::error::{JobwireError, Result};
use crate::protocol::Params;
use crate::transport::PayloadStream;

/// Values a job is invoked with.
#[derive(Debug)]
pub struct Arguments {
    job: String,
    values: Params,
    data_stream: Option<PayloadStream>,
    connection: Option<ConnectionContext>,
}

impl Arguments {
    /// Name of the job being invoked.
    #[inline]
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Deserialize a bound value.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .get(name)
            .with_context(|| format!("argument '{}' was not bound", name))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("argument '{}' has an unexpected type", name))
    }

    /// Deserialize a bound value, `None` if it is absent or null.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get(name).map(Some),
        }
    }

    #[inline]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Every bound value except the context slots.
    #[inline]
    pub fn values(&self) -> &Params {
        &self.values
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Take the payload stream. Only the first call returns it.
    pub fn take_data_stream(&mut self) -> Option<PayloadStream> {
        self.data_stream.take()
    }

    #[inline]
    pub fn has_data_stream(&self) -> bool {
        self.data_stream.is_some()
    }

    #[inline]
    pub fn connection(&self) -> Option<&ConnectionContext> {
        self.connection.as_ref()
    }

    /// Arguments from a JSON object, with no context values.
    #[cfg(test)]
    pub(crate) fn for_test(job: &str, values: Value) -> Self {
        let values = match values {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        Self {
            job: job.to_string(),
            values,
            data_stream: None,
            connection: None,
        }
    }
}

/// Bind a request onto `descriptor`.
///
/// Fails with `MissingRequiredParameter` if a declared parameter without a
/// default is absent after binding.
pub fn bind_arguments(
    descriptor: &JobDescriptor,
    params: Params,
    payload: PayloadStream,
    connection: &ConnectionContext,
) -> Result<Arguments> {
    let mut values = Params::new();

    for spec in descriptor.parameters() {
        if spec.is_context_slot() {
            continue;
        }
        if let Some(default) = spec.default() {
            values.insert(spec.name().to_string(), default.clone());
        }
    }

    let mut ignored = Vec::new();
    for (key, value) in params {
        if is_context_name(&key) || !(descriptor.accepts_extra() || descriptor.declares(&key)) {
            ignored.push(key);
            continue;
        }
        values.insert(key, value);
    }

    if !ignored.is_empty() {
        tracing::debug!(job = descriptor.name(), ?ignored, "Ignoring parameters");
    }

    if let Some(missing) = descriptor
        .parameters()
        .iter()
        .find(|spec| !spec.is_context_slot() && !values.contains_key(spec.name()))
    {
        return Err(JobwireError::MissingRequiredParameter {
            job: descriptor.name().to_string(),
            name: missing.name().to_string(),
        });
    }

    let extra = descriptor.accepts_extra();
    let data_stream = (extra || descriptor.declares(DATA_STREAM)).then_some(payload);
    let connection = (extra || descriptor.declares(CONNECTION)).then(|| connection.clone());

    Ok(Arguments {
        job: descriptor.name().to_string(),
        values,
        data_stream,
        connection,
    })
}
