//! Job descriptions and call capture

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable, serializable description of a method call to run later.
///
/// A descriptor is self-contained: the target/method pair resolves to a
/// registered handler, and `args` carries concrete, already-evaluated values,
/// so any process holding the same registrations can re-invoke it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Registered type name that owns the method.
    pub target_type: String,
    /// Registered method name on the target type.
    pub method: String,
    /// Ordered argument values, evaluated at submission time.
    pub args: Vec<Value>,
    /// Optional logical queue for routing.
    pub queue: Option<String>,
}

/// A call shape rejected at submission time. Jobs failing these checks are
/// never recorded.
#[derive(Debug, thiserror::Error)]
pub enum UnsupportedJobError {
    #[error("no job target registered under `{0}`")]
    UnknownTarget(String),
    #[error("no method `{method}` registered on `{target}`")]
    UnknownMethod { target: String, method: String },
    #[error("`{target}.{method}` takes {expected} argument(s), {actual} supplied")]
    ArityMismatch {
        target: String,
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("argument {index} of `{target}.{method}` does not match the parameter type: {source}")]
    ArgumentType {
        target: String,
        method: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("argument {index} could not be serialized: {source}")]
    UnserializableArgument {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Builder capturing a method call as concrete values.
///
/// Arguments are serialized immediately at the call site: field reads and
/// computed expressions are evaluated once, here, and never re-evaluated when
/// the job eventually runs. Values that cannot serialize (closures, handles)
/// are rejected up front.
#[derive(Debug, Clone)]
pub struct JobCall {
    pub(crate) target_type: String,
    pub(crate) method: String,
    pub(crate) args: Vec<Value>,
    pub(crate) queue: Option<String>,
    pub(crate) max_retries: Option<u32>,
}

impl JobCall {
    /// Start capturing a call to `target_type.method`.
    pub fn method(target_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            method: method.into(),
            args: Vec::new(),
            queue: None,
            max_retries: None,
        }
    }

    /// Capture a call with its full argument tuple in one step.
    ///
    /// `args` is a tuple matching the method's parameter list (`()` for a
    /// parameterless method). Use [`arg`](Self::arg) instead when a single
    /// parameter is itself a sequence.
    pub fn with_args<A: Serialize>(
        target_type: impl Into<String>,
        method: impl Into<String>,
        args: A,
    ) -> Result<Self, UnsupportedJobError> {
        let values = match serde_json::to_value(args) {
            Ok(Value::Null) => Vec::new(),
            Ok(Value::Array(values)) => values,
            Ok(single) => vec![single],
            Err(source) => return Err(UnsupportedJobError::UnserializableArgument { index: 0, source }),
        };
        let mut call = Self::method(target_type, method);
        call.args = values;
        Ok(call)
    }

    /// Append one argument, evaluated and serialized now.
    pub fn arg<T: Serialize>(mut self, value: T) -> Result<Self, UnsupportedJobError> {
        let index = self.args.len();
        let value = serde_json::to_value(value)
            .map_err(|source| UnsupportedJobError::UnserializableArgument { index, source })?;
        self.args.push(value);
        Ok(self)
    }

    /// Route the job to a named queue.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Override the record's retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}
