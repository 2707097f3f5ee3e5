//! Registered job targets and type-erased dispatch

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::job::{JobCall, JobDescriptor, UnsupportedJobError};

/// Typed argument tuple of a registered method.
///
/// Implemented for tuples of up to four deserializable values; `()` marks a
/// parameterless method.
pub trait JobArgs: Sized + Send + 'static {
    /// Number of parameters the method declares.
    const ARITY: usize;

    /// Decode positional values into the typed tuple. The error carries the
    /// offending argument position.
    fn from_values(values: &[Value]) -> Result<Self, (usize, serde_json::Error)>;
}

impl JobArgs for () {
    const ARITY: usize = 0;

    fn from_values(_values: &[Value]) -> Result<Self, (usize, serde_json::Error)> {
        Ok(())
    }
}

macro_rules! impl_job_args {
    ($( $len:literal => ($($name:ident : $idx:tt),+) );+ $(;)?) => {
        $(
            impl<$($name),+> JobArgs for ($($name,)+)
            where
                $($name: DeserializeOwned + Send + 'static),+
            {
                const ARITY: usize = $len;

                fn from_values(values: &[Value]) -> Result<Self, (usize, serde_json::Error)> {
                    Ok((
                        $(
                            serde_json::from_value::<$name>(
                                values.get($idx).cloned().unwrap_or(Value::Null),
                            )
                            .map_err(|e| ($idx, e))?,
                        )+
                    ))
                }
            }
        )+
    };
}

impl_job_args! {
    1 => (A0: 0);
    2 => (A0: 0, A1: 1);
    3 => (A0: 0, A1: 1, A2: 2);
    4 => (A0: 0, A1: 1, A2: 2, A3: 3);
}

/// Failure while resolving or invoking a registered method.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("no method registered for `{target}.{method}`")]
    NotRegistered { target: String, method: String },
    #[error("`{target}.{method}` takes {expected} argument(s), record carries {actual}")]
    ArityMismatch {
        target: String,
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("argument {index} of `{target}.{method}` failed to decode: {source}")]
    ArgumentDecode {
        target: String,
        method: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0:#}")]
    Handler(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    target: String,
    method: String,
}

type InvokeFn = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<(), InvokeError>> + Send + Sync>;
type ProbeFn = Box<dyn Fn(&[Value]) -> Result<(), (usize, serde_json::Error)> + Send + Sync>;

struct RegisteredMethod {
    arity: usize,
    probe: ProbeFn,
    invoke: InvokeFn,
}

/// Maps `(target type, method)` pairs to invocable wrappers.
///
/// Populated at startup for every job-bearing type. The executor resolves
/// wrappers here instead of doing any runtime type discovery, and the client
/// validates calls against the same table before a record is created.
/// Anything not representable as a registered, owned-argument method cannot
/// be submitted.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<MethodKey, RegisteredMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target.method` with a typed handler. The handler captures
    /// whatever service instance it needs; its argument tuple defines the
    /// method's parameter list.
    pub fn register<A, F, Fut>(&self, target: &str, method: &str, handler: F)
    where
        A: JobArgs,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = MethodKey {
            target: target.to_string(),
            method: method.to_string(),
        };
        let probe: ProbeFn = Box::new(|values: &[Value]| A::from_values(values).map(|_| ()));

        let (target, method) = (key.target.clone(), key.method.clone());
        let invoke: InvokeFn = Box::new(
            move |values: Vec<Value>| -> BoxFuture<'static, Result<(), InvokeError>> {
                match A::from_values(&values) {
                    Ok(args) => {
                        let fut = handler(args);
                        Box::pin(async move { fut.await.map_err(InvokeError::Handler) })
                    }
                    Err((index, source)) => {
                        let err = InvokeError::ArgumentDecode {
                            target: target.clone(),
                            method: method.clone(),
                            index,
                            source,
                        };
                        Box::pin(async move { Err(err) })
                    }
                }
            },
        );

        self.methods
            .write()
            .expect("method registry lock poisoned")
            .insert(
                key,
                RegisteredMethod {
                    arity: A::ARITY,
                    probe,
                    invoke,
                },
            );
    }

    /// Validate a captured call against the registered method table,
    /// producing the persistable descriptor.
    pub fn validate(&self, call: &JobCall) -> Result<JobDescriptor, UnsupportedJobError> {
        let methods = self.methods.read().expect("method registry lock poisoned");
        let key = MethodKey {
            target: call.target_type.clone(),
            method: call.method.clone(),
        };

        let Some(entry) = methods.get(&key) else {
            if methods.keys().any(|k| k.target == call.target_type) {
                return Err(UnsupportedJobError::UnknownMethod {
                    target: call.target_type.clone(),
                    method: call.method.clone(),
                });
            }
            return Err(UnsupportedJobError::UnknownTarget(call.target_type.clone()));
        };

        if entry.arity != call.args.len() {
            return Err(UnsupportedJobError::ArityMismatch {
                target: call.target_type.clone(),
                method: call.method.clone(),
                expected: entry.arity,
                actual: call.args.len(),
            });
        }

        (entry.probe)(&call.args).map_err(|(index, source)| UnsupportedJobError::ArgumentType {
            target: call.target_type.clone(),
            method: call.method.clone(),
            index,
            source,
        })?;

        Ok(JobDescriptor {
            target_type: call.target_type.clone(),
            method: call.method.clone(),
            args: call.args.clone(),
            queue: call.queue.clone(),
        })
    }

    /// Resolve and invoke the handler for a persisted descriptor.
    pub async fn invoke(&self, descriptor: &JobDescriptor) -> Result<(), InvokeError> {
        let fut = {
            let methods = self.methods.read().expect("method registry lock poisoned");
            let key = MethodKey {
                target: descriptor.target_type.clone(),
                method: descriptor.method.clone(),
            };
            let Some(entry) = methods.get(&key) else {
                return Err(InvokeError::NotRegistered {
                    target: descriptor.target_type.clone(),
                    method: descriptor.method.clone(),
                });
            };
            if entry.arity != descriptor.args.len() {
                return Err(InvokeError::ArityMismatch {
                    target: descriptor.target_type.clone(),
                    method: descriptor.method.clone(),
                    expected: entry.arity,
                    actual: descriptor.args.len(),
                });
            }
            (entry.invoke)(descriptor.args.clone())
        };
        fut.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn sample_registry(seen: Arc<std::sync::Mutex<Vec<(String, u32)>>>) -> MethodRegistry {
        let registry = MethodRegistry::new();
        registry.register("EmailService", "send_newsletter", move |(email, copies): (String, u32)| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push((email, copies));
                Ok(())
            }
        });
        registry
    }

    #[tokio::test]
    async fn registered_method_round_trips() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = sample_registry(Arc::clone(&seen));

        let call = JobCall::method("EmailService", "send_newsletter")
            .arg("a@b.com")
            .unwrap()
            .arg(3u32)
            .unwrap();
        let descriptor = registry.validate(&call).unwrap();

        registry.invoke(&descriptor).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("a@b.com".to_string(), 3)]);
    }

    #[tokio::test]
    async fn parameterless_method() {
        let hits = Arc::new(AtomicU32::new(0));
        let registry = MethodRegistry::new();
        let counter = Arc::clone(&hits);
        registry.register("Cleanup", "run", move |(): ()| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let call = JobCall::method("Cleanup", "run");
        let descriptor = registry.validate(&call).unwrap();
        registry.invoke(&descriptor).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_target_and_method_are_rejected() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = sample_registry(seen);

        let call = JobCall::method("NoSuchService", "run");
        assert!(matches!(
            registry.validate(&call),
            Err(UnsupportedJobError::UnknownTarget(_))
        ));

        let call = JobCall::method("EmailService", "no_such_method");
        assert!(matches!(
            registry.validate(&call),
            Err(UnsupportedJobError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn arity_and_type_mismatches_are_rejected() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = sample_registry(seen);

        let call = JobCall::method("EmailService", "send_newsletter")
            .arg("a@b.com")
            .unwrap();
        assert!(matches!(
            registry.validate(&call),
            Err(UnsupportedJobError::ArityMismatch { expected: 2, actual: 1, .. })
        ));

        let call = JobCall::method("EmailService", "send_newsletter")
            .arg("a@b.com")
            .unwrap()
            .arg("not a number")
            .unwrap();
        assert!(matches!(
            registry.validate(&call),
            Err(UnsupportedJobError::ArgumentType { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn handler_errors_are_reported() {
        let registry = MethodRegistry::new();
        registry.register("Svc", "explode", |(): ()| async {
            Err(anyhow::anyhow!("boom"))
        });

        let call = JobCall::method("Svc", "explode");
        let descriptor = registry.validate(&call).unwrap();
        let err = registry.invoke(&descriptor).await.unwrap_err();
        assert!(matches!(err, InvokeError::Handler(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn invoking_unregistered_descriptor_fails() {
        let registry = MethodRegistry::new();
        let descriptor = JobDescriptor {
            target_type: "Ghost".to_string(),
            method: "walk".to_string(),
            args: Vec::new(),
            queue: None,
        };
        assert!(matches!(
            registry.invoke(&descriptor).await,
            Err(InvokeError::NotRegistered { .. })
        ));
    }
}
