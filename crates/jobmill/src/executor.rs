//! Job execution

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::job::JobDescriptor;
use crate::registry::MethodRegistry;

/// Uniform result of one execution attempt.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Resolves a job descriptor to a live handler and runs it.
///
/// Nothing escapes `execute`: resolution errors and handler failures alike
/// come back inside the outcome, so callers never need their own guard.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobDescriptor) -> JobOutcome;
}

/// Executor dispatching through a [`MethodRegistry`].
///
/// Looks up the invocable wrapper registered for the descriptor's
/// target/method pair, decodes the arguments into the handler's parameter
/// types, and awaits the invocation; synchronous and asynchronous methods
/// behave the same from here. The method's return value is not inspected.
/// Completing without an error is success.
pub struct RegistryExecutor {
    registry: Arc<MethodRegistry>,
}

impl RegistryExecutor {
    pub fn new(registry: Arc<MethodRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JobExecutor for RegistryExecutor {
    async fn execute(&self, job: &JobDescriptor) -> JobOutcome {
        debug!(target_type = %job.target_type, method = %job.method, "executing job");

        match self.registry.invoke(job).await {
            Ok(()) => JobOutcome::success(),
            Err(e) => {
                error!(
                    target_type = %job.target_type,
                    method = %job.method,
                    error = %e,
                    "job execution failed"
                );
                JobOutcome::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobCall;

    #[tokio::test]
    async fn failures_are_captured_not_propagated() {
        let registry = Arc::new(MethodRegistry::new());
        registry.register("Svc", "explode", |(): ()| async {
            anyhow::bail!("wires crossed")
        });
        let executor = RegistryExecutor::new(Arc::clone(&registry));

        let descriptor = registry.validate(&JobCall::method("Svc", "explode")).unwrap();
        let outcome = executor.execute(&descriptor).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("wires crossed"));
    }

    #[tokio::test]
    async fn success_has_no_error() {
        let registry = Arc::new(MethodRegistry::new());
        registry.register("Svc", "ok", |(): ()| async { Ok(()) });
        let executor = RegistryExecutor::new(Arc::clone(&registry));

        let descriptor = registry.validate(&JobCall::method("Svc", "ok")).unwrap();
        let outcome = executor.execute(&descriptor).await;
        assert!(outcome.success);
        assert!(outcome.error.is_none());
    }
}
