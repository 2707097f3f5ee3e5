//! Submission-side API

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::cron::{CronError, CronEvaluator, UtcCron};
use crate::job::{JobCall, UnsupportedJobError};
use crate::record::{JobId, JobRecord};
use crate::registry::MethodRegistry;
use crate::store::{JobStore, StoreError};

/// Error surfaced synchronously to a submitter. Anything discovered later,
/// during background processing, lands on the job record instead.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedJobError),
    #[error(transparent)]
    InvalidCron(#[from] CronError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turns captured calls into persisted job records.
///
/// Every submission validates the call against the method registry first;
/// a job that cannot be re-invoked later is rejected here and never stored.
pub struct JobClient {
    store: Arc<dyn JobStore>,
    registry: Arc<MethodRegistry>,
    evaluator: Arc<dyn CronEvaluator>,
}

impl JobClient {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<MethodRegistry>) -> Self {
        Self::with_evaluator(store, registry, Arc::new(UtcCron))
    }

    pub fn with_evaluator(
        store: Arc<dyn JobStore>,
        registry: Arc<MethodRegistry>,
        evaluator: Arc<dyn CronEvaluator>,
    ) -> Self {
        Self {
            store,
            registry,
            evaluator,
        }
    }

    /// Submit for immediate execution.
    pub async fn enqueue(&self, call: JobCall) -> Result<JobId, SubmitError> {
        let record = self.build_record(&call)?;
        let id = self.store.enqueue(record).await?;
        info!(job_id = %id, "job enqueued for immediate execution");
        Ok(id)
    }

    /// Submit for execution at or after `at`.
    pub async fn schedule(&self, call: JobCall, at: DateTime<Utc>) -> Result<JobId, SubmitError> {
        let descriptor = self.registry.validate(&call)?;
        let mut record = JobRecord::scheduled(descriptor, at);
        if let Some(max_retries) = call.max_retries {
            record.max_retries = max_retries;
        }
        let id = self.store.enqueue(record).await?;
        info!(job_id = %id, scheduled_at = %at, "job scheduled");
        Ok(id)
    }

    /// Submit for execution after `delay` from now.
    pub async fn delay(&self, call: JobCall, delay: Duration) -> Result<JobId, SubmitError> {
        let at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self.schedule(call, at).await
    }

    /// Register or replace a recurring definition under a stable,
    /// caller-chosen id. The first firing is immediately eligible.
    pub async fn recurring(
        &self,
        id: impl Into<JobId>,
        call: JobCall,
        cron_expression: &str,
    ) -> Result<JobId, SubmitError> {
        self.evaluator.validate(cron_expression)?;
        let descriptor = self.registry.validate(&call)?;

        let id = id.into();
        let mut record = JobRecord::recurring(id.clone(), descriptor, cron_expression);
        if let Some(max_retries) = call.max_retries {
            record.max_retries = max_retries;
        }

        match self.store.get_job(&id).await {
            Ok(_) => self.store.update(&record).await?,
            Err(StoreError::NotFound(_)) => {
                self.store.enqueue(record).await?;
            }
            Err(e) => return Err(e.into()),
        }
        info!(job_id = %id, cron = cron_expression, "recurring job registered");
        Ok(id)
    }

    fn build_record(&self, call: &JobCall) -> Result<JobRecord, SubmitError> {
        let descriptor = self.registry.validate(call)?;
        let mut record = JobRecord::new(descriptor);
        if let Some(max_retries) = call.max_retries {
            record.max_retries = max_retries;
        }
        Ok(record)
    }
}
