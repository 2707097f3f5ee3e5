//! In-memory job store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::record::{JobId, JobRecord, JobState};
use crate::store::{JobStore, StoreError};

/// Queue name reported for records submitted without an explicit queue.
pub const DEFAULT_QUEUE: &str = "default";

/// Reference [`JobStore`] keeping records in a shared map.
///
/// All mutation goes through a single write lock, which is what makes
/// `lease_next`'s find-and-claim atomic with respect to other workers.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, mut record: JobRecord) -> Result<JobId, StoreError> {
        record.created_at = Utc::now();
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        let id = record.id.clone();
        tracing::debug!(
            job_id = %id,
            queue = record.job.queue.as_deref().unwrap_or(DEFAULT_QUEUE),
            "job enqueued"
        );
        jobs.insert(id.clone(), record);
        Ok(id)
    }

    async fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&record.id) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.clone())),
        }
    }

    async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
        self.jobs.write().await.remove(id);
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<JobRecord, StoreError> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn get_due_jobs(
        &self,
        before: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;

        let mut due: Vec<&JobRecord> = jobs
            .values()
            .filter(|record| {
                matches!(record.state, JobState::Enqueued | JobState::Scheduled)
                    && record.scheduled_at.map_or(true, |at| at <= before)
                    && record.lease_available(now)
            })
            .collect();
        due.sort_by_key(|record| record.created_at);

        Ok(due.into_iter().take(max_count).cloned().collect())
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        queue: Option<&str>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;

        // Eligible: ready and unleased, or still marked `Processing` under a
        // lease that has expired (stale claim, reclaimable).
        let candidate = jobs
            .values()
            .filter(|record| {
                matches!(record.state, JobState::Enqueued | JobState::Processing)
                    && record.lease_available(now)
                    && record.scheduled_at.map_or(true, |at| at <= now)
                    && queue.map_or(true, |q| record.job.queue.as_deref() == Some(q))
            })
            .min_by_key(|record| record.created_at)
            .map(|record| record.id.clone());

        let Some(id) = candidate else {
            return Ok(None);
        };
        let record = jobs.get_mut(&id).expect("candidate selected under the same lock");
        record.state = JobState::Processing;
        record.lease_id = Some(worker_id.to_string());
        record.lease_expiry =
            Some(now + chrono::Duration::from_std(lease_duration).unwrap_or_default());
        tracing::debug!(job_id = %id, worker_id, "job leased");
        Ok(Some(record.clone()))
    }

    async fn release_lease(&self, id: &JobId) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(id) {
            record.clear_lease();
            if record.state == JobState::Processing {
                record.state = JobState::Enqueued;
            }
        }
        Ok(())
    }

    async fn try_extend_lease(&self, id: &JobId, extension: Duration) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(id) {
            if let Some(expiry) = record.lease_expiry {
                record.lease_expiry =
                    Some(expiry + chrono::Duration::from_std(extension).unwrap_or_default());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn job_counts_by_state(&self) -> Result<HashMap<JobState, usize>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut counts = HashMap::new();
        for record in jobs.values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn queue_lengths(&self) -> Result<HashMap<String, usize>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut lengths = HashMap::new();
        for record in jobs.values() {
            if matches!(record.state, JobState::Enqueued | JobState::Scheduled) {
                let queue = record.job.queue.as_deref().unwrap_or(DEFAULT_QUEUE);
                *lengths.entry(queue.to_string()).or_insert(0) += 1;
            }
        }
        Ok(lengths)
    }
}
