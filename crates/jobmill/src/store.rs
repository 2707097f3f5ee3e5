//! Storage contract for job records

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::record::{JobId, JobRecord, JobState};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job `{0}` not found")]
    NotFound(JobId),
    #[error("job `{0}` already exists")]
    AlreadyExists(JobId),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Single source of truth for job records.
///
/// Implementations must be safe for concurrent use by the scheduler loop,
/// every in-flight worker execution, and external submitters. `lease_next`
/// must perform its select-and-mutate as one atomic step: two workers must
/// never receive the same record while a lease on it is live. A stale lease
/// (expired `lease_expiry`) counts as no lease at all.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record, stamping its creation time. The record keeps the
    /// id assigned at construction; an existing id is never overwritten.
    async fn enqueue(&self, record: JobRecord) -> Result<JobId, StoreError>;

    /// Replace the stored record carrying the same id.
    async fn update(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Remove a record. Deleting an unknown id is not an error.
    async fn delete(&self, id: &JobId) -> Result<(), StoreError>;

    /// Point lookup.
    async fn get_job(&self, id: &JobId) -> Result<JobRecord, StoreError>;

    /// Records in `Enqueued` or `Scheduled` state whose scheduled time is
    /// unset or has passed `before` and whose lease, if any, has expired.
    /// Oldest first, capped at `max_count`.
    async fn get_due_jobs(
        &self,
        before: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Atomically claim the oldest eligible record for `worker_id`, marking
    /// it `Processing` under a lease running `lease_duration` from now.
    /// `queue` restricts the claim to one logical queue.
    async fn lease_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        queue: Option<&str>,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Drop the lease on a record; a `Processing` record reverts to
    /// `Enqueued` so it can be picked up again.
    async fn release_lease(&self, id: &JobId) -> Result<(), StoreError>;

    /// Extend a currently held lease; returns `false` when none exists.
    async fn try_extend_lease(&self, id: &JobId, extension: Duration) -> Result<bool, StoreError>;

    /// Number of records per lifecycle state.
    async fn job_counts_by_state(&self) -> Result<HashMap<JobState, usize>, StoreError>;

    /// Number of pending (`Enqueued` + `Scheduled`) records per queue.
    async fn queue_lengths(&self) -> Result<HashMap<String, usize>, StoreError>;
}
