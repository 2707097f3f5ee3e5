//! Persisted job records and the lifecycle state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobDescriptor;

/// Default retry budget for new records.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// First retry waits this long; every further retry doubles it.
const RETRY_BASE_DELAY_SECS: i64 = 30;

/// Exponent clamp keeping the shifted delay inside `i64` seconds.
const RETRY_MAX_EXPONENT: u32 = 26;

/// Unique job record identifier.
///
/// Generated ids are v4 UUIDs; recurring definitions carry a caller-chosen
/// stable id instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle state of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be leased by a worker.
    Enqueued,
    /// Waiting for its scheduled time; recurring definitions stay here
    /// between firings.
    Scheduled,
    /// Leased by a worker and executing.
    Processing,
    /// Finished successfully (terminal).
    Succeeded,
    /// Failed permanently (terminal).
    Failed,
    /// Retry budget exhausted; awaiting operator inspection (terminal).
    DeadLetter,
    /// Explicitly removed (terminal).
    Deleted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::DeadLetter | JobState::Deleted
        )
    }
}

/// Mutable, persisted envelope around a [`JobDescriptor`].
///
/// At most one unexpired lease exists on a record at any time. A record with
/// a cron expression is a recurring definition: each firing spawns a fresh,
/// independent, non-recurring record sharing the same descriptor, and the
/// definition itself is never consumed by execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job: JobDescriptor,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    /// Earliest time eligible to run; `None` means now.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Last time the job finished running, successfully or not.
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Present on recurring definitions only.
    pub cron_expression: Option<String>,
    /// Next fire time for a recurring definition.
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Worker currently holding exclusive execution rights.
    pub lease_id: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// New record for immediate execution.
    pub fn new(job: JobDescriptor) -> Self {
        Self {
            id: JobId::new(),
            job,
            state: JobState::Enqueued,
            created_at: Utc::now(),
            scheduled_at: None,
            processed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            cron_expression: None,
            next_run: None,
            last_error: None,
            lease_id: None,
            lease_expiry: None,
        }
    }

    /// New record to run at or after `at`.
    pub fn scheduled(job: JobDescriptor, at: DateTime<Utc>) -> Self {
        let mut record = Self::new(job);
        record.state = JobState::Scheduled;
        record.scheduled_at = Some(at);
        record
    }

    /// New recurring definition under a caller-chosen id. The first firing
    /// is immediately eligible.
    pub fn recurring(id: JobId, job: JobDescriptor, cron_expression: impl Into<String>) -> Self {
        let mut record = Self::new(job);
        record.id = id;
        record.state = JobState::Scheduled;
        record.cron_expression = Some(cron_expression.into());
        record.next_run = Some(Utc::now());
        record
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }

    /// True when no worker holds a live lease on this record.
    pub fn lease_available(&self, now: DateTime<Utc>) -> bool {
        self.lease_id.is_none() || self.lease_expiry.map_or(true, |expiry| expiry < now)
    }

    pub fn clear_lease(&mut self) {
        self.lease_id = None;
        self.lease_expiry = None;
    }
}

/// Delay before the `attempt`-th retry: 30s for the first, doubling after.
pub fn retry_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(RETRY_MAX_EXPONENT);
    Duration::seconds(RETRY_BASE_DELAY_SECS << exponent)
}
