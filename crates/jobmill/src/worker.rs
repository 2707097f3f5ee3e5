//! Worker pool: leases ready jobs and applies the outcome policy

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::JobExecutor;
use crate::record::{retry_backoff, JobRecord, JobState};
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Max jobs in flight at once.
    pub concurrency: usize,
    /// How long a claim lasts before other workers may reclaim the job.
    pub lease_duration: Duration,
    /// Pause before releasing a slot that found no work.
    pub idle_interval: Duration,
    /// Identifier for this worker's leases; unique per worker instance.
    pub worker_id: String,
    /// Restrict leasing to one logical queue.
    pub queue: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            lease_duration: Duration::from_secs(5 * 60),
            idle_interval: Duration::from_secs(1),
            worker_id: default_worker_id(),
            queue: None,
        }
    }
}

/// Host name plus a uuid fragment.
fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &nonce[..8])
}

/// Background pool running up to `concurrency` jobs at once.
///
/// Each execution slot leases one job, runs it to completion, persists the
/// outcome, and only then frees the slot; admission control is the slot
/// count and nothing else. Failed jobs are rescheduled with exponential
/// backoff until their retry budget runs out, then dead-lettered.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    shutdown: Notify,
    running: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn JobExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            store,
            executor,
            config,
            semaphore,
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the pool loop. Runs until [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.run().await })
    }

    /// Stop leasing new jobs. In-flight jobs finish on their own; leases of
    /// abandoned ones expire and get reclaimed.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    async fn run(&self) {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            "worker pool started"
        );

        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    permit.expect("worker semaphore closed unexpectedly")
                }
                _ = self.shutdown.notified() => break,
            };
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let store = Arc::clone(&self.store);
            let executor = Arc::clone(&self.executor);
            let worker_id = self.config.worker_id.clone();
            let lease_duration = self.config.lease_duration;
            let idle_interval = self.config.idle_interval;
            let queue = self.config.queue.clone();

            tokio::spawn(async move {
                match store
                    .lease_next(&worker_id, lease_duration, queue.as_deref())
                    .await
                {
                    Ok(Some(record)) => process_one(store, executor, record, &worker_id).await,
                    Ok(None) => tokio::time::sleep(idle_interval).await,
                    Err(e) => {
                        error!(worker_id = %worker_id, error = %e, "failed to lease next job");
                        tokio::time::sleep(idle_interval).await;
                    }
                }
                drop(permit);
            });
        }

        info!(worker_id = %self.config.worker_id, "worker pool stopped");
    }
}

async fn process_one(
    store: Arc<dyn JobStore>,
    executor: Arc<dyn JobExecutor>,
    mut record: JobRecord,
    worker_id: &str,
) {
    info!(
        worker_id,
        job_id = %record.id,
        target_type = %record.job.target_type,
        method = %record.job.method,
        "processing job"
    );

    let outcome = executor.execute(&record.job).await;
    let now = Utc::now();
    record.processed_at = Some(now);
    record.clear_lease();

    if outcome.success {
        record.state = JobState::Succeeded;
        info!(job_id = %record.id, "job completed");
    } else {
        record.retry_count += 1;
        record.last_error = outcome.error;

        if record.retry_count >= record.max_retries {
            record.state = JobState::DeadLetter;
            warn!(
                job_id = %record.id,
                retry_count = record.retry_count,
                "retries exhausted, job dead-lettered"
            );
        } else {
            let delay = retry_backoff(record.retry_count);
            record.state = JobState::Scheduled;
            record.scheduled_at = Some(now + delay);
            info!(
                job_id = %record.id,
                attempt = record.retry_count,
                delay_secs = delay.num_seconds(),
                "job failed, retry scheduled"
            );
        }
    }

    if let Err(e) = store.update(&record).await {
        error!(job_id = %record.id, error = %e, "failed to persist job outcome");
    }
}
