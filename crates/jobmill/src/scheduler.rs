//! Scheduler loop: promotes due scheduled jobs and fires recurring ones

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::cron::{CronEvaluator, UtcCron};
use crate::record::{JobRecord, JobState};
use crate::store::{JobStore, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Time between polls of the store.
    pub poll_interval: Duration,
    /// Maximum due records handled per tick.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 5,
        }
    }
}

/// Background loop that moves time-based work into the ready queue.
///
/// Non-recurring records are promoted in place once their scheduled time
/// arrives. Recurring definitions spawn a fresh one-shot record per firing
/// and advance their own `next_run`; the definition itself stays
/// `Scheduled` forever.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    evaluator: Arc<dyn CronEvaluator>,
    config: SchedulerConfig,
    shutdown: Notify,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, config: SchedulerConfig) -> Self {
        Self::with_evaluator(store, Arc::new(UtcCron), config)
    }

    pub fn with_evaluator(
        store: Arc<dyn JobStore>,
        evaluator: Arc<dyn CronEvaluator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            config,
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the poll loop. Runs until [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Stop the loop at the top of its next iteration.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    async fn run(&self) {
        info!(poll_interval = ?self.config.poll_interval, "scheduler started");
        let mut ticker = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }
        info!("scheduler stopped");
    }

    async fn tick(&self) -> Result<(), StoreError> {
        let due = self
            .store
            .get_due_jobs(Utc::now(), self.config.batch_size)
            .await?;

        for record in due {
            let job_id = record.id.clone();
            let result = if record.is_recurring() {
                self.fire_recurring(record).await
            } else {
                self.promote(record).await
            };
            // One bad record must not take the rest of the batch with it.
            if let Err(e) = result {
                error!(job_id = %job_id, error = %e, "failed to process due job");
            }
        }
        Ok(())
    }

    async fn promote(&self, mut record: JobRecord) -> anyhow::Result<()> {
        // Already-ready records need no write; rewriting one would race a
        // concurrent lease.
        if record.state != JobState::Scheduled {
            return Ok(());
        }
        record.state = JobState::Enqueued;
        record.scheduled_at = None;
        self.store.update(&record).await?;
        debug!(job_id = %record.id, "scheduled job promoted");
        Ok(())
    }

    async fn fire_recurring(&self, mut record: JobRecord) -> anyhow::Result<()> {
        let Some(expression) = record.cron_expression.clone() else {
            return Ok(());
        };
        let now = Utc::now();
        let next_due = match record.next_run {
            Some(at) => at,
            None => self
                .evaluator
                .next_after(&expression, record.processed_at.unwrap_or(record.created_at))?,
        };
        if next_due > now {
            return Ok(());
        }

        let instance = JobRecord::new(record.job.clone()).with_max_retries(record.max_retries);
        let instance_id = self.store.enqueue(instance).await?;

        record.next_run = Some(self.evaluator.next_after(&expression, now)?);
        record.processed_at = Some(now);
        self.store.update(&record).await?;
        debug!(
            job_id = %record.id,
            instance_id = %instance_id,
            next_run = ?record.next_run,
            "recurring job fired"
        );
        Ok(())
    }
}
