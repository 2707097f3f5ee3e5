//! End-to-end tests for the job engine: lease/execute cycles, retry and
//! dead-letter policy, scheduler promotion and recurring firing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use jobmill::{
    JobCall, JobClient, JobDescriptor, JobExecutor, JobId, JobOutcome, JobRecord, JobState,
    JobStore, MemoryJobStore, MethodRegistry, RegistryExecutor, Scheduler, SchedulerConfig,
    WorkerConfig, WorkerPool,
};

/// Stub executor with a fixed outcome, for driving the pool without a
/// registry.
struct StubExecutor {
    succeed: bool,
    calls: AtomicU32,
}

impl StubExecutor {
    fn succeeding() -> Self {
        Self {
            succeed: true,
            calls: AtomicU32::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            succeed: false,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobExecutor for StubExecutor {
    async fn execute(&self, _job: &JobDescriptor) -> JobOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            JobOutcome::success()
        } else {
            JobOutcome::failure("stub failure")
        }
    }
}

fn test_worker_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        lease_duration: Duration::from_secs(300),
        idle_interval: Duration::from_millis(20),
        worker_id: "test-worker".to_string(),
        queue: None,
    }
}

async fn wait_for(
    store: &Arc<MemoryJobStore>,
    id: &JobId,
    deadline: Duration,
    predicate: impl Fn(&JobRecord) -> bool,
) -> JobRecord {
    let start = tokio::time::Instant::now();
    loop {
        let record = store.get_job(id).await.expect("record should exist");
        if predicate(&record) {
            return record;
        }
        assert!(
            start.elapsed() < deadline,
            "timed out waiting for job {id}, state {:?}",
            record.state
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn enqueued_job_is_executed_and_succeeds() {
    let store = Arc::new(MemoryJobStore::new());
    let registry = Arc::new(MethodRegistry::new());

    let sent = Arc::new(Mutex::new(Vec::new()));
    let outbox = Arc::clone(&sent);
    registry.register(
        "EmailService",
        "send_welcome",
        move |(email, name): (String, String)| {
            let outbox = Arc::clone(&outbox);
            async move {
                outbox.lock().unwrap().push((email, name));
                Ok(())
            }
        },
    );

    let client = JobClient::new(store.clone() as Arc<dyn JobStore>, Arc::clone(&registry));
    let executor = Arc::new(RegistryExecutor::new(registry));
    let pool = Arc::new(WorkerPool::new(
        store.clone() as Arc<dyn JobStore>,
        executor,
        test_worker_config(2),
    ));
    pool.start();

    let call = JobCall::method("EmailService", "send_welcome")
        .arg("a@b.com")
        .unwrap()
        .arg("Ada")
        .unwrap();
    let id = client.enqueue(call).await.unwrap();
    assert!(!id.as_str().is_empty());

    let record = wait_for(&store, &id, Duration::from_secs(2), |r| {
        r.state == JobState::Succeeded
    })
    .await;

    assert!(record.processed_at.is_some());
    assert!(record.lease_id.is_none());
    assert!(record.lease_expiry.is_none());
    // The handler observed exactly the captured arguments.
    assert_eq!(
        *sent.lock().unwrap(),
        vec![("a@b.com".to_string(), "Ada".to_string())]
    );

    pool.shutdown();
}

#[tokio::test]
async fn stub_executor_drives_success_cycle() {
    let store = Arc::new(MemoryJobStore::new());
    let executor = Arc::new(StubExecutor::succeeding());
    let pool = Arc::new(WorkerPool::new(
        store.clone() as Arc<dyn JobStore>,
        executor.clone(),
        test_worker_config(1),
    ));
    pool.start();

    let descriptor = JobDescriptor {
        target_type: "EmailService".to_string(),
        method: "send_welcome".to_string(),
        args: vec![serde_json::json!("a@b.com")],
        queue: None,
    };
    let id = store.enqueue(JobRecord::new(descriptor)).await.unwrap();

    let record = wait_for(&store, &id, Duration::from_secs(2), |r| {
        r.state == JobState::Succeeded
    })
    .await;
    assert!(record.processed_at.is_some());
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    pool.shutdown();
}

#[tokio::test]
async fn failing_job_retries_then_dead_letters() {
    let store = Arc::new(MemoryJobStore::new());
    let executor = Arc::new(StubExecutor::failing());
    let pool = Arc::new(WorkerPool::new(
        store.clone() as Arc<dyn JobStore>,
        executor,
        test_worker_config(1),
    ));
    pool.start();

    let descriptor = JobDescriptor {
        target_type: "Svc".to_string(),
        method: "run".to_string(),
        args: Vec::new(),
        queue: None,
    };
    let submitted_at = Utc::now();
    let id = store
        .enqueue(JobRecord::new(descriptor).with_max_retries(2))
        .await
        .unwrap();

    // First failure: retry scheduled with the 30s base backoff.
    let record = wait_for(&store, &id, Duration::from_secs(2), |r| {
        r.state == JobState::Scheduled
    })
    .await;
    assert_eq!(record.retry_count, 1);
    assert_eq!(record.last_error.as_deref(), Some("stub failure"));
    let scheduled_at = record.scheduled_at.expect("retry must carry a time");
    assert!(scheduled_at >= submitted_at + chrono::Duration::seconds(25));

    // Skip the backoff so the second attempt runs now.
    let mut record = record;
    record.state = JobState::Enqueued;
    record.scheduled_at = None;
    store.update(&record).await.unwrap();

    // Second failure exhausts the budget.
    let record = wait_for(&store, &id, Duration::from_secs(2), |r| {
        r.state == JobState::DeadLetter
    })
    .await;
    assert_eq!(record.retry_count, 2);
    assert!(record.lease_id.is_none());

    pool.shutdown();
}

#[tokio::test]
async fn worker_concurrency_is_bounded() {
    let store = Arc::new(MemoryJobStore::new());
    let registry = Arc::new(MethodRegistry::new());

    let in_flight = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let (gauge, high_water) = (Arc::clone(&in_flight), Arc::clone(&peak));
    registry.register("Slow", "work", move |(): ()| {
        let gauge = Arc::clone(&gauge);
        let high_water = Arc::clone(&high_water);
        async move {
            let current = gauge.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(80)).await;
            gauge.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let client = JobClient::new(store.clone() as Arc<dyn JobStore>, Arc::clone(&registry));
    let executor = Arc::new(RegistryExecutor::new(registry));
    let pool = Arc::new(WorkerPool::new(
        store.clone() as Arc<dyn JobStore>,
        executor,
        test_worker_config(2),
    ));
    pool.start();

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(client.enqueue(JobCall::method("Slow", "work")).await.unwrap());
    }
    for id in &ids {
        wait_for(&store, id, Duration::from_secs(5), |r| {
            r.state == JobState::Succeeded
        })
        .await;
    }

    assert!(peak.load(Ordering::SeqCst) <= 2, "more than two jobs ran at once");

    pool.shutdown();
}

#[tokio::test]
async fn scheduler_promotes_past_due_jobs() {
    let store = Arc::new(MemoryJobStore::new());
    let descriptor = JobDescriptor {
        target_type: "Svc".to_string(),
        method: "run".to_string(),
        args: Vec::new(),
        queue: None,
    };
    let at = Utc::now() - chrono::Duration::seconds(1);
    let id = store
        .enqueue(JobRecord::scheduled(descriptor, at))
        .await
        .unwrap();

    let scheduler = Arc::new(Scheduler::new(
        store.clone() as Arc<dyn JobStore>,
        SchedulerConfig {
            poll_interval: Duration::from_millis(50),
            batch_size: 5,
        },
    ));
    scheduler.start();

    let record = wait_for(&store, &id, Duration::from_secs(2), |r| {
        r.state == JobState::Enqueued
    })
    .await;
    assert!(record.scheduled_at.is_none());

    scheduler.shutdown();
}

#[tokio::test]
async fn recurring_definition_spawns_fresh_instances() {
    let store = Arc::new(MemoryJobStore::new());
    let registry = Arc::new(MethodRegistry::new());
    registry.register("Cleanup", "run", |(): ()| async { Ok(()) });

    let client = JobClient::new(store.clone() as Arc<dyn JobStore>, Arc::clone(&registry));
    let scheduler = Arc::new(Scheduler::new(
        store.clone() as Arc<dyn JobStore>,
        SchedulerConfig {
            poll_interval: Duration::from_millis(50),
            batch_size: 5,
        },
    ));
    scheduler.start();

    let registered_at = Utc::now();
    let id = client
        .recurring(
            "cleanup-temp-files",
            JobCall::method("Cleanup", "run").max_retries(3),
            "* * * * * *",
        )
        .await
        .unwrap();

    // The definition itself stays Scheduled; a fresh Enqueued instance
    // appears for the immediate first firing.
    let definition = wait_for(&store, &id, Duration::from_secs(3), |r| {
        r.processed_at.is_some()
    })
    .await;
    assert_eq!(definition.state, JobState::Scheduled);
    assert!(definition.is_recurring());
    let next_run = definition.next_run.expect("definition keeps a next fire time");
    assert!(next_run > registered_at, "next_run must advance strictly forward");

    let counts = store.job_counts_by_state().await.unwrap();
    assert!(counts.get(&JobState::Enqueued).copied().unwrap_or(0) >= 1);

    // Spawned instances are plain one-shot records sharing the descriptor.
    let due = store.get_due_jobs(Utc::now(), 50).await.unwrap();
    let instance = due
        .iter()
        .find(|r| !r.is_recurring())
        .expect("a spawned instance should be due");
    assert_eq!(instance.job.target_type, "Cleanup");
    assert_eq!(instance.job.method, "run");
    assert_eq!(instance.max_retries, 3);
    assert_ne!(instance.id, id);

    scheduler.shutdown();
}

#[tokio::test]
async fn shutdown_stops_the_loops() {
    let store = Arc::new(MemoryJobStore::new());
    let executor = Arc::new(StubExecutor::succeeding());

    let pool = Arc::new(WorkerPool::new(
        store.clone() as Arc<dyn JobStore>,
        executor,
        test_worker_config(2),
    ));
    let pool_handle = pool.start();

    let scheduler = Arc::new(Scheduler::new(
        store.clone() as Arc<dyn JobStore>,
        SchedulerConfig::default(),
    ));
    let scheduler_handle = scheduler.start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shutdown();
    scheduler.shutdown();

    tokio::time::timeout(Duration::from_secs(2), pool_handle)
        .await
        .expect("worker pool should stop promptly")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), scheduler_handle)
        .await
        .expect("scheduler should stop promptly")
        .unwrap();
}
