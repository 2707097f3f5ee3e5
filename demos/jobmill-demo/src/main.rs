//! jobmill demo: wires the engine together and submits a batch of jobs.
//!
//! Run with: cargo run -p jobmill-demo

mod services;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jobmill::{
    JobCall, JobClient, JobStore, MemoryJobStore, MethodRegistry, RegistryExecutor, Scheduler,
    SchedulerConfig, WorkerConfig, WorkerPool,
};
use tracing::info;

use services::{DataProcessingService, EmailService};

fn register_services(registry: &MethodRegistry) {
    let emails = Arc::new(EmailService);

    let svc = Arc::clone(&emails);
    registry.register(
        "EmailService",
        "send_welcome_email",
        move |(email, name): (String, String)| {
            let svc = Arc::clone(&svc);
            async move { svc.send_welcome_email(email, name).await }
        },
    );

    let svc = Arc::clone(&emails);
    registry.register(
        "EmailService",
        "send_notification",
        move |(user_id, message): (String, String)| {
            let svc = Arc::clone(&svc);
            async move { svc.send_notification(user_id, message).await }
        },
    );

    let svc = Arc::clone(&emails);
    registry.register(
        "EmailService",
        "send_newsletter",
        move |(subscription_id,): (u32,)| {
            let svc = Arc::clone(&svc);
            async move { svc.send_newsletter(subscription_id).await }
        },
    );

    let data = Arc::new(DataProcessingService);

    let svc = Arc::clone(&data);
    registry.register(
        "DataProcessingService",
        "process_user_data",
        move |(user_id,): (u32,)| {
            let svc = Arc::clone(&svc);
            async move { svc.process_user_data(user_id).await }
        },
    );

    let svc = Arc::clone(&data);
    registry.register("DataProcessingService", "cleanup_temp_files", move |(): ()| {
        let svc = Arc::clone(&svc);
        async move { svc.cleanup_temp_files().await }
    });

    let svc = Arc::clone(&data);
    registry.register(
        "DataProcessingService",
        "generate_report",
        move |(report_type, start, end): (String, chrono::DateTime<Utc>, chrono::DateTime<Utc>)| {
            let svc = Arc::clone(&svc);
            async move { svc.generate_report(report_type, start, end).await }
        },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let registry = Arc::new(MethodRegistry::new());
    register_services(&registry);

    let client = JobClient::new(Arc::clone(&store), Arc::clone(&registry));
    let executor = Arc::new(RegistryExecutor::new(Arc::clone(&registry)));

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), SchedulerConfig::default()));
    scheduler.start();
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&store),
        executor,
        WorkerConfig::default(),
    ));
    pool.start();

    let job_id = client
        .enqueue(JobCall::with_args(
            "EmailService",
            "send_welcome_email",
            ("john@example.com", "John Doe"),
        )?)
        .await?;
    info!(%job_id, "enqueued immediate job");

    let job_id = client
        .enqueue(JobCall::with_args(
            "EmailService",
            "send_notification",
            ("user-381", "Welcome aboard"),
        )?)
        .await?;
    info!(%job_id, "enqueued notification job");

    let job_id = client
        .delay(
            JobCall::with_args("DataProcessingService", "process_user_data", (3242u32,))?,
            Duration::from_secs(10),
        )
        .await?;
    info!(%job_id, "enqueued delayed job");

    let job_id = client
        .schedule(
            JobCall::with_args(
                "DataProcessingService",
                "generate_report",
                (
                    "weekly-sales",
                    Utc::now() - chrono::Duration::days(7),
                    Utc::now(),
                ),
            )?,
            Utc::now() + chrono::Duration::seconds(30),
        )
        .await?;
    info!(%job_id, "scheduled report job");

    let job_id = client
        .recurring(
            "cleanup-temp-files",
            JobCall::method("DataProcessingService", "cleanup_temp_files"),
            "0 */1 * * * *",
        )
        .await?;
    info!(%job_id, "registered recurring job");

    for i in 0u32..100 {
        let subscription_id = 1000 + i;
        client
            .enqueue(JobCall::with_args(
                "EmailService",
                "send_newsletter",
                (subscription_id,),
            )?)
            .await?;
    }
    info!("enqueued 100 newsletter jobs");

    let counts_store = Arc::clone(&store);
    let report = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            if let Ok(counts) = counts_store.job_counts_by_state().await {
                info!(?counts, "job counts by state");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    report.abort();
    pool.shutdown();
    scheduler.shutdown();
    Ok(())
}
