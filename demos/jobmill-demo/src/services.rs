//! Sample business services reached through the job engine.
//!
//! These are stand-ins for arbitrary user code: the engine knows nothing
//! about them beyond their registry entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

pub struct EmailService;

impl EmailService {
    pub async fn send_welcome_email(&self, email: String, name: String) -> anyhow::Result<()> {
        info!(email, name, "sending welcome email");
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Simulated flaky SMTP hop so retries have something to do.
        if rand::random_range(0..10) == 0 {
            anyhow::bail!("SMTP server temporarily unavailable");
        }

        info!(email, "welcome email sent");
        Ok(())
    }

    pub async fn send_notification(&self, user_id: String, message: String) -> anyhow::Result<()> {
        info!(user_id, message, "sending notification");
        tokio::time::sleep(Duration::from_millis(500)).await;
        info!(user_id, "notification sent");
        Ok(())
    }

    pub async fn send_newsletter(&self, subscription_id: u32) -> anyhow::Result<()> {
        info!(subscription_id, "processing newsletter");
        tokio::time::sleep(Duration::from_secs(1)).await;
        info!(subscription_id, "newsletter sent");
        Ok(())
    }
}

pub struct DataProcessingService;

impl DataProcessingService {
    pub async fn process_user_data(&self, user_id: u32) -> anyhow::Result<()> {
        info!(user_id, "processing user data");
        tokio::time::sleep(Duration::from_secs(3)).await;
        info!(user_id, "user data processed");
        Ok(())
    }

    pub async fn cleanup_temp_files(&self) -> anyhow::Result<()> {
        info!("starting cleanup of temporary files");
        tokio::time::sleep(Duration::from_secs(1)).await;
        info!("temporary files cleaned up");
        Ok(())
    }

    pub async fn generate_report(
        &self,
        report_type: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        info!(report_type, %start, %end, "generating report");
        tokio::time::sleep(Duration::from_secs(2)).await;
        info!(report_type, "report generated");
        Ok(())
    }
}
