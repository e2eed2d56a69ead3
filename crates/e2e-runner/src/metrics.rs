//! Run metrics point, flushed once during teardown

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::azure::SubscriptionId;

/// Timing and identity of a single run
#[derive(Debug, Clone, Serialize)]
pub struct Point {
    pub run_id: Uuid,
    pub orchestrator: String,
    pub location: String,
    pub cluster_definition: String,
    pub subscription_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_secs: Option<f64>,
    #[serde(skip)]
    start: Instant,
}

impl Point {
    pub fn new(
        orchestrator: &str,
        location: &str,
        cluster_definition: &str,
        subscription_id: &SubscriptionId,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            orchestrator: orchestrator.to_string(),
            location: location.to_string(),
            cluster_definition: cluster_definition.to_string(),
            subscription_id: subscription_id.to_string(),
            started_at: Utc::now(),
            provision_secs: None,
            test_secs: None,
            total_secs: None,
            start: Instant::now(),
        }
    }

    pub fn record_provisioning(&mut self, elapsed: Duration) {
        self.provision_secs = Some(elapsed.as_secs_f64());
    }

    pub fn record_tests(&mut self, elapsed: Duration) {
        self.test_secs = Some(elapsed.as_secs_f64());
    }

    /// Record the time elapsed since the point was created
    pub fn record_total_time(&mut self) {
        self.total_secs = Some(self.start.elapsed().as_secs_f64());
    }

    /// Log the point and, if `path` is set, append it as a JSON line
    pub async fn write(&self, path: Option<&Path>) -> Result<()> {
        info!(
            run_id = %self.run_id,
            orchestrator = %self.orchestrator,
            location = %self.location,
            provision_secs = ?self.provision_secs,
            test_secs = ?self.test_secs,
            total_secs = ?self.total_secs,
            "Run metrics"
        );

        let Some(path) = path else {
            return Ok(());
        };
        let mut line = serde_json::to_string(self).context("Failed to serialize metrics")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open metrics file {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write metrics file {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }
}
