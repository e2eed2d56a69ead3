//! Best-effort, run-once cleanup
//!
//! Every exit path after the signal trap is armed ends in [`TeardownSequence::run`].
//! Each step logs and records its own failure and never stops the next step.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::azure::{AccountOps, is_not_found};
use crate::context::RunContext;
use crate::credentials;
use crate::provision::Provisioner;
use crate::retry::retry_if;
use crate::tracker::ResourceGroupName;

/// Teardown steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    Metrics,
    LogDir,
    ProvisioningMetrics,
    ActivityLog,
    Credentials,
    ResourceGroups,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Skipped,
    Failed(String),
}

impl StepStatus {
    fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => StepStatus::Done,
            Err(e) => StepStatus::Failed(format!("{e:#}")),
        }
    }
}

/// Result of deleting one resource group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupResult {
    /// Deletion was accepted by the cloud
    Requested,
    /// Group was already gone
    AlreadyDeleted,
    Failed(String),
    /// Clean-up-on-exit is disabled
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDeletion {
    pub name: ResourceGroupName,
    pub result: CleanupResult,
}

/// What happened in each teardown step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownOutcome {
    pub metrics: StepStatus,
    pub log_dir: StepStatus,
    pub provisioning_metrics: StepStatus,
    pub activity_log: StepStatus,
    pub credentials: StepStatus,
    pub resource_groups: Vec<GroupDeletion>,
}

impl TeardownOutcome {
    fn steps(&self) -> [(Step, &StepStatus); 5] {
        [
            (Step::Metrics, &self.metrics),
            (Step::LogDir, &self.log_dir),
            (Step::ProvisioningMetrics, &self.provisioning_metrics),
            (Step::ActivityLog, &self.activity_log),
            (Step::Credentials, &self.credentials),
        ]
    }

    /// Failed steps with their reasons
    pub fn failures(&self) -> Vec<(Step, String)> {
        let mut failures: Vec<(Step, String)> = self
            .steps()
            .into_iter()
            .filter_map(|(step, status)| match status {
                StepStatus::Failed(reason) => Some((step, reason.clone())),
                _ => None,
            })
            .collect();
        failures.extend(self.resource_groups.iter().filter_map(|g| match &g.result {
            CleanupResult::Failed(reason) => {
                Some((Step::ResourceGroups, format!("{}: {reason}", g.name)))
            }
            _ => None,
        }));
        failures
    }

    /// Groups whose deletion was requested or that were already gone
    pub fn deleted_groups(&self) -> Vec<&ResourceGroupName> {
        self.resource_groups
            .iter()
            .filter(|g| {
                matches!(
                    g.result,
                    CleanupResult::Requested | CleanupResult::AlreadyDeleted
                )
            })
            .map(|g| &g.name)
            .collect()
    }

    pub fn log_summary(&self) {
        let failures = self.failures();
        info!(
            deleted_groups = self.deleted_groups().len(),
            tracked_groups = self.resource_groups.len(),
            failed_steps = failures.len(),
            "Teardown complete"
        );
        for (step, reason) in failures {
            warn!(step = %step, reason = %reason, "Teardown step failed");
        }
    }
}

/// Cleanup that runs at most once per process
#[derive(Debug, Default)]
pub struct TeardownSequence {
    ran: AtomicBool,
}

impl TeardownSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every teardown step.
    ///
    /// Returns `None` without doing anything if teardown already ran.
    pub async fn run<A, P>(&self, ctx: &RunContext, account: &A, provisioner: &P) -> Option<TeardownOutcome>
    where
        A: AccountOps,
        P: Provisioner,
    {
        if self.ran.swap(true, Ordering::SeqCst) {
            info!("Teardown already ran, skipping");
            return None;
        }

        let config = &ctx.config;
        let flags = &config.flags;
        info!(
            clean_up_on_exit = flags.clean_up_on_exit,
            tracked_groups = ctx.tracker.len(),
            "Running teardown"
        );

        ctx.update_point(|p| p.record_total_time());
        let metrics = StepStatus::from_result(ctx.point().write(flags.metrics_file.as_deref()).await);
        if let StepStatus::Failed(reason) = &metrics {
            warn!(error = %reason, "Failed to write metrics");
        }

        let log_dir = ctx.log_dir();
        let log_dir_status = StepStatus::from_result(
            tokio::fs::create_dir_all(&log_dir)
                .await
                .map_err(anyhow::Error::from),
        );
        if let StepStatus::Failed(reason) = &log_dir_status {
            warn!(path = %log_dir.display(), error = %reason, "Cannot create directory for logs");
        }

        let provisioning_metrics =
            if config.is_kubernetes() && !config.is_soak() && !flags.skip_logs_collection {
                let cluster = ctx.cluster_name();
                match provisioner
                    .fetch_provisioning_metrics(cluster.as_deref(), &log_dir)
                    .await
                {
                    Ok(Some(_)) => StepStatus::Done,
                    Ok(None) => {
                        info!(cluster = ?cluster, "No provisioning log for this cluster");
                        StepStatus::Skipped
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to fetch provisioning metrics");
                        StepStatus::Failed(format!("{e:#}"))
                    }
                }
            } else {
                StepStatus::Skipped
            };

        if ctx.tracker.is_empty() {
            info!("No resource groups were tracked");
        }
        let groups = ctx.tracker.groups();

        let activity_log = if flags.skip_logs_collection {
            StepStatus::Skipped
        } else {
            let mut errors = Vec::new();
            for group in &groups {
                if let Err(e) = account.fetch_activity_log(group, &log_dir).await {
                    warn!(group = %group, error = %e, "Cannot fetch the activity log");
                    errors.push(format!("{group}: {e:#}"));
                }
            }
            if errors.is_empty() {
                StepStatus::Done
            } else {
                StepStatus::Failed(errors.join("; "))
            }
        };

        let credentials = if flags.retain_ssh {
            StepStatus::Skipped
        } else {
            match credentials::remove(&ctx.output_dir()) {
                Ok(failed) if failed.is_empty() => StepStatus::Done,
                Ok(failed) => StepStatus::Failed(format!("{} files could not be deleted", failed.len())),
                Err(e) => {
                    warn!(error = %e, "Failed to list SSH credential files");
                    StepStatus::Failed(format!("{e:#}"))
                }
            }
        };

        let mut resource_groups = Vec::with_capacity(groups.len());
        for group in groups {
            let result = if flags.clean_up_on_exit {
                delete_group(ctx, account, &group).await
            } else {
                CleanupResult::Skipped
            };
            resource_groups.push(GroupDeletion { name: group, result });
        }

        let outcome = TeardownOutcome {
            metrics,
            log_dir: log_dir_status,
            provisioning_metrics,
            activity_log,
            credentials,
            resource_groups,
        };
        outcome.log_summary();
        Some(outcome)
    }
}

async fn delete_group<A: AccountOps>(
    ctx: &RunContext,
    account: &A,
    group: &ResourceGroupName,
) -> CleanupResult {
    info!(group = %group, "Deleting group");
    let result = retry_if(
        &ctx.policy,
        "delete resource group",
        || account.delete_resource_group(group, false),
        |e| !is_not_found(e),
    )
    .await;

    match result {
        Ok(()) => CleanupResult::Requested,
        Err(e) if is_not_found(&e) => {
            info!(group = %group, "Resource group already deleted");
            CleanupResult::AlreadyDeleted
        }
        Err(e) => {
            warn!(group = %group, error = ?e, "Failed to delete resource group");
            CleanupResult::Failed(format!("{e:#}"))
        }
    }
}
