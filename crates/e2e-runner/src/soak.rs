//! Soak cluster reuse or recreation
//!
//! A soak cluster is a long-lived cluster whose provisioner output is kept in
//! a storage file share between runs. Each run either reuses it (downloading
//! the stored output) or deletes it so a fresh one is provisioned under the
//! same name.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::azure::{AccountOps, ResourceGroup, StorageOps, is_not_found};
use crate::credentials;
use crate::defaults::{OUTPUT_DIR, SOAK_STORAGE_RESOURCE_GROUP, soak_expiry, soak_storage_account};
use crate::error::RunnerError;
use crate::retry::{RetryPolicy, retry, retry_if};

/// Why a soak cluster is being recreated
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RecreateReason {
    #[display("resource group does not exist")]
    Missing,
    #[display("resource group has no deployments")]
    NeverDeployed,
    #[display("last deployment is {age_hours}h old")]
    Expired { age_hours: i64 },
    #[display("forced redeploy")]
    Forced,
    #[display("stored outputs could not be downloaded")]
    ArtifactsUnavailable,
}

/// Outcome of the reuse check
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SoakDecision {
    #[display("reuse")]
    Reuse,
    #[display("recreate ({_0})")]
    Recreate(RecreateReason),
}

impl SoakDecision {
    pub fn is_reuse(&self) -> bool {
        matches!(self, SoakDecision::Reuse)
    }
}

/// Decide whether an existing soak group can be reused.
///
/// `group` is `None` when the lookup failed. Reuse requires an age of at most
/// `threshold` and no force flag.
pub fn decide(
    group: Option<&ResourceGroup>,
    threshold: Duration,
    force: bool,
    now: DateTime<Utc>,
) -> SoakDecision {
    let Some(group) = group else {
        return SoakDecision::Recreate(RecreateReason::Missing);
    };
    if force {
        return SoakDecision::Recreate(RecreateReason::Forced);
    }
    if !group.is_expired(threshold, now) {
        return SoakDecision::Reuse;
    }
    match group.age(now) {
        Some(age) => SoakDecision::Recreate(RecreateReason::Expired {
            age_hours: age.num_hours(),
        }),
        None => SoakDecision::Recreate(RecreateReason::NeverDeployed),
    }
}

/// A named soak cluster together with the collaborators needed to manage it
pub struct SoakCluster<'a, A, S> {
    pub name: &'a str,
    pub location: &'a str,
    pub force: bool,
    pub working_dir: &'a Path,
    pub account: &'a A,
    pub storage: &'a S,
    pub policy: &'a RetryPolicy,
}

impl<A: AccountOps, S: StorageOps> SoakCluster<'_, A, S> {
    fn output_dir(&self) -> PathBuf {
        self.working_dir.join(OUTPUT_DIR)
    }

    /// Create the soak storage account and load its connection string.
    pub async fn prepare_storage(&self) -> Result<(), RunnerError> {
        let account = soak_storage_account(self.location);
        retry(self.policy, "create storage account", || {
            self.storage
                .create_account(&account, SOAK_STORAGE_RESOURCE_GROUP, self.location)
        })
        .await
        .with_context(|| format!("Failed to create storage account {account}"))
        .map_err(RunnerError::SoakStorage)?;

        self.storage
            .set_connection_string()
            .await
            .context("Failed to set storage account connection string")
            .map_err(RunnerError::SoakStorage)?;

        info!(account = %account, "Soak storage ready");
        Ok(())
    }

    /// Decide between reuse and recreation and carry it out.
    ///
    /// Never fails: lookup, download and deletion errors degrade to recreation
    /// or are logged.
    pub async fn resolve(&self) -> SoakDecision {
        let group = self.lookup().await;
        let mut decision = decide(group.as_ref(), soak_expiry(), self.force, Utc::now());

        if decision.is_reuse() {
            info!(cluster = %self.name, "Soak cluster exists, downloading output files from storage");
            match self.storage.download_dir(self.name, &self.output_dir()).await {
                Ok(()) => {
                    match credentials::restrict(&self.output_dir()) {
                        Ok(n) => info!(files = n, "Restricted SSH credential permissions"),
                        Err(e) => warn!(error = %e, "Failed to restrict SSH credential permissions"),
                    }
                    return decision;
                }
                Err(e) => {
                    warn!(
                        cluster = %self.name,
                        error = %e,
                        "Failed to download stored outputs, will provision a new cluster"
                    );
                    decision = SoakDecision::Recreate(RecreateReason::ArtifactsUnavailable);
                }
            }
        }

        if let SoakDecision::Recreate(reason) = decision {
            self.discard(reason).await;
        }
        decision
    }

    async fn lookup(&self) -> Option<ResourceGroup> {
        let result = retry_if(
            self.policy,
            "set resource group",
            || self.account.set_resource_group(self.name),
            |e| !is_not_found(e),
        )
        .await;
        match result {
            Ok(group) => Some(group),
            Err(e) => {
                info!(cluster = %self.name, error = %e, "Soak resource group unavailable");
                None
            }
        }
    }

    /// Delete the soak resource group and its stored outputs
    async fn discard(&self, reason: RecreateReason) {
        info!(cluster = %self.name, reason = %reason, "Recreating soak cluster");

        info!(group = %self.name, "Deleting resource group");
        let result = retry_if(
            self.policy,
            "delete resource group",
            || self.account.delete_resource_group(self.name, true),
            |e| !is_not_found(e),
        )
        .await;
        match result {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => info!(group = %self.name, "Soak resource group already gone"),
            Err(e) => warn!(group = %self.name, error = %e, "Failed to delete soak resource group"),
        }

        info!(share = %self.name, "Deleting stored files");
        if let Err(e) = self.storage.delete_files(self.name).await {
            warn!(share = %self.name, error = %e, "Failed to delete stored files");
        }
    }

    /// Store the output directory of a freshly provisioned soak cluster.
    ///
    /// Share creation failures are logged; upload failures are returned.
    pub async fn persist_outputs(&self) -> Result<(), RunnerError> {
        if let Err(e) = self.storage.create_file_share(self.name).await {
            warn!(share = %self.name, error = %e, "Failed to create file share");
        }
        self.storage
            .upload_dir(&self.output_dir(), self.name)
            .await
            .map_err(RunnerError::ArtifactUpload)
    }
}
