//! `az` CLI backed account collaborator
//!
//! Each method shells out to a single `az` invocation. Failures are turned
//! into [`AzError`] values from stderr so callers can tell not-found and
//! throttling apart from real errors.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use super::account::{AccountInfo, ResourceGroup, SubscriptionId};
use super::error::classify_az_error;
use super::{AccountOps, AzError};
use crate::config::AzureConfig;

/// Tag applied to every resource group this tool creates
const CREATED_BY_TAG: &str = "created-by=e2e-runner";

/// How far back the activity log is fetched
const ACTIVITY_LOG_OFFSET: &str = "7d";

/// Shared handle to the `az` CLI.
///
/// Cloning is cheap; every clone uses the same credentials.
#[derive(Clone)]
pub struct AzCli {
    inner: Arc<AzCliInner>,
}

struct AzCliInner {
    program: String,
    credentials: AzureConfig,
}

#[derive(Debug, Deserialize)]
struct GroupShow {
    name: String,
    location: String,
}

impl AzCli {
    pub fn new(credentials: &AzureConfig) -> Self {
        Self::with_program("az", credentials)
    }

    /// Use a different executable, e.g. a wrapper script
    pub fn with_program(program: impl Into<String>, credentials: &AzureConfig) -> Self {
        Self {
            inner: Arc::new(AzCliInner {
                program: program.into(),
                credentials: credentials.clone(),
            }),
        }
    }

    /// Run `az <args>` and return stdout.
    ///
    /// Only the subcommand (the leading non-flag arguments) is logged, so
    /// secrets passed as flag values never reach the logs.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let subcommand = subcommand(args);
        debug!(command = %subcommand, "Running az");

        let output = Command::new(&self.inner.program)
            .args(args)
            .arg("--only-show-errors")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn {} {}", self.inner.program, subcommand))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_az_error(&subcommand, &stderr).into());
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("az {subcommand} produced non-UTF-8 output"))
    }

    /// Run `az <args> -o json` and deserialize stdout
    pub async fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["-o", "json"]);
        let stdout = self.run(&full).await?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("Failed to parse output of az {}", subcommand(args)))
    }

    async fn last_deployment(&self, group: &str) -> Result<Option<DateTime<Utc>>> {
        let timestamps: Vec<DateTime<Utc>> = self
            .run_json(&[
                "deployment",
                "group",
                "list",
                "--resource-group",
                group,
                "--query",
                "[].properties.timestamp",
            ])
            .await?;
        Ok(timestamps.into_iter().max())
    }
}

impl AccountOps for AzCli {
    async fn login(&self) -> Result<()> {
        let creds = &self.inner.credentials;
        match (&creds.client_id, &creds.client_secret, &creds.tenant_id) {
            (Some(client_id), Some(secret), Some(tenant)) => {
                self.run(&[
                    "login",
                    "--service-principal",
                    "--username",
                    client_id.as_str(),
                    "--password",
                    secret.as_str(),
                    "--tenant",
                    tenant.as_str(),
                    "-o",
                    "none",
                ])
                .await?;
                info!(client_id = %client_id, "Logged in with service principal");
            }
            _ => {
                // No service principal configured: reuse the ambient session.
                self.run(&["account", "show", "-o", "none"]).await?;
                info!("Using existing az login session");
            }
        }
        Ok(())
    }

    async fn set_subscription(&self) -> Result<SubscriptionId> {
        if let Some(subscription) = &self.inner.credentials.subscription_id {
            self.run(&["account", "set", "--subscription", subscription.as_str()])
                .await?;
        }
        let account: AccountInfo = self.run_json(&["account", "show"]).await?;
        info!(subscription_id = %account.id, name = %account.name, "Subscription selected");
        Ok(SubscriptionId::new(account.id))
    }

    async fn set_resource_group(&self, name: &str) -> Result<ResourceGroup> {
        let group: GroupShow = self.run_json(&["group", "show", "--name", name]).await?;
        let last_deployed_at = self.last_deployment(name).await?;
        debug!(group = %group.name, last_deployed_at = ?last_deployed_at, "Resource group found");
        Ok(ResourceGroup {
            name: group.name.into(),
            location: group.location,
            last_deployed_at,
        })
    }

    async fn create_resource_group(&self, name: &str, location: &str) -> Result<()> {
        let result = self
            .run(&[
                "group", "create", "--name", name, "--location", location, "--tags",
                CREATED_BY_TAG, "-o", "none",
            ])
            .await;
        match result {
            Err(e) if e.downcast_ref::<AzError>().is_some_and(AzError::is_already_exists) => {
                debug!(group = %name, "Resource group already exists");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn delete_resource_group(&self, name: &str, wait: bool) -> Result<()> {
        let mut args = vec!["group", "delete", "--name", name, "--yes"];
        if !wait {
            args.push("--no-wait");
        }
        self.run(&args).await.map(|_| ())
    }

    async fn fetch_activity_log(&self, group: &str, log_dir: &Path) -> Result<()> {
        let log = self
            .run(&[
                "monitor",
                "activity-log",
                "list",
                "--resource-group",
                group,
                "--offset",
                ACTIVITY_LOG_OFFSET,
                "-o",
                "json",
            ])
            .await?;
        let path = log_dir.join(format!("activity-log-{group}.json"));
        tokio::fs::write(&path, log)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(group = %group, path = %path.display(), "Activity log written");
        Ok(())
    }
}

impl std::fmt::Debug for AzCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzCli")
            .field("program", &self.inner.program)
            .finish_non_exhaustive()
    }
}

/// Leading arguments up to the first flag, e.g. `group show`
fn subcommand(args: &[&str]) -> String {
    args.iter()
        .take_while(|a| !a.starts_with('-'))
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
