//! Cluster provisioning
//!
//! A [`Provisioner`] creates the resource groups and cluster for a run. It must
//! register every group with the [`ResourceTracker`] before creating it, so
//! teardown can delete partially created clusters.

use anyhow::{Context, Result, bail};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::azure::{AccountOps, SubscriptionId};
use crate::command::{CommandConfig, CommandSpec, run_command_streaming};
use crate::config::RunConfig;
use crate::defaults::OUTPUT_DIR;
use crate::engine::ClusterEngine;
use crate::retry::{RetryPolicy, retry};
use crate::tracker::ResourceTracker;

/// Name of the provisioning log inside the cluster output directory
pub const DEPLOY_LOG_FILE: &str = "deploy.log";

/// Name the provisioning log is copied to inside the log directory
pub const PROVISIONING_METRICS_FILE: &str = "provisioning.log";

/// Inputs for a single provisioning attempt
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Name to use for the cluster and its resource group; generated if `None`
    pub name: Option<String>,
    pub subscription_id: SubscriptionId,
}

/// A freshly provisioned cluster
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub name: String,
    pub engine: ClusterEngine,
}

#[allow(async_fn_in_trait)]
pub trait Provisioner {
    /// Create a cluster, registering each resource group in `tracker` first
    async fn provision<A: AccountOps>(
        &self,
        account: &A,
        tracker: &ResourceTracker,
        request: &ProvisionRequest,
    ) -> Result<Provisioned>;

    /// Copy provisioning metrics for `cluster` into `log_dir`.
    ///
    /// Returns the copied file, or `None` if no provisioning log exists, as for
    /// a cluster that was attached rather than provisioned by this run.
    async fn fetch_provisioning_metrics(
        &self,
        cluster: Option<&str>,
        log_dir: &Path,
    ) -> Result<Option<PathBuf>>;
}

/// Provisioner driving an `aks-engine deploy` style CLI
pub struct CliProvisioner {
    config: RunConfig,
    working_dir: PathBuf,
    policy: RetryPolicy,
    deploy_log: Mutex<Option<PathBuf>>,
}

impl CliProvisioner {
    pub fn new(config: RunConfig, working_dir: impl Into<PathBuf>) -> Self {
        let policy = config.retry_policy();
        Self {
            config,
            working_dir: working_dir.into(),
            policy,
            deploy_log: Mutex::new(None),
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.working_dir.join(OUTPUT_DIR)
    }

    fn generate_name(&self) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..0x10_0000);
        format!(
            "{}-{}-{suffix:05x}",
            self.config.provision.name_prefix, self.config.cluster.location
        )
    }

    /// Generate an SSH key pair at `_output/<name>-ssh` and return the public key
    async fn generate_ssh_key(&self, name: &str) -> Result<String> {
        let key_path = self.output_dir().join(format!("{name}-ssh"));
        let spec = CommandSpec::new("ssh-keygen").args([
            "-t".to_string(),
            "rsa".to_string(),
            "-b".to_string(),
            "4096".to_string(),
            "-N".to_string(),
            String::new(),
            "-q".to_string(),
            "-f".to_string(),
            key_path.to_string_lossy().into_owned(),
        ]);
        let config = CommandConfig::with_timeout(self.config.timeout());
        let output = run_command_streaming("ssh-keygen", &spec, &config).await?;
        if !output.success {
            bail!("ssh-keygen failed for {}", key_path.display());
        }
        let public = key_path.with_file_name(format!("{name}-ssh.pub"));
        let key = tokio::fs::read_to_string(&public)
            .await
            .with_context(|| format!("Failed to read {}", public.display()))?;
        Ok(key.trim().to_string())
    }

    fn deploy_spec(
        &self,
        name: &str,
        subscription: &SubscriptionId,
        public_key: &str,
    ) -> CommandSpec {
        let cluster = &self.config.cluster;
        let output_dir = self.output_dir().join(name);
        CommandSpec::new(&self.config.provision.deploy_command)
            .current_dir(&self.working_dir)
            .arg("deploy")
            .arg("--api-model")
            .arg(self.working_dir.join(&cluster.cluster_definition).to_string_lossy())
            .args(["--location", cluster.location.as_str()])
            .args(["--resource-group", name])
            .args(["--dns-prefix", name])
            .arg("--output-directory")
            .arg(output_dir.to_string_lossy())
            .args(["--subscription-id", subscription.as_str()])
            .args(["--auth-method", "cli"])
            .arg("--set")
            .arg(format!("linuxProfile.ssh.publicKeys[0].keyData={public_key}"))
    }
}

impl Provisioner for CliProvisioner {
    async fn provision<A: AccountOps>(
        &self,
        account: &A,
        tracker: &ResourceTracker,
        request: &ProvisionRequest,
    ) -> Result<Provisioned> {
        let name = request.name.clone().unwrap_or_else(|| self.generate_name());
        let location = &self.config.cluster.location;
        info!(cluster = %name, location = %location, "Provisioning cluster");

        tracker.register(name.as_str());
        retry(&self.policy, "create resource group", || {
            account.create_resource_group(&name, location)
        })
        .await
        .with_context(|| format!("Failed to create resource group {name}"))?;

        tokio::fs::create_dir_all(self.output_dir())
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir().display()))?;
        let public_key = self.generate_ssh_key(&name).await?;

        let spec = self.deploy_spec(&name, &request.subscription_id, &public_key);
        let output = run_command_streaming(
            "deploy",
            &spec,
            &CommandConfig::with_timeout(self.config.timeout()),
        )
        .await?;

        let cluster_output = self.output_dir().join(&name);
        tokio::fs::create_dir_all(&cluster_output).await?;
        let log_path = cluster_output.join(DEPLOY_LOG_FILE);
        if let Err(e) = tokio::fs::write(&log_path, output.lines.join("\n")).await {
            warn!(path = %log_path.display(), error = %e, "Failed to write deploy log");
        } else {
            *self.deploy_log.lock().unwrap_or_else(|e| e.into_inner()) = Some(log_path);
        }

        if !output.success {
            let tail = &output.lines[output.lines.len().saturating_sub(5)..];
            bail!("{} deploy failed: {}", spec.program, tail.join(" | "));
        }

        let engine = ClusterEngine::load(
            &self.working_dir,
            &self.config.cluster.cluster_definition,
            &name,
        )?;
        info!(cluster = %name, "Cluster provisioned");
        Ok(Provisioned { name, engine })
    }

    async fn fetch_provisioning_metrics(
        &self,
        cluster: Option<&str>,
        log_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let recorded = self
            .deploy_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        // Fall back to a log left behind by an earlier run of the same cluster
        let Some(source) = recorded.or_else(|| {
            cluster
                .map(|name| self.output_dir().join(name).join(DEPLOY_LOG_FILE))
                .filter(|path| path.is_file())
        }) else {
            return Ok(None);
        };
        let destination = log_dir.join(PROVISIONING_METRICS_FILE);
        tokio::fs::copy(&source, &destination)
            .await
            .with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
        Ok(Some(destination))
    }
}
