//! Configuration types for a run

use std::path::PathBuf;
use std::time::Duration;

use crate::defaults::{
    DEFAULT_CLUSTER_DEFINITION, DEFAULT_DEPLOY_COMMAND, DEFAULT_DNS_SUFFIX, DEFAULT_NAME_PREFIX,
    DEFAULT_ORCHESTRATOR, DEFAULT_RETRY_DELAY, DEFAULT_SUITE_COMMAND, DEFAULT_SUITE_DIR,
    DEFAULT_TIMEOUT_SECS,
};
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Which cluster to run against and where
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Existing cluster to attach to; `None` provisions a new one
    pub name: Option<String>,
    pub location: String,
    /// Orchestrator type, e.g. "kubernetes"
    pub orchestrator: String,
    /// Path of the cluster definition template, relative to the working directory
    pub cluster_definition: String,
    /// Long-lived cluster to reuse across runs
    pub soak_cluster_name: Option<String>,
    pub dns_suffix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: None,
            location: String::new(),
            orchestrator: DEFAULT_ORCHESTRATOR.to_string(),
            cluster_definition: DEFAULT_CLUSTER_DEFINITION.to_string(),
            soak_cluster_name: None,
            dns_suffix: DEFAULT_DNS_SUFFIX.to_string(),
        }
    }
}

/// Azure credentials. Every field is optional; without a service principal
/// the ambient `az login` session is used.
#[derive(Clone, Default)]
pub struct AzureConfig {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl AzureConfig {
    pub fn has_service_principal(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.tenant_id.is_some()
    }
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Cluster provisioning tool
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub deploy_command: String,
    /// Prefix for generated cluster names
    pub name_prefix: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            deploy_command: DEFAULT_DEPLOY_COMMAND.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

/// Validation test suite
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Directory the suite runs in, relative to the working directory
    pub dir: PathBuf,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SUITE_COMMAND.to_string(),
            args: Vec::new(),
            dir: PathBuf::from(DEFAULT_SUITE_DIR),
        }
    }
}

/// Runtime behavior flags
#[derive(Debug, Clone)]
pub struct RuntimeFlags {
    /// Recreate the soak cluster even if it has not expired
    pub force_deploy: bool,
    /// Delete tracked resource groups during teardown
    pub clean_up_on_exit: bool,
    /// Run teardown when provisioning or the test suite fails
    pub clean_up_if_fail: bool,
    pub skip_test: bool,
    pub skip_logs_collection: bool,
    /// Keep SSH credential files in the output directory
    pub retain_ssh: bool,
    /// Deadline for retried cloud calls and the test suite, in seconds
    pub timeout: u64,
    /// Append the metrics point to this file as a JSON line
    pub metrics_file: Option<PathBuf>,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            force_deploy: false,
            clean_up_on_exit: true,
            clean_up_if_fail: true,
            skip_test: false,
            skip_logs_collection: false,
            retain_ssh: false,
            timeout: DEFAULT_TIMEOUT_SECS,
            metrics_file: None,
        }
    }
}

/// Configuration for a run
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub cluster: ClusterConfig,
    pub azure: AzureConfig,
    pub provision: ProvisionConfig,
    pub suite: SuiteConfig,
    pub flags: RuntimeFlags,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cluster = &self.cluster;
        if cluster.location.trim().is_empty() {
            return Err(ConfigError::EmptyLocation);
        }
        if cluster.orchestrator.trim().is_empty() {
            return Err(ConfigError::EmptyOrchestrator);
        }
        if cluster.cluster_definition.trim().is_empty() {
            return Err(ConfigError::EmptyClusterDefinition);
        }
        if self.flags.timeout == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        for name in [&cluster.name, &cluster.soak_cluster_name].into_iter().flatten() {
            if !is_valid_cluster_name(name) {
                return Err(ConfigError::InvalidClusterName(name.clone()));
            }
        }
        if self.is_soak()
            && !cluster
                .location
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(ConfigError::InvalidSoakLocation(cluster.location.clone()));
        }

        let azure = &self.azure;
        let sp_fields = [&azure.client_id, &azure.client_secret, &azure.tenant_id];
        let set = sp_fields.iter().filter(|f| f.is_some()).count();
        // tenant id alone is allowed; it is also used by `az login` sessions
        if set > 0 && set < 3 && (azure.client_id.is_some() || azure.client_secret.is_some()) {
            return Err(ConfigError::PartialServicePrincipal);
        }

        if self.suite.command.trim().is_empty() {
            return Err(ConfigError::EmptySuiteCommand);
        }
        if self.provision.deploy_command.trim().is_empty() {
            return Err(ConfigError::EmptyDeployCommand);
        }
        Ok(())
    }

    pub fn is_kubernetes(&self) -> bool {
        self.cluster.orchestrator.eq_ignore_ascii_case("kubernetes")
    }

    pub fn soak_cluster_name(&self) -> Option<&str> {
        self.cluster.soak_cluster_name.as_deref()
    }

    pub fn is_soak(&self) -> bool {
        self.cluster.soak_cluster_name.is_some()
    }

    /// Cluster name bound at the start of a run.
    ///
    /// In soak mode this is the soak cluster, otherwise the configured name.
    pub fn initial_cluster_name(&self) -> Option<String> {
        self.cluster
            .soak_cluster_name
            .clone()
            .or_else(|| self.cluster.name.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.flags.timeout)
    }

    /// Retry policy for cloud-control-plane calls: fixed delay until the run timeout
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(DEFAULT_RETRY_DELAY, self.timeout())
    }
}

fn is_valid_cluster_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
