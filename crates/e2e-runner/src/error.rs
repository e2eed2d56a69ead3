//! Typed errors for configuration validation and run aborts

use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("location cannot be empty")]
    EmptyLocation,

    #[error("orchestrator cannot be empty")]
    EmptyOrchestrator,

    #[error("cluster definition cannot be empty")]
    EmptyClusterDefinition,

    #[error("timeout must be greater than 0")]
    InvalidTimeout,

    /// Cluster names become resource-group names and DNS labels
    #[error("invalid cluster name '{0}': use letters, digits, '-' or '_'")]
    InvalidClusterName(String),

    /// Soak storage account names are `acsesoaktests<location>` and must be lowercase alphanumeric
    #[error("location '{0}' cannot be used in a soak storage account name")]
    InvalidSoakLocation(String),

    #[error("service principal login needs client id, client secret and tenant id together")]
    PartialServicePrincipal,

    #[error("test suite command cannot be empty")]
    EmptySuiteCommand,

    #[error("deploy command cannot be empty")]
    EmptyDeployCommand,
}

/// Reasons a run aborts.
///
/// Account, subscription, soak storage and configuration errors happen before
/// anything is created, so they abort without teardown. Every other variant
/// triggers teardown first when clean-up-if-fail is set.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Error while trying to log in to the azure account: {0:#}")]
    AccountSetup(anyhow::Error),

    #[error("Error while trying to set the azure subscription: {0:#}")]
    Subscription(anyhow::Error),

    #[error("Error while trying to set up soak storage: {0:#}")]
    SoakStorage(anyhow::Error),

    #[error("Error while trying to provision cluster: {0:#}")]
    Provisioning(anyhow::Error),

    #[error("Error while trying to parse engine config: {0:#}")]
    EngineConfig(anyhow::Error),

    #[error("Error while trying to parse engine template: {0:#}")]
    EngineTemplate(anyhow::Error),

    #[error("Unable to build the test suite: {0:#}")]
    SuiteBuild(anyhow::Error),

    #[error("Test suite failed: {0:#}")]
    TestSuite(anyhow::Error),

    #[error("Error while trying to upload the output directory: {0:#}")]
    ArtifactUpload(anyhow::Error),
}

impl RunnerError {
    /// True for errors raised before any resource could have been created
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            RunnerError::Config(_)
                | RunnerError::AccountSetup(_)
                | RunnerError::Subscription(_)
                | RunnerError::SoakStorage(_)
        )
    }
}
