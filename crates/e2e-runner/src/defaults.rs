//! Default configuration values and well-known names
//!
//! These constants keep the CLI defaults, the soak storage layout and the
//! on-disk layout of a run consistent across modules.

use std::time::Duration;

/// Delay between attempts of a retried cloud-control-plane call
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default overall deadline for retried calls, in seconds (20 minutes)
pub const DEFAULT_TIMEOUT_SECS: u64 = 1200;

/// Age after which a soak cluster is recreated (7 days)
pub const SOAK_EXPIRY_HOURS: i64 = 168;

/// Storage account name prefix for soak artifacts; the location is appended
pub const SOAK_STORAGE_ACCOUNT_PREFIX: &str = "acsesoaktests";

/// Resource group holding the soak storage accounts
pub const SOAK_STORAGE_RESOURCE_GROUP: &str = "acse-test-infrastructure-storage";

/// Directory (relative to the working directory) holding provisioner output
pub const OUTPUT_DIR: &str = "_output";

/// Directory (relative to the working directory) holding collected logs
pub const LOGS_DIR: &str = "_logs";

/// Glob matching SSH credential files inside the output directory
pub const SSH_CREDENTIALS_GLOB: &str = "*ssh*";

/// DNS suffix for public cluster endpoints
pub const DEFAULT_DNS_SUFFIX: &str = "cloudapp.azure.com";

/// Default orchestrator type
pub const DEFAULT_ORCHESTRATOR: &str = "kubernetes";

/// Default cluster definition template
pub const DEFAULT_CLUSTER_DEFINITION: &str = "examples/kubernetes.json";

/// Default prefix for generated cluster names
pub const DEFAULT_NAME_PREFIX: &str = "e2e";

/// Default provisioning binary
pub const DEFAULT_DEPLOY_COMMAND: &str = "aks-engine";

/// Default test suite binary
pub const DEFAULT_SUITE_COMMAND: &str = "ginkgo";

/// Default test suite directory, relative to the working directory
pub const DEFAULT_SUITE_DIR: &str = "test/e2e/kubernetes";

/// Soak expiry threshold as a chrono duration
pub fn soak_expiry() -> chrono::Duration {
    chrono::Duration::hours(SOAK_EXPIRY_HOURS)
}

/// Storage account used for a soak cluster in `location`
pub fn soak_storage_account(location: &str) -> String {
    format!("{SOAK_STORAGE_ACCOUNT_PREFIX}{location}")
}
