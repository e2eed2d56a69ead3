//! Azure collaborators consumed by the orchestrator
//!
//! The orchestrator only talks to the cloud through the [`AccountOps`] and
//! [`StorageOps`] traits. Every method performs a single attempt; callers
//! wrap them in [`crate::retry`]. The `az` CLI backed implementations live in
//! [`cli`] and [`storage`].

pub mod account;
pub mod cli;
pub mod error;
pub mod storage;

use anyhow::Result;
use std::path::Path;

pub use account::{AccountInfo, ResourceGroup, SubscriptionId};
pub use cli::AzCli;
pub use error::{AzError, classify_anyhow_error, classify_az_error, ignore_not_found, is_not_found};
pub use storage::AzStorage;

/// Account-level operations: identity, subscription and resource groups.
#[allow(async_fn_in_trait)] // Used through generics only, never as a trait object
pub trait AccountOps {
    /// Authenticate against the cloud
    async fn login(&self) -> Result<()>;

    /// Select the configured subscription and return its id
    async fn set_subscription(&self) -> Result<SubscriptionId>;

    /// Look up an existing resource group, including its deployment history.
    ///
    /// Returns an error classified as not-found if the group does not exist.
    async fn set_resource_group(&self, name: &str) -> Result<ResourceGroup>;

    async fn create_resource_group(&self, name: &str, location: &str) -> Result<()>;

    /// Request deletion of a resource group.
    ///
    /// With `wait == false` the call returns once the delete was accepted,
    /// without waiting for the cloud to finish removing the group.
    async fn delete_resource_group(&self, name: &str, wait: bool) -> Result<()>;

    /// Write the activity log of `group` into `log_dir`
    async fn fetch_activity_log(&self, group: &str, log_dir: &Path) -> Result<()>;
}

/// Storage operations backing soak-cluster artifacts.
#[allow(async_fn_in_trait)]
pub trait StorageOps {
    async fn create_account(&self, name: &str, resource_group: &str, location: &str) -> Result<()>;

    /// Resolve and remember the connection string for the created account
    async fn set_connection_string(&self) -> Result<()>;

    async fn create_file_share(&self, share: &str) -> Result<()>;

    /// Upload the contents of `source` into `share`
    async fn upload_dir(&self, source: &Path, share: &str) -> Result<()>;

    /// Download the contents of `share` into `destination`
    async fn download_dir(&self, share: &str, destination: &Path) -> Result<()>;

    /// Delete every file stored for `share`
    async fn delete_files(&self, share: &str) -> Result<()>;
}
