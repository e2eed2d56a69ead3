//! `az storage` backed file-share collaborator for soak artifacts

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::cli::AzCli;
use super::error::ignore_not_found;
use super::{AzError, StorageOps};

#[derive(Debug, Clone)]
struct StorageAccountRef {
    name: String,
    resource_group: String,
}

/// Storage account and file shares used to persist soak cluster outputs.
///
/// [`StorageOps::create_account`] and [`StorageOps::set_connection_string`]
/// must run before any share operation.
pub struct AzStorage {
    cli: AzCli,
    account: Mutex<Option<StorageAccountRef>>,
    connection_string: Mutex<Option<String>>,
}

impl AzStorage {
    pub fn new(cli: AzCli) -> Self {
        Self {
            cli,
            account: Mutex::new(None),
            connection_string: Mutex::new(None),
        }
    }

    fn account(&self) -> Result<StorageAccountRef> {
        match self.account.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(account) => Ok(account),
            None => bail!("Storage account has not been created"),
        }
    }

    fn connection_string(&self) -> Result<String> {
        match self
            .connection_string
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            Some(cs) => Ok(cs),
            None => bail!("Storage connection string has not been set"),
        }
    }
}

impl StorageOps for AzStorage {
    async fn create_account(&self, name: &str, resource_group: &str, location: &str) -> Result<()> {
        let result = self
            .cli
            .run(&[
                "storage",
                "account",
                "create",
                "--name",
                name,
                "--resource-group",
                resource_group,
                "--location",
                location,
                "--sku",
                "Standard_LRS",
                "-o",
                "none",
            ])
            .await;
        match result {
            Ok(_) => info!(account = %name, "Storage account created"),
            Err(e) if e.downcast_ref::<AzError>().is_some_and(AzError::is_already_exists) => {
                debug!(account = %name, "Storage account already exists");
            }
            Err(e) => return Err(e),
        }

        *self.account.lock().unwrap_or_else(|e| e.into_inner()) = Some(StorageAccountRef {
            name: name.to_string(),
            resource_group: resource_group.to_string(),
        });
        Ok(())
    }

    async fn set_connection_string(&self) -> Result<()> {
        let account = self.account()?;
        let output = self
            .cli
            .run(&[
                "storage",
                "account",
                "show-connection-string",
                "--name",
                &account.name,
                "--resource-group",
                &account.resource_group,
                "--query",
                "connectionString",
                "-o",
                "tsv",
            ])
            .await?;
        let cs = output.trim();
        if cs.is_empty() {
            bail!("Empty connection string for storage account {}", account.name);
        }
        *self
            .connection_string
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(cs.to_string());
        debug!(account = %account.name, "Storage connection string set");
        Ok(())
    }

    async fn create_file_share(&self, share: &str) -> Result<()> {
        let cs = self.connection_string()?;
        let result = self
            .cli
            .run(&[
                "storage",
                "share",
                "create",
                "--name",
                share,
                "--connection-string",
                &cs,
                "-o",
                "none",
            ])
            .await;
        match result {
            Err(e) if e.downcast_ref::<AzError>().is_some_and(AzError::is_already_exists) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn upload_dir(&self, source: &Path, share: &str) -> Result<()> {
        let cs = self.connection_string()?;
        let source_str = source.to_string_lossy();
        self.cli
            .run(&[
                "storage",
                "file",
                "upload-batch",
                "--destination",
                share,
                "--source",
                &source_str,
                "--connection-string",
                &cs,
                "-o",
                "none",
            ])
            .await
            .with_context(|| format!("Failed to upload {} to share {share}", source.display()))?;
        info!(share = %share, source = %source.display(), "Uploaded output directory");
        Ok(())
    }

    async fn download_dir(&self, share: &str, destination: &Path) -> Result<()> {
        let cs = self.connection_string()?;
        tokio::fs::create_dir_all(destination)
            .await
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        let destination_str = destination.to_string_lossy();
        self.cli
            .run(&[
                "storage",
                "file",
                "download-batch",
                "--source",
                share,
                "--destination",
                &destination_str,
                "--connection-string",
                &cs,
                "-o",
                "none",
            ])
            .await
            .with_context(|| format!("Failed to download share {share}"))?;
        info!(share = %share, destination = %destination.display(), "Downloaded stored outputs");
        Ok(())
    }

    async fn delete_files(&self, share: &str) -> Result<()> {
        let cs = self.connection_string()?;
        let result = self
            .cli
            .run(&[
                "storage",
                "file",
                "delete-batch",
                "--source",
                share,
                "--connection-string",
                &cs,
            ])
            .await
            .map(|_| ());
        ignore_not_found(result)
    }
}

impl std::fmt::Debug for AzStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzStorage")
            .field("account", &self.account.lock().ok().and_then(|a| a.clone()))
            .finish_non_exhaustive()
    }
}
