//! Shared test utilities for integration tests
//!
//! In-memory fakes for the account, storage, provisioner and test suite
//! collaborators. Each fake is cheap to clone; clones share recorded calls so
//! a test can hand one copy to the orchestrator and inspect the other.
//! Generic fixtures (workspaces, names) are in e2e-runner-test-utils.

#![allow(dead_code)]

use anyhow::{Result, bail};
use chrono::{Duration as ChronoDuration, Utc};
use e2e_runner::azure::{AccountOps, AzError, ResourceGroup, StorageOps, SubscriptionId};
use e2e_runner::config::RunConfig;
use e2e_runner::engine::ClusterEngine;
use e2e_runner::metrics::Point;
use e2e_runner::provision::{
    DEPLOY_LOG_FILE, PROVISIONING_METRICS_FILE, ProvisionRequest, Provisioned, Provisioner,
};
use e2e_runner::retry::RetryPolicy;
use e2e_runner::suite::{SuiteFactory, SuiteTarget, TestSuite};
use e2e_runner::{Orchestrator, RunContext, ResourceTracker, SignalTrap};
use e2e_runner_test_utils::{TestWorkspace, get_test_location, sample_apimodel};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Name the fake provisioner uses when none is requested
pub const FAKE_CLUSTER: &str = "fake-cluster";

/// Retry policy that gives up quickly
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(1), Duration::from_millis(20))
}

pub fn test_config() -> RunConfig {
    let mut config = RunConfig::default();
    config.cluster.location = get_test_location();
    config
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct AccountState {
    pub groups: HashMap<String, ResourceGroup>,
    pub fail_login: bool,
    pub logins: u32,
    pub lookups: Vec<String>,
    pub created: Vec<String>,
    /// `(group, wait)` for every accepted delete
    pub deleted: Vec<(String, bool)>,
    pub activity_logs: Vec<String>,
    /// Groups deleted out of band; their delete fails with not-found
    pub already_gone: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct FakeAccount {
    pub state: Arc<Mutex<AccountState>>,
}

impl FakeAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an existing group last deployed `age_hours` ago
    pub fn with_group(self, name: &str, age_hours: Option<i64>) -> Self {
        lock(&self.state).groups.insert(
            name.to_string(),
            ResourceGroup {
                name: name.into(),
                location: get_test_location(),
                last_deployed_at: age_hours.map(|h| Utc::now() - ChronoDuration::hours(h)),
            },
        );
        self
    }

    pub fn failing_login(self) -> Self {
        lock(&self.state).fail_login = true;
        self
    }

    pub fn already_gone(self, name: &str) -> Self {
        lock(&self.state).already_gone.insert(name.to_string());
        self
    }

    pub fn deleted(&self) -> Vec<(String, bool)> {
        lock(&self.state).deleted.clone()
    }

    /// Deletes issued without waiting, i.e. by teardown
    pub fn teardown_deletes(&self) -> Vec<String> {
        self.deleted()
            .into_iter()
            .filter(|(_, wait)| !wait)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn lookups(&self) -> Vec<String> {
        lock(&self.state).lookups.clone()
    }

    pub fn created(&self) -> Vec<String> {
        lock(&self.state).created.clone()
    }

    pub fn activity_logs(&self) -> Vec<String> {
        lock(&self.state).activity_logs.clone()
    }
}

impl AccountOps for FakeAccount {
    async fn login(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.logins += 1;
        if state.fail_login {
            bail!("login refused");
        }
        Ok(())
    }

    async fn set_subscription(&self) -> Result<SubscriptionId> {
        Ok(SubscriptionId::new("sub-test"))
    }

    async fn set_resource_group(&self, name: &str) -> Result<ResourceGroup> {
        let mut state = lock(&self.state);
        state.lookups.push(name.to_string());
        match state.groups.get(name) {
            Some(group) => Ok(group.clone()),
            None => Err(AzError::NotFound {
                message: format!("Resource group '{name}' could not be found."),
            }
            .into()),
        }
    }

    async fn create_resource_group(&self, name: &str, location: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.created.push(name.to_string());
        state.groups.insert(
            name.to_string(),
            ResourceGroup {
                name: name.into(),
                location: location.to_string(),
                last_deployed_at: Some(Utc::now()),
            },
        );
        Ok(())
    }

    /// Fails with not-found, like `az group delete`, for unknown groups
    async fn delete_resource_group(&self, name: &str, wait: bool) -> Result<()> {
        let mut state = lock(&self.state);
        if state.already_gone.contains(name) || state.groups.remove(name).is_none() {
            return Err(AzError::NotFound {
                message: format!("Resource group '{name}' could not be found."),
            }
            .into());
        }
        state.deleted.push((name.to_string(), wait));
        Ok(())
    }

    async fn fetch_activity_log(&self, group: &str, log_dir: &Path) -> Result<()> {
        std::fs::write(log_dir.join(format!("activity-log-{group}.json")), "[]")?;
        lock(&self.state).activity_logs.push(group.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StorageState {
    pub fail_create_account: bool,
    pub fail_download: bool,
    pub fail_upload: bool,
    /// `(account, resource group)`
    pub accounts: Vec<(String, String)>,
    pub connection_string_set: bool,
    pub shares: Vec<String>,
    pub uploads: Vec<(PathBuf, String)>,
    pub downloads: Vec<String>,
    pub deleted_files: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeStorage {
    pub state: Arc<Mutex<StorageState>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create_account(self) -> Self {
        lock(&self.state).fail_create_account = true;
        self
    }

    pub fn failing_download(self) -> Self {
        lock(&self.state).fail_download = true;
        self
    }

    pub fn failing_upload(self) -> Self {
        lock(&self.state).fail_upload = true;
        self
    }

    pub fn accounts(&self) -> Vec<(String, String)> {
        lock(&self.state).accounts.clone()
    }

    pub fn shares(&self) -> Vec<String> {
        lock(&self.state).shares.clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        lock(&self.state).uploads.clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        lock(&self.state).downloads.clone()
    }

    pub fn deleted_files(&self) -> Vec<String> {
        lock(&self.state).deleted_files.clone()
    }
}

impl StorageOps for FakeStorage {
    async fn create_account(&self, name: &str, resource_group: &str, _location: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_create_account {
            bail!("storage account quota exceeded");
        }
        state
            .accounts
            .push((name.to_string(), resource_group.to_string()));
        Ok(())
    }

    async fn set_connection_string(&self) -> Result<()> {
        lock(&self.state).connection_string_set = true;
        Ok(())
    }

    async fn create_file_share(&self, share: &str) -> Result<()> {
        lock(&self.state).shares.push(share.to_string());
        Ok(())
    }

    async fn upload_dir(&self, source: &Path, share: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_upload {
            bail!("upload interrupted");
        }
        state.uploads.push((source.to_path_buf(), share.to_string()));
        Ok(())
    }

    /// Restores `<share>/apimodel.json` and an SSH key pair into `destination`
    async fn download_dir(&self, share: &str, destination: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        state.downloads.push(share.to_string());
        if state.fail_download {
            bail!("share {share} not found");
        }
        let cluster_dir = destination.join(share);
        std::fs::create_dir_all(&cluster_dir)?;
        std::fs::write(
            cluster_dir.join("apimodel.json"),
            serde_json::to_string(&sample_apimodel(share))?,
        )?;
        for suffix in ["-ssh", "-ssh.pub"] {
            std::fs::write(destination.join(format!("{share}{suffix}")), "key")?;
        }
        Ok(())
    }

    async fn delete_files(&self, share: &str) -> Result<()> {
        lock(&self.state).deleted_files.push(share.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub enum ProvisionMode {
    #[default]
    Succeed,
    Fail,
    /// Register groups, fire the trap if one is set, then never return
    Hang,
}

#[derive(Default)]
pub struct ProvisionerState {
    pub mode: ProvisionMode,
    /// Extra groups created alongside the cluster group
    pub extra_groups: Vec<String>,
    pub trap: Option<SignalTrap>,
    /// Fired with SIGINT when teardown fetches provisioning metrics
    pub teardown_trap: Option<SignalTrap>,
    pub requests: Vec<Option<String>>,
    pub completed: u32,
    /// Cluster name passed to every metrics fetch
    pub metrics_fetched: Vec<Option<String>>,
}

#[derive(Clone)]
pub struct FakeProvisioner {
    working_dir: PathBuf,
    pub state: Arc<Mutex<ProvisionerState>>,
}

impl FakeProvisioner {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            state: Arc::default(),
        }
    }

    pub fn with_mode(self, mode: ProvisionMode) -> Self {
        lock(&self.state).mode = mode;
        self
    }

    pub fn with_extra_group(self, name: &str) -> Self {
        lock(&self.state).extra_groups.push(name.to_string());
        self
    }

    /// Fire `trap` with SIGTERM once groups are registered
    pub fn triggering(self, trap: &SignalTrap) -> Self {
        lock(&self.state).trap = Some(trap.clone());
        self
    }

    /// Fire `trap` with SIGINT while teardown is running
    pub fn interrupting_teardown(self, trap: &SignalTrap) -> Self {
        lock(&self.state).teardown_trap = Some(trap.clone());
        self
    }

    pub fn requests(&self) -> Vec<Option<String>> {
        lock(&self.state).requests.clone()
    }

    pub fn completed(&self) -> u32 {
        lock(&self.state).completed
    }

    pub fn metrics_fetched(&self) -> Vec<Option<String>> {
        lock(&self.state).metrics_fetched.clone()
    }
}

impl Provisioner for FakeProvisioner {
    async fn provision<A: AccountOps>(
        &self,
        account: &A,
        tracker: &ResourceTracker,
        request: &ProvisionRequest,
    ) -> Result<Provisioned> {
        let name = request.name.clone().unwrap_or_else(|| FAKE_CLUSTER.to_string());
        let (mode, extra, trap) = {
            let mut state = lock(&self.state);
            state.requests.push(request.name.clone());
            (state.mode.clone(), state.extra_groups.clone(), state.trap.clone())
        };

        for group in std::iter::once(name.clone()).chain(extra) {
            tracker.register(group.as_str());
            account.create_resource_group(&group, "westus2").await?;
        }

        match mode {
            ProvisionMode::Succeed => {}
            ProvisionMode::Fail => bail!("deployment quota exceeded"),
            ProvisionMode::Hang => {
                if let Some(trap) = trap {
                    trap.trigger("SIGTERM");
                }
                std::future::pending::<()>().await;
            }
        }

        let dir = self.working_dir.join("_output").join(&name);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join("apimodel.json"),
            serde_json::to_string(&sample_apimodel(&name))?,
        )?;
        std::fs::write(dir.join(DEPLOY_LOG_FILE), "deployment succeeded")?;
        let engine = ClusterEngine::load(&self.working_dir, "examples/kubernetes.json", &name)?;

        lock(&self.state).completed += 1;
        Ok(Provisioned { name, engine })
    }

    /// Copies `_output/<cluster>/deploy.log` if the cluster has one
    async fn fetch_provisioning_metrics(
        &self,
        cluster: Option<&str>,
        log_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let trap = {
            let mut state = lock(&self.state);
            state.metrics_fetched.push(cluster.map(str::to_string));
            state.teardown_trap.clone()
        };
        if let Some(trap) = trap {
            trap.trigger("SIGINT");
        }

        let Some(source) = cluster
            .map(|name| self.working_dir.join("_output").join(name).join(DEPLOY_LOG_FILE))
            .filter(|path| path.is_file())
        else {
            return Ok(None);
        };
        let destination = log_dir.join(PROVISIONING_METRICS_FILE);
        std::fs::copy(source, &destination)?;
        Ok(Some(destination))
    }
}

// ---------------------------------------------------------------------------
// Test suite
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SuiteState {
    pub fail_build: bool,
    pub fail_run: bool,
    pub built: Vec<SuiteTarget>,
    pub runs: u32,
}

#[derive(Clone, Default)]
pub struct FakeSuiteFactory {
    pub state: Arc<Mutex<SuiteState>>,
}

impl FakeSuiteFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_build(self) -> Self {
        lock(&self.state).fail_build = true;
        self
    }

    pub fn failing_run(self) -> Self {
        lock(&self.state).fail_run = true;
        self
    }

    pub fn built(&self) -> Vec<SuiteTarget> {
        lock(&self.state).built.clone()
    }

    pub fn runs(&self) -> u32 {
        lock(&self.state).runs
    }
}

pub struct FakeSuite {
    state: Arc<Mutex<SuiteState>>,
}

impl SuiteFactory for FakeSuiteFactory {
    type Suite = FakeSuite;

    fn build(&self, target: &SuiteTarget, _point: &Point) -> Result<FakeSuite> {
        let mut state = lock(&self.state);
        if state.fail_build {
            bail!("unable to parse suite configuration");
        }
        state.built.push(target.clone());
        Ok(FakeSuite {
            state: self.state.clone(),
        })
    }
}

impl TestSuite for FakeSuite {
    async fn run(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.runs += 1;
        if state.fail_run {
            bail!("2 specs failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub type TestOrchestrator = Orchestrator<FakeAccount, FakeStorage, FakeProvisioner, FakeSuiteFactory>;

/// A workspace, a config and one of each fake
pub struct Harness {
    pub ws: TestWorkspace,
    pub config: RunConfig,
    pub account: FakeAccount,
    pub storage: FakeStorage,
    pub provisioner: FakeProvisioner,
    pub suites: FakeSuiteFactory,
}

impl Harness {
    pub fn new() -> Self {
        let ws = TestWorkspace::new();
        let provisioner = FakeProvisioner::new(ws.path());
        Self {
            ws,
            config: test_config(),
            account: FakeAccount::new(),
            storage: FakeStorage::new(),
            provisioner,
            suites: FakeSuiteFactory::new(),
        }
    }

    pub fn orchestrator(&self) -> TestOrchestrator {
        let ctx = RunContext::new(
            self.config.clone(),
            self.ws.path(),
            SubscriptionId::new("sub-test"),
        )
        .with_retry_policy(fast_policy());
        Orchestrator::new(
            ctx,
            self.account.clone(),
            self.storage.clone(),
            self.provisioner.clone(),
            self.suites.clone(),
        )
    }

    /// `_logs/<name>.<location>.<dns-suffix>`
    pub fn log_dir(&self, name: &str) -> PathBuf {
        self.ws.logs_dir().join(format!(
            "{name}.{}.{}",
            self.config.cluster.location, self.config.cluster.dns_suffix
        ))
    }
}
