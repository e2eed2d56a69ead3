//! Run lifecycle: soak decision, provision or attach, tests, teardown
//!
//! The main sequence is raced against the [`SignalTrap`]. Whichever finishes
//! first, the orchestrator is the only caller of [`TeardownSequence::run`].

use anyhow::Context;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::azure::{AccountOps, StorageOps, SubscriptionId};
use crate::context::RunContext;
use crate::engine::{self, ClusterEngine};
use crate::error::RunnerError;
use crate::provision::{ProvisionRequest, Provisioner};
use crate::retry::{RetryPolicy, retry};
use crate::signal::SignalTrap;
use crate::soak::SoakCluster;
use crate::suite::{SuiteFactory, SuiteTarget, TestSuite};
use crate::teardown::{TeardownOutcome, TeardownSequence};

/// How a run ended
#[derive(Debug)]
pub enum RunExit {
    Success,
    Failed(RunnerError),
    Interrupted { signal: String },
}

impl RunExit {
    /// Process exit code
    pub fn code(&self) -> i32 {
        match self {
            RunExit::Success => 0,
            RunExit::Failed(_) | RunExit::Interrupted { .. } => 1,
        }
    }
}

/// Why the main sequence stopped early
enum Abort {
    Interrupted(String),
    Failed(RunnerError),
}

#[derive(Debug)]
pub struct RunReport {
    pub exit: RunExit,
    /// `None` if teardown did not run
    pub teardown: Option<TeardownOutcome>,
}

/// Log in and select the subscription, each retried until the policy deadline.
pub async fn setup_account<A: AccountOps>(
    account: &A,
    policy: &RetryPolicy,
) -> Result<SubscriptionId, RunnerError> {
    retry(policy, "login", || account.login())
        .await
        .map_err(RunnerError::AccountSetup)?;
    retry(policy, "set subscription", || account.set_subscription())
        .await
        .map_err(RunnerError::Subscription)
}

pub struct Orchestrator<A, S, P, F> {
    ctx: RunContext,
    account: A,
    storage: S,
    provisioner: P,
    suites: F,
    teardown: TeardownSequence,
}

impl<A, S, P, F> Orchestrator<A, S, P, F>
where
    A: AccountOps,
    S: StorageOps,
    P: Provisioner,
    F: SuiteFactory,
{
    pub fn new(ctx: RunContext, account: A, storage: S, provisioner: P, suites: F) -> Self {
        Self {
            ctx,
            account,
            storage,
            provisioner,
            suites,
            teardown: TeardownSequence::new(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Run the lifecycle to completion or until `trap` fires.
    pub async fn run(&self, trap: &SignalTrap) -> RunReport {
        let result = tokio::select! {
            biased;
            signal = trap.triggered() => Err(Abort::Interrupted(signal)),
            result = self.sequence() => result.map_err(Abort::Failed),
        };

        match result {
            Ok(()) => {
                let teardown = self.teardown().await;
                // A signal that lands during the final teardown still fails the run
                let exit = match trap.signal() {
                    Some(signal) => {
                        info!(signal = %signal, "Interrupted during teardown");
                        RunExit::Interrupted {
                            signal: signal.to_string(),
                        }
                    }
                    None => RunExit::Success,
                };
                RunReport { exit, teardown }
            }
            Err(Abort::Interrupted(signal)) => {
                info!(
                    signal = %signal,
                    clean_up_on_exit = self.ctx.config.flags.clean_up_on_exit,
                    "Interrupted, abandoning run"
                );
                RunReport {
                    exit: RunExit::Interrupted { signal },
                    teardown: self.teardown().await,
                }
            }
            Err(Abort::Failed(e)) => {
                error!(error = %e, "Run failed");
                let teardown = if e.is_setup_error() {
                    None
                } else if self.ctx.config.flags.clean_up_if_fail {
                    self.teardown().await
                } else {
                    warn!("Clean-up-if-fail is disabled, leaving resources in place");
                    None
                };
                RunReport {
                    exit: RunExit::Failed(e),
                    teardown,
                }
            }
        }
    }

    /// Run teardown unless it already ran
    pub async fn teardown(&self) -> Option<TeardownOutcome> {
        self.teardown
            .run(&self.ctx, &self.account, &self.provisioner)
            .await
    }

    async fn sequence(&self) -> Result<(), RunnerError> {
        if let Some(soak) = self.soak_cluster() {
            soak.prepare_storage().await?;
            let decision = soak.resolve().await;
            info!(cluster = %soak.name, decision = %decision, "Soak decision");
            if !decision.is_reuse() {
                self.ctx.set_cluster_name(None);
            }
        }

        match self.ctx.cluster_name() {
            None => self.provision().await?,
            Some(name) => self.attach(&name)?,
        }

        if self.ctx.config.flags.skip_test {
            info!("Skipping tests");
            return Ok(());
        }
        self.run_tests().await
    }

    fn soak_cluster(&self) -> Option<SoakCluster<'_, A, S>> {
        let config = &self.ctx.config;
        config.soak_cluster_name().map(|name| SoakCluster {
            name,
            location: &config.cluster.location,
            force: config.flags.force_deploy,
            working_dir: &self.ctx.working_dir,
            account: &self.account,
            storage: &self.storage,
            policy: &self.ctx.policy,
        })
    }

    async fn provision(&self) -> Result<(), RunnerError> {
        let request = ProvisionRequest {
            name: self.ctx.config.soak_cluster_name().map(str::to_string),
            subscription_id: self.ctx.subscription_id().clone(),
        };

        let start = Instant::now();
        let provisioned = self
            .provisioner
            .provision(&self.account, &self.ctx.tracker, &request)
            .await
            .map_err(RunnerError::Provisioning)?;
        self.ctx
            .update_point(|p| p.record_provisioning(start.elapsed()));

        info!(cluster = %provisioned.name, "Bound to provisioned cluster");
        self.ctx.set_cluster_name(Some(provisioned.name));
        self.ctx.set_engine(provisioned.engine);

        if let Some(soak) = self.soak_cluster() {
            soak.persist_outputs().await?;
        }
        Ok(())
    }

    fn attach(&self, name: &str) -> Result<(), RunnerError> {
        info!(cluster = %name, "Using existing cluster");
        self.ctx.tracker.register(name);

        let config = engine::parse_config(
            &self.ctx.working_dir,
            &self.ctx.config.cluster.cluster_definition,
            name,
        )
        .map_err(RunnerError::EngineConfig)?;
        let definition = engine::parse_input(&config.cluster_definition_template)
            .map_err(RunnerError::EngineTemplate)?;

        self.ctx.set_engine(ClusterEngine { config, definition });
        Ok(())
    }

    async fn run_tests(&self) -> Result<(), RunnerError> {
        let target = self.suite_target().map_err(RunnerError::SuiteBuild)?;
        let suite = self
            .suites
            .build(&target, &self.ctx.point())
            .map_err(RunnerError::SuiteBuild)?;

        let start = Instant::now();
        let result = suite.run().await;
        self.ctx.update_point(|p| p.record_tests(start.elapsed()));
        result.map_err(RunnerError::TestSuite)
    }

    fn suite_target(&self) -> anyhow::Result<SuiteTarget> {
        let state = self.ctx.snapshot();
        let cluster_name = state.cluster_name.context("No cluster bound")?;
        let engine = state.engine.context("No cluster engine loaded")?;
        let cluster = &self.ctx.config.cluster;
        Ok(SuiteTarget {
            kubeconfig: engine.config.kubeconfig_path(&cluster.location),
            cluster_name,
            location: cluster.location.clone(),
            orchestrator: cluster.orchestrator.clone(),
            working_dir: self.ctx.working_dir.clone(),
        })
    }
}
