//! Validation test suite execution

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::command::{CommandConfig, CommandSpec, run_command_streaming};
use crate::config::SuiteConfig;
use crate::metrics::Point;

/// The cluster a suite runs against
#[derive(Debug, Clone)]
pub struct SuiteTarget {
    pub cluster_name: String,
    pub location: String,
    pub orchestrator: String,
    pub working_dir: PathBuf,
    pub kubeconfig: PathBuf,
}

#[allow(async_fn_in_trait)]
pub trait TestSuite {
    async fn run(&self) -> Result<()>;
}

/// Builds a [`TestSuite`] for a resolved cluster
pub trait SuiteFactory {
    type Suite: TestSuite;

    fn build(&self, target: &SuiteTarget, point: &Point) -> Result<Self::Suite>;
}

/// Runs the suite as an external command, `ginkgo` by default
#[derive(Debug, Clone)]
pub struct CommandSuiteFactory {
    config: SuiteConfig,
    timeout: Duration,
}

impl CommandSuiteFactory {
    pub fn new(config: SuiteConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

impl SuiteFactory for CommandSuiteFactory {
    type Suite = CommandSuite;

    fn build(&self, target: &SuiteTarget, point: &Point) -> Result<CommandSuite> {
        let dir = target.working_dir.join(&self.config.dir);
        if !dir.is_dir() {
            bail!("Test suite directory {} does not exist", dir.display());
        }

        let spec = CommandSpec::new(&self.config.command)
            .args(self.config.args.iter().cloned())
            .current_dir(dir)
            .env("KUBECONFIG", target.kubeconfig.to_string_lossy())
            .env("NAME", &target.cluster_name)
            .env("LOCATION", &target.location)
            .env("ORCHESTRATOR", &target.orchestrator)
            .env("RUN_ID", point.run_id.to_string());

        Ok(CommandSuite {
            spec,
            config: CommandConfig::with_timeout(self.timeout),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandSuite {
    spec: CommandSpec,
    config: CommandConfig,
}

impl TestSuite for CommandSuite {
    async fn run(&self) -> Result<()> {
        let start = Instant::now();
        let output = run_command_streaming("tests", &self.spec, &self.config).await?;
        info!(
            success = output.success,
            elapsed_secs = start.elapsed().as_secs(),
            "Test suite finished"
        );
        if !output.success {
            bail!("{} exited with a failure status", self.spec.program);
        }
        Ok(())
    }
}
