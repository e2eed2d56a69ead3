//! e2e-runner: provision or reuse a test cluster, run the suite, tear down

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use e2e_runner::azure::{AzCli, AzStorage};
use e2e_runner::config::{self, RunConfig};
use e2e_runner::defaults::{
    DEFAULT_CLUSTER_DEFINITION, DEFAULT_DEPLOY_COMMAND, DEFAULT_DNS_SUFFIX, DEFAULT_NAME_PREFIX,
    DEFAULT_ORCHESTRATOR, DEFAULT_SUITE_COMMAND, DEFAULT_SUITE_DIR, DEFAULT_TIMEOUT_SECS,
};
use e2e_runner::provision::CliProvisioner;
use e2e_runner::suite::CommandSuiteFactory;
use e2e_runner::{Orchestrator, RunContext, RunExit, SignalTrap, setup_account};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "e2e-runner")]
#[command(about = "Provision or reuse a test cluster, run the e2e suite, and clean up")]
#[command(version)]
struct Args {
    /// Existing cluster to run against (provisions a new one if unset)
    #[arg(long, env = "NAME")]
    name: Option<String>,

    /// Azure location
    #[arg(long, env = "LOCATION")]
    location: String,

    /// Orchestrator type
    #[arg(long, env = "ORCHESTRATOR", default_value = DEFAULT_ORCHESTRATOR)]
    orchestrator: String,

    /// Cluster definition template, relative to the working directory
    #[arg(long, env = "CLUSTER_DEFINITION", default_value = DEFAULT_CLUSTER_DEFINITION)]
    cluster_definition: String,

    /// Long-lived cluster to reuse until it expires
    #[arg(long, env = "SOAK_CLUSTER_NAME")]
    soak_cluster_name: Option<String>,

    /// DNS suffix of cluster endpoints
    #[arg(long, env = "DNS_SUFFIX", default_value = DEFAULT_DNS_SUFFIX)]
    dns_suffix: String,

    /// Recreate the soak cluster even if it has not expired
    #[arg(long, env = "FORCE_DEPLOY")]
    force_deploy: bool,

    /// Delete tracked resource groups on exit
    #[arg(long, env = "CLEANUP_ON_EXIT", default_value_t = true, action = ArgAction::Set)]
    clean_up_on_exit: bool,

    /// Run teardown when provisioning or tests fail
    #[arg(long, env = "CLEANUP_IF_FAIL", default_value_t = true, action = ArgAction::Set)]
    clean_up_if_fail: bool,

    #[arg(long, env = "SKIP_TEST")]
    skip_test: bool,

    #[arg(long, env = "SKIP_LOGS_COLLECTION")]
    skip_logs_collection: bool,

    /// Keep SSH credentials in the output directory
    #[arg(long, env = "RETAIN_SSH")]
    retain_ssh: bool,

    /// Deadline for retried cloud calls and the test suite, in seconds
    #[arg(long, env = "TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Append run metrics to this file as JSON lines
    #[arg(long, env = "METRICS_FILE")]
    metrics_file: Option<PathBuf>,

    #[arg(long, env = "SUBSCRIPTION_ID")]
    subscription_id: Option<String>,

    #[arg(long, env = "TENANT_ID")]
    tenant_id: Option<String>,

    /// Service principal application id
    #[arg(long, env = "CLIENT_ID")]
    client_id: Option<String>,

    /// Service principal secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Provisioning tool
    #[arg(long, env = "DEPLOY_COMMAND", default_value = DEFAULT_DEPLOY_COMMAND)]
    deploy_command: String,

    /// Prefix for generated cluster names
    #[arg(long, env = "NAME_PREFIX", default_value = DEFAULT_NAME_PREFIX)]
    name_prefix: String,

    /// Test suite binary
    #[arg(long, env = "SUITE_COMMAND", default_value = DEFAULT_SUITE_COMMAND)]
    suite_command: String,

    /// Extra arguments passed to the test suite
    #[arg(long = "suite-arg", env = "SUITE_ARGS", value_delimiter = ' ')]
    suite_args: Vec<String>,

    /// Test suite directory, relative to the working directory
    #[arg(long, env = "SUITE_DIR", default_value = DEFAULT_SUITE_DIR)]
    suite_dir: PathBuf,
}

/// Treat empty environment values as unset
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<Args> for RunConfig {
    fn from(args: Args) -> Self {
        Self {
            cluster: config::ClusterConfig {
                name: non_empty(args.name),
                location: args.location,
                orchestrator: args.orchestrator,
                cluster_definition: args.cluster_definition,
                soak_cluster_name: non_empty(args.soak_cluster_name),
                dns_suffix: args.dns_suffix,
            },
            azure: config::AzureConfig {
                subscription_id: non_empty(args.subscription_id),
                tenant_id: non_empty(args.tenant_id),
                client_id: non_empty(args.client_id),
                client_secret: non_empty(args.client_secret),
            },
            provision: config::ProvisionConfig {
                deploy_command: args.deploy_command,
                name_prefix: args.name_prefix,
            },
            suite: config::SuiteConfig {
                command: args.suite_command,
                args: args.suite_args.into_iter().filter(|a| !a.is_empty()).collect(),
                dir: args.suite_dir,
            },
            flags: config::RuntimeFlags {
                force_deploy: args.force_deploy,
                clean_up_on_exit: args.clean_up_on_exit,
                clean_up_if_fail: args.clean_up_if_fail,
                skip_test: args.skip_test,
                skip_logs_collection: args.skip_logs_collection,
                retain_ssh: args.retain_ssh,
                timeout: args.timeout,
                metrics_file: args.metrics_file,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<i32> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config: RunConfig = args.into();
    config.validate().context("Invalid configuration")?;
    let working_dir = std::env::current_dir().context("Failed to read working directory")?;

    info!(
        location = %config.cluster.location,
        orchestrator = %config.cluster.orchestrator,
        cluster = ?config.cluster.name,
        soak_cluster = ?config.cluster.soak_cluster_name,
        timeout_secs = config.flags.timeout,
        "Starting e2e run"
    );

    let cli = AzCli::new(&config.azure);
    let subscription = setup_account(&cli, &config.retry_policy()).await?;

    let ctx = RunContext::new(config.clone(), &working_dir, subscription);
    let (trap, _listener) = SignalTrap::arm().context("Failed to install signal handlers")?;

    let orchestrator = Orchestrator::new(
        ctx,
        cli.clone(),
        AzStorage::new(cli),
        CliProvisioner::new(config.clone(), &working_dir),
        CommandSuiteFactory::new(config.suite.clone(), config.timeout()),
    );
    let report = tokio::select! {
        report = orchestrator.run(&trap) => report,
        () = trap.forced() => {
            warn!(
                tracked_groups = ?orchestrator.context().tracker.groups(),
                "Forced exit, resource groups may be left behind"
            );
            return Ok(1);
        }
    };

    let code = report.exit.code();
    match report.exit {
        RunExit::Success => info!("Run succeeded"),
        RunExit::Interrupted { signal } => info!(signal = %signal, "Run interrupted"),
        RunExit::Failed(e) => print_error(&e.into()),
    }
    Ok(code)
}
