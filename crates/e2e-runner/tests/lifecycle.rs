//! End-to-end lifecycle tests against in-memory collaborators
//!
//! Run with: cargo test -p e2e-runner --test lifecycle

mod test_utils;

use e2e_runner::provision::{DEPLOY_LOG_FILE, PROVISIONING_METRICS_FILE};
use e2e_runner::teardown::{CleanupResult, StepStatus};
use e2e_runner::{RunExit, RunnerError, SignalTrap, setup_account};
use test_utils::{FAKE_CLUSTER, FakeAccount, Harness, ProvisionMode, fast_policy};

#[tokio::test]
async fn fresh_run_provisions_tests_and_tears_down() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();

    let report = orchestrator.run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Success));
    assert_eq!(report.exit.code(), 0);
    assert_eq!(h.provisioner.requests(), vec![None]);
    assert_eq!(h.suites.runs(), 1);

    let target = &h.suites.built()[0];
    assert_eq!(target.cluster_name, FAKE_CLUSTER);
    assert_eq!(
        target.kubeconfig,
        h.ws.output_dir()
            .join(FAKE_CLUSTER)
            .join("kubeconfig")
            .join(format!("kubeconfig.{}.json", h.config.cluster.location))
    );

    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.metrics, StepStatus::Done);
    assert_eq!(teardown.log_dir, StepStatus::Done);
    assert_eq!(teardown.provisioning_metrics, StepStatus::Done);
    assert_eq!(teardown.activity_log, StepStatus::Done);
    assert!(teardown.failures().is_empty());
    assert_eq!(h.account.teardown_deletes(), vec![FAKE_CLUSTER]);
    assert_eq!(h.account.activity_logs(), vec![FAKE_CLUSTER]);
    assert_eq!(h.provisioner.metrics_fetched(), vec![Some(FAKE_CLUSTER.to_string())]);
    assert!(h.log_dir(FAKE_CLUSTER).join(PROVISIONING_METRICS_FILE).is_file());

    let point = orchestrator.context().point();
    assert!(point.provision_secs.is_some());
    assert!(point.test_secs.is_some());
    assert!(point.total_secs.is_some());
}

#[tokio::test]
async fn provisioning_failure_runs_single_teardown() {
    let mut h = Harness::new();
    h.provisioner = h.provisioner.clone().with_mode(ProvisionMode::Fail);
    let orchestrator = h.orchestrator();

    let report = orchestrator.run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Failed(RunnerError::Provisioning(_))));
    assert_eq!(report.exit.code(), 1);
    assert!(h.suites.built().is_empty());
    assert!(report.teardown.is_some());
    assert_eq!(h.account.teardown_deletes(), vec![FAKE_CLUSTER]);

    assert!(orchestrator.teardown().await.is_none());
    assert_eq!(h.account.deleted().len(), 1);
}

#[tokio::test]
async fn provisioning_failure_without_clean_up_if_fail_leaves_resources() {
    let mut h = Harness::new();
    h.config.flags.clean_up_if_fail = false;
    h.provisioner = h.provisioner.clone().with_mode(ProvisionMode::Fail);

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Failed(RunnerError::Provisioning(_))));
    assert!(report.teardown.is_none());
    assert!(h.account.deleted().is_empty());
}

#[tokio::test]
async fn suite_failure_tears_down() {
    let mut h = Harness::new();
    h.suites = h.suites.clone().failing_run();

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Failed(RunnerError::TestSuite(_))));
    assert_eq!(h.suites.runs(), 1);
    assert!(report.teardown.is_some());
    assert_eq!(h.account.teardown_deletes(), vec![FAKE_CLUSTER]);
}

#[tokio::test]
async fn suite_build_failure_never_runs_suite() {
    let mut h = Harness::new();
    h.suites = h.suites.clone().failing_build();

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Failed(RunnerError::SuiteBuild(_))));
    assert_eq!(h.suites.runs(), 0);
    assert!(report.teardown.is_some());
}

#[tokio::test]
async fn skip_test_provisions_without_running_suite() {
    let mut h = Harness::new();
    h.config.flags.skip_test = true;

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Success));
    assert_eq!(h.provisioner.completed(), 1);
    assert!(h.suites.built().is_empty());
    assert!(report.teardown.is_some());
}

fn attach_harness(name: &str) -> Harness {
    let mut h = Harness::new();
    h.config.cluster.name = Some(name.into());
    h.account = FakeAccount::new().with_group(name, Some(1));
    h
}

#[tokio::test]
async fn named_cluster_is_attached_not_provisioned() {
    let h = attach_harness("existing");
    h.ws.write_apimodel("existing");
    let orchestrator = h.orchestrator();

    let report = orchestrator.run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Success));
    assert!(h.provisioner.requests().is_empty());
    assert_eq!(h.suites.built()[0].cluster_name, "existing");
    let engine = orchestrator.context().engine().expect("engine loaded");
    assert_eq!(engine.definition.dns_prefix(), Some("existing"));
    assert_eq!(h.account.teardown_deletes(), vec!["existing"]);

    // No deploy log exists for an attached cluster, so the step is skipped
    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.provisioning_metrics, StepStatus::Skipped);
    assert!(teardown.failures().is_empty());
    assert_eq!(h.provisioner.metrics_fetched(), vec![Some("existing".to_string())]);
}

#[tokio::test]
async fn attached_cluster_reuses_earlier_deploy_log() {
    let h = attach_harness("existing");
    let apimodel = h.ws.write_apimodel("existing");
    std::fs::write(apimodel.with_file_name(DEPLOY_LOG_FILE), "earlier deploy").unwrap();

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Success));
    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.provisioning_metrics, StepStatus::Done);
    let copied = h.log_dir("existing").join(PROVISIONING_METRICS_FILE);
    assert_eq!(std::fs::read_to_string(copied).unwrap(), "earlier deploy");
}

#[tokio::test]
async fn named_cluster_without_output_fails_engine_config() {
    let h = attach_harness("vanished");

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Failed(RunnerError::EngineConfig(_))));
    assert!(h.suites.built().is_empty());
    // Attaching registers the group, so teardown still deletes it
    assert_eq!(h.account.teardown_deletes(), vec!["vanished"]);
}

#[tokio::test]
async fn named_cluster_with_corrupt_apimodel_fails_engine_template() {
    let h = attach_harness("corrupt");
    let path = h.ws.write_apimodel("corrupt");
    std::fs::write(path, "{not json").unwrap();

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert!(matches!(report.exit, RunExit::Failed(RunnerError::EngineTemplate(_))));
}

#[tokio::test]
async fn interrupt_mid_provisioning_deletes_every_tracked_group() {
    let trap = SignalTrap::new();
    let mut h = Harness::new();
    h.provisioner = h
        .provisioner
        .clone()
        .with_mode(ProvisionMode::Hang)
        .with_extra_group("fake-cluster-vnet")
        .triggering(&trap);
    let orchestrator = h.orchestrator();

    let report = orchestrator.run(&trap).await;

    match &report.exit {
        RunExit::Interrupted { signal } => assert_eq!(signal, "SIGTERM"),
        other => panic!("expected interruption, got {other:?}"),
    }
    assert_eq!(report.exit.code(), 1);
    assert_eq!(h.provisioner.completed(), 0);
    assert!(h.suites.built().is_empty());

    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.metrics, StepStatus::Done);
    assert_eq!(teardown.deleted_groups().len(), 2);
    assert_eq!(
        h.account.teardown_deletes(),
        vec![FAKE_CLUSTER, "fake-cluster-vnet"]
    );
    // No cluster was bound, so logs go under the last tracked group
    assert!(h.log_dir("fake-cluster-vnet").is_dir());

    assert!(orchestrator.teardown().await.is_none());
    assert_eq!(h.account.deleted().len(), 2);
}

#[tokio::test]
async fn signal_during_final_teardown_fails_run() {
    let trap = SignalTrap::new();
    let mut h = Harness::new();
    h.provisioner = h.provisioner.clone().interrupting_teardown(&trap);

    let report = h.orchestrator().run(&trap).await;

    match &report.exit {
        RunExit::Interrupted { signal } => assert_eq!(signal, "SIGINT"),
        other => panic!("expected interruption, got {other:?}"),
    }
    assert_eq!(report.exit.code(), 1);
    assert_eq!(h.suites.runs(), 1);

    // Teardown still finishes every step
    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.resource_groups[0].result, CleanupResult::Requested);
    assert_eq!(h.account.teardown_deletes(), vec![FAKE_CLUSTER]);
}

#[tokio::test]
async fn clean_up_on_exit_disabled_skips_deletion() {
    let mut h = Harness::new();
    h.config.flags.clean_up_on_exit = false;

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.resource_groups.len(), 1);
    assert_eq!(teardown.resource_groups[0].result, CleanupResult::Skipped);
    assert!(h.account.deleted().is_empty());
}

#[tokio::test]
async fn already_deleted_group_counts_as_cleaned_up() {
    let mut h = Harness::new();
    h.account = FakeAccount::new().already_gone(FAKE_CLUSTER);

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.resource_groups[0].result, CleanupResult::AlreadyDeleted);
    assert!(teardown.failures().is_empty());
}

#[tokio::test]
async fn skip_logs_collection_skips_log_steps() {
    let mut h = Harness::new();
    h.config.flags.skip_logs_collection = true;

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    let teardown = report.teardown.expect("teardown should run");
    assert_eq!(teardown.provisioning_metrics, StepStatus::Skipped);
    assert_eq!(teardown.activity_log, StepStatus::Skipped);
    assert!(h.account.activity_logs().is_empty());
    assert!(h.provisioner.metrics_fetched().is_empty());
}

#[tokio::test]
async fn ssh_credentials_are_removed_unless_retained() {
    let h = Harness::new();
    let files = h.ws.write_ssh_files(FAKE_CLUSTER);

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert_eq!(report.teardown.unwrap().credentials, StepStatus::Done);
    assert!(files.iter().all(|f| !f.exists()));

    let mut h = Harness::new();
    h.config.flags.retain_ssh = true;
    let files = h.ws.write_ssh_files(FAKE_CLUSTER);

    let report = h.orchestrator().run(&SignalTrap::new()).await;

    assert_eq!(report.teardown.unwrap().credentials, StepStatus::Skipped);
    assert!(files.iter().all(|f| f.exists()));
}

#[tokio::test]
async fn metrics_are_appended_to_file() {
    let mut h = Harness::new();
    let metrics_file = h.ws.path().join("metrics.jsonl");
    h.config.flags.metrics_file = Some(metrics_file.clone());

    h.orchestrator().run(&SignalTrap::new()).await;

    let contents = std::fs::read_to_string(metrics_file).unwrap();
    let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(line["subscription_id"], "sub-test");
    assert!(line["total_secs"].is_number());
}

#[tokio::test]
async fn login_failure_is_a_setup_error() {
    let account = FakeAccount::new().failing_login();

    let err = setup_account(&account, &fast_policy()).await.unwrap_err();

    assert!(matches!(err, RunnerError::AccountSetup(_)));
    assert!(err.is_setup_error());
    assert!(account.state.lock().unwrap().logins >= 1);
    assert!(account.deleted().is_empty());
}

#[tokio::test]
async fn setup_account_returns_subscription() {
    let account = FakeAccount::new();

    let subscription = setup_account(&account, &fast_policy()).await.unwrap();

    assert_eq!(subscription.as_str(), "sub-test");
}
