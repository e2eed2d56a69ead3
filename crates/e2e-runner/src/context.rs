//! Shared state of a single run
//!
//! [`RunContext`] is owned by the orchestrator and borrowed by teardown. The
//! configuration is immutable; the bound cluster name, the resolved engine and
//! the metrics point change as the run progresses.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::azure::SubscriptionId;
use crate::config::RunConfig;
use crate::defaults::{LOGS_DIR, OUTPUT_DIR};
use crate::engine::ClusterEngine;
use crate::metrics::Point;
use crate::retry::RetryPolicy;
use crate::tracker::ResourceTracker;

/// Mutable part of a run
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Cluster the run is bound to; `None` means one must be provisioned
    pub cluster_name: Option<String>,
    pub engine: Option<ClusterEngine>,
}

#[derive(Debug)]
pub struct RunContext {
    pub config: RunConfig,
    pub working_dir: PathBuf,
    pub tracker: ResourceTracker,
    pub policy: RetryPolicy,
    subscription_id: SubscriptionId,
    state: Mutex<RunState>,
    point: Mutex<Point>,
}

impl RunContext {
    pub fn new(config: RunConfig, working_dir: impl Into<PathBuf>, subscription_id: SubscriptionId) -> Self {
        let point = Point::new(
            &config.cluster.orchestrator,
            &config.cluster.location,
            &config.cluster.cluster_definition,
            &subscription_id,
        );
        let state = RunState {
            cluster_name: config.initial_cluster_name(),
            engine: None,
        };
        Self {
            policy: config.retry_policy(),
            config,
            working_dir: working_dir.into(),
            tracker: ResourceTracker::new(),
            subscription_id,
            state: Mutex::new(state),
            point: Mutex::new(point),
        }
    }

    /// Override the retry policy used for cloud calls
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cluster_name(&self) -> Option<String> {
        self.state().cluster_name.clone()
    }

    pub fn set_cluster_name(&self, name: Option<String>) {
        self.state().cluster_name = name;
    }

    pub fn engine(&self) -> Option<ClusterEngine> {
        self.state().engine.clone()
    }

    pub fn set_engine(&self, engine: ClusterEngine) {
        self.state().engine = Some(engine);
    }

    /// Snapshot of the mutable state
    pub fn snapshot(&self) -> RunState {
        self.state().clone()
    }

    pub fn point(&self) -> Point {
        self.point.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_point(&self, f: impl FnOnce(&mut Point)) {
        f(&mut self.point.lock().unwrap_or_else(|e| e.into_inner()));
    }

    pub fn output_dir(&self) -> PathBuf {
        self.working_dir.join(OUTPUT_DIR)
    }

    /// `<cwd>/_logs/<cluster>.<location>.<dns-suffix>`
    ///
    /// Falls back to the most recently tracked group when no cluster is bound.
    pub fn log_dir(&self) -> PathBuf {
        let name = self
            .cluster_name()
            .or_else(|| self.tracker.groups().last().map(|g| g.to_string()))
            .unwrap_or_default();
        log_dir(
            &self.working_dir,
            &name,
            &self.config.cluster.location,
            &self.config.cluster.dns_suffix,
        )
    }
}

fn log_dir(working_dir: &Path, name: &str, location: &str, dns_suffix: &str) -> PathBuf {
    working_dir
        .join(LOGS_DIR)
        .join(format!("{name}.{location}.{dns_suffix}"))
}
