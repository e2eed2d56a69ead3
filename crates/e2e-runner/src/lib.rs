//! e2e-runner - test-cluster lifecycle orchestrator
//!
//! Provisions a cluster (or reuses a long-lived soak cluster), runs a
//! validation suite against it, and tears down every tracked resource group
//! on every exit path, including SIGINT and SIGTERM.

pub mod azure;
pub mod command;
pub mod config;
pub mod context;
pub mod credentials;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod provision;
pub mod retry;
pub mod signal;
pub mod soak;
pub mod suite;
pub mod teardown;
pub mod tracker;

pub use context::RunContext;
pub use error::{ConfigError, RunnerError};
pub use orchestrator::{Orchestrator, RunExit, RunReport, setup_account};
pub use signal::SignalTrap;
pub use tracker::{ResourceGroupName, ResourceTracker};
