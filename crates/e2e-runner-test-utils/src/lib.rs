//! Shared test utilities for e2e-runner
//!
//! ## Modules
//!
//! - [`azure`]: test location detection
//! - [`workspace`]: temporary working directories laid out like a real run

pub mod azure;
pub mod workspace;

pub use azure::get_test_location;
pub use workspace::{TestWorkspace, sample_apimodel};
