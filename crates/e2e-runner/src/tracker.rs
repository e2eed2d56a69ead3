//! Thread-safe record of resource groups created during a run
//!
//! The tracker is the only record teardown consults to decide what to delete.
//! Provisioning code must call [`ResourceTracker::register`] before issuing
//! the create call for a group, so a failure halfway through creation still
//! leaves the group in scope for cleanup.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Name of a cloud resource group
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct ResourceGroupName(String);

impl ResourceGroupName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceGroupName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ResourceGroupName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Append-only, ordered set of resource groups that teardown must delete.
///
/// Cloning is cheap and every clone shares the same underlying set.
#[derive(Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Mutex<Vec<ResourceGroupName>>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResourceGroupName>> {
        // Pushes are the only mutation, so a poisoned set is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bring a resource group into scope for teardown.
    ///
    /// Returns `false` if the group was already tracked.
    pub fn register(&self, name: impl Into<ResourceGroupName>) -> bool {
        let name = name.into();
        let mut groups = self.lock();
        if groups.contains(&name) {
            debug!(group = %name, "Resource group already tracked");
            return false;
        }
        debug!(group = %name, "Tracking resource group");
        groups.push(name);
        true
    }

    /// Snapshot of tracked group names in registration order
    pub fn groups(&self) -> Vec<ResourceGroupName> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("groups", &self.groups())
            .finish()
    }
}
