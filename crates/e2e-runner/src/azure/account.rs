//! Account identity and resource-group metadata

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::tracker::ResourceGroupName;

/// Strongly-typed Azure subscription id
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Subset of `az account show` output
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tenant_id: String,
}

/// A resource group as seen by the account collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGroup {
    pub name: ResourceGroupName,
    pub location: String,
    /// Timestamp of the most recent deployment into the group, if any
    pub last_deployed_at: Option<DateTime<Utc>>,
}

impl ResourceGroup {
    /// Time elapsed since the last deployment, or `None` if never deployed
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_deployed_at.map(|t| now - t)
    }

    /// True once the last deployment is older than `threshold`.
    ///
    /// A group that was never deployed into counts as expired.
    pub fn is_expired(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.age(now).is_none_or(|age| age > threshold)
    }
}
