//! Repository domain types
//!
//! A Repository is the cluster-registered binding of a source-control URL
//! to execution policy and credentials. It is owned externally (created by
//! operators or GitOps); the orchestrator only reads it.

use serde::{Deserialize, Serialize};

use crate::domain::event::EventType;

/// Reference to secret material held by the cluster substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

/// Policy flags attached to a registered repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Event kinds this repository accepts. Empty means all kinds.
    #[serde(default)]
    pub accepted_events: Vec<EventType>,
}

impl RepositorySettings {
    /// Whether the repository accepts triggers of the given kind
    pub fn accepts(&self, event_type: EventType) -> bool {
        self.accepted_events.is_empty() || self.accepted_events.contains(&event_type)
    }
}

/// Cluster-registered repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub namespace: String,
    /// Source-control URL this repository is registered for
    pub url: String,
    /// Upper bound on concurrently active runs; `None` means 1
    pub concurrency_limit: Option<usize>,
    /// Provider credentials, read through the cluster capability
    pub secret_ref: Option<SecretRef>,
    #[serde(default)]
    pub settings: RepositorySettings,
}

impl Repository {
    /// Effective concurrency bound for this repository
    pub fn effective_limit(&self) -> usize {
        self.concurrency_limit.unwrap_or(1).max(1)
    }

    /// Stable identity used as the controller's state key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
