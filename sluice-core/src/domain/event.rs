//! Event domain types
//!
//! An Event is the normalized representation of one inbound VCS trigger.
//! It is constructed once per delivery, enriched by the provider layer,
//! and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of inbound trigger
///
/// A closed tag: provider payloads map onto one of these or the delivery
/// is rejected. `Incoming` is the manual trigger kind and carries no
/// parseable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequestOpened,
    PullRequestUpdated,
    Comment,
    Incoming,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Push => "push",
            EventType::PullRequestOpened => "pull_request_opened",
            EventType::PullRequestUpdated => "pull_request_updated",
            EventType::Comment => "comment",
            EventType::Incoming => "incoming",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verbatim record of the inbound request
///
/// Retained on the Event for replay/debugging and for provider calls that
/// need the original payload. The payload copy is whitespace-trimmed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestRecord {
    pub headers: HashMap<String, String>,
    pub payload: String,
}

impl RequestRecord {
    pub fn new(headers: HashMap<String, String>, payload: &str) -> Self {
        Self {
            headers,
            payload: payload.trim().to_string(),
        }
    }
}

/// Normalized inbound trigger
///
/// Populated by the provider layer (or synthesized for `Incoming` events)
/// and carried through matching, resolution, and admission unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    /// Commit SHA the trigger points at
    pub sha: String,
    /// Clone/browse URL of the source repository
    pub url: String,
    /// Source (head) branch; empty for non-PR pushes on some providers
    pub source_branch: String,
    /// Target (base) branch
    pub target_branch: String,
    /// Pull/merge request number, when the trigger is PR-scoped
    pub pull_request_number: Option<u64>,
    /// Comment text for comment-triggered events
    pub trigger_comment: Option<String>,
    /// Base URL of the provider API for this event
    pub provider_url: String,
    /// Enterprise host override for self-hosted instances
    pub enterprise_url: Option<String>,
    /// Original request, retained verbatim (trimmed payload)
    pub request: Option<RequestRecord>,
}

impl Event {
    /// Creates a bare event of the given type; the provider layer fills in
    /// the rest during enrichment.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            sha: String::new(),
            url: String::new(),
            source_branch: String::new(),
            target_branch: String::new(),
            pull_request_number: None,
            trigger_comment: None,
            provider_url: String::new(),
            enterprise_url: None,
            request: None,
        }
    }

    /// Identity used for supersession: two events with the same key target
    /// the same line of work, so the newer one cancels the older one's run.
    ///
    /// PR-scoped events key on the PR number; pushes key on the branch.
    pub fn concurrency_key(&self) -> String {
        match self.pull_request_number {
            Some(nr) => format!("pr-{}", nr),
            None => format!("branch-{}", self.target_branch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_key_prefers_pull_request_number() {
        let mut event = Event::new(EventType::PullRequestUpdated);
        event.target_branch = "main".to_string();
        event.pull_request_number = Some(42);
        assert_eq!(event.concurrency_key(), "pr-42");
    }

    #[test]
    fn test_concurrency_key_falls_back_to_branch() {
        let mut event = Event::new(EventType::Push);
        event.target_branch = "main".to_string();
        assert_eq!(event.concurrency_key(), "branch-main");
    }

    #[test]
    fn test_request_record_trims_payload() {
        let record = RequestRecord::new(HashMap::new(), "  {\"x\":1}\n");
        assert_eq!(record.payload, "{\"x\":1}");
    }

    #[test]
    fn test_event_type_round_trip() {
        let json = serde_json::to_string(&EventType::PullRequestOpened).unwrap();
        assert_eq!(json, "\"pull_request_opened\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::PullRequestOpened);
    }
}
