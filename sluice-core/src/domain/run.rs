//! Run domain types
//!
//! A Run is one in-flight or completed execution of a pipeline
//! definition, tagged with the triggering event's SHA and branch so
//! later status updates can be correlated back to the provider.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::Event;

/// Condition reason the execution substrate records for cancelled runs
pub const CANCELLED_REASON: &str = "Cancelled";

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }
}

/// Raw condition observed on a run inside the cluster
///
/// The status reporter maps this onto the outward-facing [`Status`]
/// enumeration; nothing else interprets it.
///
/// [`Status`]: crate::domain::status::Status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCondition {
    pub reason: String,
    /// `Some(false)` marks a failed condition, `Some(true)` a passed one
    pub succeeded: Option<bool>,
}

impl RunCondition {
    /// Whether this condition ends the run: an explicit verdict, or a
    /// cancellation regardless of verdict.
    pub fn is_terminal(&self) -> bool {
        self.succeeded.is_some() || self.reason == CANCELLED_REASON
    }
}

/// One execution instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Generated, unique within the namespace
    pub name: String,
    pub repository: String,
    pub namespace: String,
    pub pipeline: String,
    pub sha: String,
    pub source_branch: String,
    pub target_branch: String,
    pub pull_request_number: Option<u64>,
    pub state: RunState,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Run {
    /// Creates a queued run for an event against a matched repository.
    ///
    /// The generated name ties the run to the pipeline and commit, with a
    /// random suffix so re-deliveries of the same SHA stay distinct.
    pub fn new(pipeline: &str, repository: &str, namespace: &str, event: &Event) -> Self {
        let short_sha: String = event.sha.chars().take(7).collect();
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
        Self {
            name: format!("{}-{}-{}", pipeline, short_sha, suffix),
            repository: repository.to_string(),
            namespace: namespace.to_string(),
            pipeline: pipeline.to_string(),
            sha: event.sha.clone(),
            source_branch: event.source_branch.clone(),
            target_branch: event.target_branch.clone(),
            pull_request_number: event.pull_request_number,
            state: RunState::Queued,
            created_at: chrono::Utc::now(),
        }
    }

    /// Supersession identity, mirroring [`Event::concurrency_key`]
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
    use crate::domain::event::EventType;

    fn push_event(sha: &str, branch: &str) -> Event {
        let mut event = Event::new(EventType::Push);
        event.sha = sha.to_string();
        event.target_branch = branch.to_string();
        event
    }

    #[test]
    fn test_run_name_embeds_pipeline_and_short_sha() {
        let run = Run::new("build", "ci/website", "ci", &push_event("abc123def456", "main"));
        assert!(run.name.starts_with("build-abc123d-"));
        assert_eq!(run.state, RunState::Queued);
    }

    #[test]
    fn test_run_names_are_unique_per_delivery() {
        let event = push_event("abc123def456", "main");
        let a = Run::new("build", "ci/website", "ci", &event);
        let b = Run::new("build", "ci/website", "ci", &event);
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_run_keeps_event_concurrency_key() {
        let mut event = push_event("abc123", "main");
        event.pull_request_number = Some(7);
        let run = Run::new("build", "ci/website", "ci", &event);
        assert_eq!(run.concurrency_key(), event.concurrency_key());
    }

    #[test]
    fn test_condition_terminality() {
        let running = RunCondition {
            reason: "Running".to_string(),
            succeeded: None,
        };
        assert!(!running.is_terminal());

        let cancelled = RunCondition {
            reason: CANCELLED_REASON.to_string(),
            succeeded: None,
        };
        assert!(cancelled.is_terminal());

        let failed = RunCondition {
            reason: "TaskFailed".to_string(),
            succeeded: Some(false),
        };
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Queued.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
    }
}
