//! Pipeline definition domain types
//!
//! A PipelineDefinition is the executable specification for one run. As
//! stored in a repository it may contain task references (local, bundled,
//! or remote); the resolver replaces every reference with an inline task
//! body before the definition is admitted to execution.

use serde::{Deserialize, Serialize};

use crate::domain::event::EventType;

/// A single container step inside a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub script: String,
}

/// Where a task body comes from
///
/// Tagged union over the three reference kinds. A fully-resolved
/// definition contains no references at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskReference {
    /// Another task file in the same config directory
    Local { name: String },
    /// A content-addressed package; `name` selects a task inside it
    Bundle { bundle: String, name: String },
    /// A YAML document fetched by URL
    Remote { url: String },
}

impl TaskReference {
    /// Stable display key, used for cycle detection and diagnostics
    pub fn key(&self) -> String {
        match self {
            TaskReference::Local { name } => format!("local:{}", name),
            TaskReference::Bundle { bundle, name } => format!("bundle:{}#{}", bundle, name),
            TaskReference::Remote { url } => format!("remote:{}", url),
        }
    }
}

impl std::fmt::Display for TaskReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// One task in the pipeline graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    /// Present while unresolved; `None` once the body is inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<TaskReference>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Task names this task runs after
    #[serde(default)]
    pub run_after: Vec<String>,
}

impl Task {
    pub fn is_resolved(&self) -> bool {
        self.reference.is_none() && !self.steps.is_empty()
    }
}

/// Trigger annotations on a stored definition
///
/// A definition is selected for an event when the event kind appears in
/// `on_event` and the target branch matches one of `on_target_branch`
/// (exact, or a single `*` prefix/suffix glob). An empty branch list
/// matches every branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub on_event: Vec<EventType>,
    #[serde(default)]
    pub on_target_branch: Vec<String>,
}

impl Trigger {
    pub fn matches(&self, event_type: EventType, target_branch: &str) -> bool {
        if !self.on_event.contains(&event_type) {
            return false;
        }
        // An absent branch list means the definition runs on any branch
        if self.on_target_branch.is_empty() {
            return true;
        }
        self.on_target_branch
            .iter()
            .any(|pattern| branch_matches(pattern, target_branch))
    }
}

/// Branch pattern match: exact, bare `*`, `*suffix`, or `prefix*`
fn branch_matches(pattern: &str, branch: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return branch.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return branch.starts_with(prefix);
    }
    pattern == branch
}

/// A named parameter passed into the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

/// Executable pipeline specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl PipelineDefinition {
    /// True once every task carries an inline body and no references remain
    pub fn is_fully_resolved(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(Task::is_resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_matching() {
        assert!(branch_matches("main", "main"));
        assert!(!branch_matches("main", "maintenance"));
        assert!(branch_matches("*", "anything"));
        assert!(branch_matches("release-*", "release-1.2"));
        assert!(branch_matches("*-stable", "v2-stable"));
        assert!(!branch_matches("release-*", "hotfix-1"));
    }

    #[test]
    fn test_trigger_requires_event_and_branch() {
        let trigger = Trigger {
            on_event: vec![EventType::Push],
            on_target_branch: vec!["main".to_string()],
        };
        assert!(trigger.matches(EventType::Push, "main"));
        assert!(!trigger.matches(EventType::Push, "dev"));
        assert!(!trigger.matches(EventType::PullRequestOpened, "main"));
    }

    #[test]
    fn test_empty_branch_list_matches_any_branch() {
        let trigger = Trigger {
            on_event: vec![EventType::Push],
            on_target_branch: vec![],
        };
        assert!(trigger.matches(EventType::Push, "main"));
        assert!(trigger.matches(EventType::Push, "anything"));
        assert!(!trigger.matches(EventType::Comment, "main"));
    }

    #[test]
    fn test_resolution_state() {
        let mut def = PipelineDefinition {
            name: "build".to_string(),
            trigger: Trigger::default(),
            params: vec![],
            tasks: vec![Task {
                name: "compile".to_string(),
                reference: Some(TaskReference::Local {
                    name: "compile".to_string(),
                }),
                steps: vec![],
                run_after: vec![],
            }],
        };
        assert!(!def.is_fully_resolved());

        def.tasks[0].reference = None;
        def.tasks[0].steps.push(Step {
            name: "cc".to_string(),
            image: "gcc:14".to_string(),
            script: "make".to_string(),
        });
        assert!(def.is_fully_resolved());
    }

    #[test]
    fn test_reference_keys_are_distinct() {
        let local = TaskReference::Local {
            name: "lint".to_string(),
        };
        let remote = TaskReference::Remote {
            url: "https://example.com/lint.yaml".to_string(),
        };
        assert_ne!(local.key(), remote.key());
        assert!(local.key().starts_with("local:"));
    }
}
