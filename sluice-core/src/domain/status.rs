//! Outward-facing run status
//!
//! The closed enumeration providers understand, and the total mapping
//! from raw run conditions onto it.

use serde::{Deserialize, Serialize};

use crate::domain::run::{CANCELLED_REASON, RunCondition};

/// Provider-visible outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No condition recorded yet
    Neutral,
    /// Explicit cancellation, including supersession
    Cancelled,
    Failure,
    Success,
}

impl Status {
    /// Maps a run's recorded condition onto a status.
    ///
    /// Total and deterministic: every observed condition lands on exactly
    /// one variant, and the mapping has no hidden state.
    pub fn from_condition(condition: Option<&RunCondition>) -> Status {
        let Some(condition) = condition else {
            return Status::Neutral;
        };
        if condition.reason == CANCELLED_REASON {
            return Status::Cancelled;
        }
        if condition.succeeded == Some(false) {
            return Status::Failure;
        }
        Status::Success
    }

    /// Human-readable description published alongside the status
    pub fn description(&self) -> &'static str {
        match self {
            Status::Neutral => "CI run is pending",
            Status::Cancelled => "CI run was cancelled",
            Status::Failure => "CI run has failed",
            Status::Success => "CI run has succeeded",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Neutral => "neutral",
            Status::Cancelled => "cancelled",
            Status::Failure => "failure",
            Status::Success => "success",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
