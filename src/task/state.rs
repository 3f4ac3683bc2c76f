//! Job state machine.

use serde::{Deserialize, Serialize};

/// State of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Never successfully assigned; the task is about to be discarded.
    None,
    /// Waiting for a worker.
    Init,
    /// Submitted to a worker and running there.
    InProgress,
    /// Needs its remote job cancelled before it can be reassigned.
    Retry,
    /// Completed with a result.
    Finished,
    /// Completed without a result.
    Failed,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        if target == None {
            return true;
        }

        matches!(
            (self, target),
            // From Init
            (Init, InProgress) | (Init, Retry) | (Init, Finished) |
            // From InProgress
            (InProgress, Retry) | (InProgress, Finished) | (InProgress, Failed) |
            // From Retry (only after the remote job is gone)
            (Retry, Init)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Catalog representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Init => "init",
            Self::InProgress => "in_progress",
            Self::Retry => "retry",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Parse the catalog representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "init" => Some(Self::Init),
            "in_progress" => Some(Self::InProgress),
            "retry" => Some(Self::Retry),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => Option::None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
