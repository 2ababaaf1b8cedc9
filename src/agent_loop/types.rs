//! Core run types for the agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique run identifier.
pub type RunId = Uuid;

/// Fallback text for a response with neither text nor tool calls.
pub const NO_RESPONSE_MESSAGE: &str = "No response from model.";

/// Text given to an assistant message that was cancelled before any text arrived.
pub const STOPPED_MESSAGE: &str = "Stopped.";

/// Tool result for a destructive call the user declined.
pub const DENIED_MESSAGE: &str = "User denied this operation.";

/// Status message written when the iteration bound is reached.
pub const MAX_ITERATIONS_MESSAGE: &str =
    "Reached the tool iteration limit. Send another message to continue.";

/// Loop state machine position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Requesting,
    Streaming,
    Deciding,
    AwaitingConfirmation,
    ExecutingTools,
    Done,
    Cancelled,
    Failed,
    MaxIterationsReached,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopState::Done
                | LoopState::Cancelled
                | LoopState::Failed
                | LoopState::MaxIterationsReached
        )
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Cancelled,
    Failed,
    MaxIterationsReached,
}

impl From<RunStatus> for LoopState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Done => LoopState::Done,
            RunStatus::Cancelled => LoopState::Cancelled,
            RunStatus::Failed => LoopState::Failed,
            RunStatus::MaxIterationsReached => LoopState::MaxIterationsReached,
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub status: RunStatus,
    /// Provider requests made during the run.
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn new(status: RunStatus, iterations: usize) -> Self {
        Self {
            status,
            iterations,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn done(iterations: usize) -> Self {
        Self::new(RunStatus::Done, iterations)
    }

    pub fn cancelled(iterations: usize) -> Self {
        Self::new(RunStatus::Cancelled, iterations)
    }

    pub fn failed(iterations: usize, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RunStatus::Failed, iterations)
        }
    }
}
