use taskpilot_core::{OperationKind, WorkItemId, WorkItemStatus};

use super::repository::RepositoryError;
use super::transition::TransitionError;
use crate::agent::AgentError;
use crate::project::AdapterError;

/// Errors returned by [`WorkflowService`](super::service::WorkflowService).
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("work item {0} not found")]
    NotFound(WorkItemId),

    #[error("operation {operation} is not allowed while the item is in {status}")]
    InvalidTransition {
        operation: OperationKind,
        status: WorkItemStatus,
    },

    #[error("missing {what}")]
    MissingArtifact { what: String },

    #[error("work item {0} was modified concurrently; reload and retry")]
    ConflictingUpdate(WorkItemId),

    #[error("external sync failed: {0}")]
    ExternalSyncFailed(#[source] AdapterError),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("agent output could not be parsed: {0}")]
    UnparsableOutput(String),

    #[error("invalid clarification token")]
    InvalidToken,

    #[error("clarification token has expired")]
    ExpiredToken,

    #[error("history of {item_id} does not replay to its current status: {detail}")]
    HistoryMismatch { item_id: WorkItemId, detail: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<TransitionError> for WorkflowError {
    fn from(error: TransitionError) -> Self {
        match error {
            TransitionError::InvalidTransition { operation, status } => {
                WorkflowError::InvalidTransition { operation, status }
            }
            TransitionError::MissingArtifact { what } => WorkflowError::MissingArtifact { what },
        }
    }
}

impl From<AgentError> for WorkflowError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::LlmUnavailable(reason) => WorkflowError::LlmUnavailable(reason),
            AgentError::UnparsableOutput(reason) => WorkflowError::UnparsableOutput(reason),
        }
    }
}
