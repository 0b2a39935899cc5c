//! Persistence for work items and everything recorded about them.
//!
//! The `WorkflowRepository` trait is the only way the service touches
//! storage. Every workflow mutation goes through [`WorkflowRepository::commit`],
//! which compares the stored item's `version` with the version the caller
//! loaded and writes the item, its transition record, an artifact and a
//! clarification change in one atomic step.

mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use taskpilot_core::{
    Artifact, Clarification, ClarificationId, StatusTransition, WorkItem, WorkItemId,
    WorkItemStatus,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {what} in storage")]
    Corruption { what: String },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("work item {0} already exists")]
    Duplicate(WorkItemId),
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

/// Change to a clarification made alongside an item update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarificationWrite {
    /// Store a newly issued clarification.
    Insert(Clarification),
    /// Replace a clarification that must still be pending.
    Resolve(Clarification),
}

/// One atomic workflow write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCommit {
    /// Version the caller loaded; the write only happens if it is still current.
    pub expected_version: u64,
    /// The updated item, with `version == expected_version + 1`.
    pub item: WorkItem,
    pub transition: Option<StatusTransition>,
    /// Must have `stage` equal to the stored item's status.
    pub artifact: Option<Artifact>,
    pub clarification: Option<ClarificationWrite>,
}

impl ItemCommit {
    pub fn new(expected_version: u64, item: WorkItem) -> Self {
        Self {
            expected_version,
            item,
            transition: None,
            artifact: None,
            clarification: None,
        }
    }

    pub fn with_transition(mut self, transition: Option<StatusTransition>) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_clarification(mut self, write: ClarificationWrite) -> Self {
        self.clarification = Some(write);
        self
    }

    /// Checks that do not need the stored state.
    pub(crate) fn validate(&self) -> Result<(), RepositoryError> {
        if self.item.version != self.expected_version + 1 {
            return Err(RepositoryError::Invariant(format!(
                "commit for {} must bump version {} by one, got {}",
                self.item.id, self.expected_version, self.item.version
            )));
        }
        if let Some(transition) = &self.transition {
            if transition.item_id != self.item.id || transition.to != self.item.status {
                return Err(RepositoryError::Invariant(format!(
                    "transition {} does not end in the committed status of {}",
                    transition.id, self.item.id
                )));
            }
        }
        if let Some(artifact) = &self.artifact {
            if artifact.item_id != self.item.id {
                return Err(RepositoryError::Invariant(format!(
                    "artifact {} belongs to another item",
                    artifact.id
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of a compare-and-swap commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The stored version (or clarification state) no longer matches.
    Conflict,
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Store a brand-new item.
    async fn insert_item(&self, item: &WorkItem) -> Result<(), RepositoryError>;

    async fn get_item(&self, id: &WorkItemId) -> Result<Option<WorkItem>, RepositoryError>;

    /// All items, oldest first.
    async fn list_items(&self) -> Result<Vec<WorkItem>, RepositoryError>;

    /// Atomically apply a workflow write if the item is still at
    /// `expected_version`.
    async fn commit(&self, commit: ItemCommit) -> Result<CommitOutcome, RepositoryError>;

    /// Record that the board now shows `status`. Does not bump the version.
    ///
    /// Only recorded while `status` is still the item's status; returns
    /// whether it was.
    async fn record_mirror(
        &self,
        id: &WorkItemId,
        status: WorkItemStatus,
    ) -> Result<bool, RepositoryError>;

    /// Transition log of an item, ordered by sequence.
    async fn transitions(&self, id: &WorkItemId)
        -> Result<Vec<StatusTransition>, RepositoryError>;

    /// Artifacts of an item, oldest first.
    async fn artifacts(&self, id: &WorkItemId) -> Result<Vec<Artifact>, RepositoryError>;

    /// Clarifications of an item, oldest first.
    async fn clarifications(&self, id: &WorkItemId)
        -> Result<Vec<Clarification>, RepositoryError>;

    async fn get_clarification(
        &self,
        id: &ClarificationId,
    ) -> Result<Option<Clarification>, RepositoryError>;

    /// Every clarification still waiting for an answer.
    async fn pending_clarifications(&self) -> Result<Vec<Clarification>, RepositoryError>;

    /// The most recent transition of an item, if any.
    async fn latest_transition(
        &self,
        id: &WorkItemId,
    ) -> Result<Option<StatusTransition>, RepositoryError> {
        Ok(self.transitions(id).await?.pop())
    }
}
