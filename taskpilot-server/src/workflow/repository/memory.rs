//! In-memory implementation of `WorkflowRepository`.
//!
//! All state is held behind a single lock and lost on restart. Used by tests
//! and by `taskpilot --in-memory` dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ClarificationWrite, CommitOutcome, ItemCommit, RepositoryError, WorkflowRepository};
use taskpilot_core::{
    Artifact, Clarification, ClarificationId, StatusTransition, WorkItem, WorkItemId,
    WorkItemStatus,
};

#[derive(Default)]
struct Tables {
    items: HashMap<WorkItemId, WorkItem>,
    /// Insertion order of items, for stable listing.
    item_order: Vec<WorkItemId>,
    transitions: HashMap<WorkItemId, Vec<StatusTransition>>,
    artifacts: HashMap<WorkItemId, Vec<Artifact>>,
    clarifications: HashMap<ClarificationId, Clarification>,
    clarification_order: Vec<ClarificationId>,
}

/// In-memory workflow repository.
///
/// One `RwLock` guards every table so a commit is atomic with respect to all
/// readers.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn insert_item(&self, item: &WorkItem) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.items.contains_key(&item.id) {
            return Err(RepositoryError::Duplicate(item.id.clone()));
        }
        tables.items.insert(item.id.clone(), item.clone());
        tables.item_order.push(item.id.clone());
        Ok(())
    }

    async fn get_item(&self, id: &WorkItemId) -> Result<Option<WorkItem>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.items.get(id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<WorkItem>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .item_order
            .iter()
            .filter_map(|id| tables.items.get(id).cloned())
            .collect())
    }

    async fn commit(&self, commit: ItemCommit) -> Result<CommitOutcome, RepositoryError> {
        commit.validate()?;

        let mut tables = self.tables.write().await;
        let stored = tables
            .items
            .get(&commit.item.id)
            .ok_or_else(|| RepositoryError::storage("commit", format!("no item {}", commit.item.id)))?;

        if stored.version != commit.expected_version {
            return Ok(CommitOutcome::Conflict);
        }
        let stored_status = stored.status;
        let mirrored_status = stored.mirrored_status;

        if let Some(artifact) = &commit.artifact {
            if artifact.stage != stored_status {
                return Err(RepositoryError::Invariant(format!(
                    "artifact for stage {} written while item {} is in {}",
                    artifact.stage, commit.item.id, stored_status
                )));
            }
        }

        if let Some(transition) = &commit.transition {
            let last_sequence = tables
                .transitions
                .get(&commit.item.id)
                .and_then(|log| log.last())
                .map_or(0, |t| t.sequence);
            if transition.sequence != last_sequence + 1 {
                return Err(RepositoryError::Invariant(format!(
                    "transition sequence {} does not follow {} for item {}",
                    transition.sequence, last_sequence, commit.item.id
                )));
            }
        }

        match &commit.clarification {
            Some(ClarificationWrite::Insert(clarification)) => {
                if tables.clarifications.contains_key(&clarification.id) {
                    return Err(RepositoryError::Invariant(format!(
                        "clarification {} already exists",
                        clarification.id
                    )));
                }
            }
            Some(ClarificationWrite::Resolve(clarification)) => {
                let still_pending = tables
                    .clarifications
                    .get(&clarification.id)
                    .is_some_and(|c| c.is_pending() && c.item_id == commit.item.id);
                if !still_pending {
                    return Ok(CommitOutcome::Conflict);
                }
            }
            None => {}
        }

        // Every check passed; apply all writes under the same lock.
        let ItemCommit {
            mut item,
            transition,
            artifact,
            clarification,
            ..
        } = commit;
        item.mirrored_status = mirrored_status;
        let item_id = item.id.clone();
        tables.items.insert(item_id.clone(), item);

        if let Some(transition) = transition {
            tables
                .transitions
                .entry(item_id.clone())
                .or_default()
                .push(transition);
        }
        if let Some(artifact) = artifact {
            tables.artifacts.entry(item_id).or_default().push(artifact);
        }
        match clarification {
            Some(ClarificationWrite::Insert(clarification)) => {
                tables.clarification_order.push(clarification.id.clone());
                tables
                    .clarifications
                    .insert(clarification.id.clone(), clarification);
            }
            Some(ClarificationWrite::Resolve(clarification)) => {
                tables
                    .clarifications
                    .insert(clarification.id.clone(), clarification);
            }
            None => {}
        }

        Ok(CommitOutcome::Committed)
    }

    async fn record_mirror(
        &self,
        id: &WorkItemId,
        status: WorkItemStatus,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.items.get_mut(id) {
            Some(item) if item.status == status => {
                item.mirrored_status = Some(status);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::storage(
                "record_mirror",
                format!("no item {}", id),
            )),
        }
    }

    async fn transitions(
        &self,
        id: &WorkItemId,
    ) -> Result<Vec<StatusTransition>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.transitions.get(id).cloned().unwrap_or_default())
    }

    async fn artifacts(&self, id: &WorkItemId) -> Result<Vec<Artifact>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.artifacts.get(id).cloned().unwrap_or_default())
    }

    async fn clarifications(
        &self,
        id: &WorkItemId,
    ) -> Result<Vec<Clarification>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .clarification_order
            .iter()
            .filter_map(|cid| tables.clarifications.get(cid))
            .filter(|c| &c.item_id == id)
            .cloned()
            .collect())
    }

    async fn get_clarification(
        &self,
        id: &ClarificationId,
    ) -> Result<Option<Clarification>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.clarifications.get(id).cloned())
    }

    async fn pending_clarifications(&self) -> Result<Vec<Clarification>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .clarification_order
            .iter()
            .filter_map(|cid| tables.clarifications.get(cid))
            .filter(|c| c.is_pending())
            .cloned()
            .collect())
    }
}
