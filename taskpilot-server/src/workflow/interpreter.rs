//! Effect interpreter.
//!
//! Runs the effects of a committed transition. By the time anything here
//! executes the database already holds the new state, so failures are logged
//! and reported, never rolled back.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::effect::{Effect, LogLevel};
use super::repository::WorkflowRepository;
use crate::notify::NotificationDispatcher;
use crate::project::{AdapterError, ProjectAdapter};
use crate::retry::{retry, RetryPolicy};
use taskpilot_core::{WorkItem, WorkItemStatus};

/// Whether the board reflects the committed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExternalSync {
    Synced,
    /// The board write failed; reconciliation will retry it.
    Deferred { reason: String },
    /// Nothing needed mirroring.
    NotRequired,
}

#[derive(Clone)]
pub struct Interpreter {
    repository: Arc<dyn WorkflowRepository>,
    project: Arc<dyn ProjectAdapter>,
    notifications: NotificationDispatcher,
    policy: RetryPolicy,
    /// Held across a board write and its record so writes land in commit order.
    mirror_lock: Arc<Mutex<()>>,
}

impl Interpreter {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        project: Arc<dyn ProjectAdapter>,
        notifications: NotificationDispatcher,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            project,
            notifications,
            policy,
            mirror_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Execute `effects` for the committed `item`, in order.
    pub async fn execute(&self, item: &WorkItem, effects: Vec<Effect>) -> ExternalSync {
        let mut sync = ExternalSync::NotRequired;
        for effect in effects {
            if let Some(result) = self.execute_effect(item, effect).await {
                sync = result;
            }
        }
        sync
    }

    async fn execute_effect(&self, item: &WorkItem, effect: Effect) -> Option<ExternalSync> {
        match effect {
            Effect::MirrorStatus { status } => Some(self.mirror_status(item, status).await),

            Effect::PostComment { target, body } => {
                let result = retry(
                    &self.policy,
                    "post comment",
                    AdapterError::is_retryable,
                    |_| self.project.post_comment(target, &body),
                )
                .await;
                if let Err(e) = result {
                    warn!("Failed to comment on {:?} for {}: {}", target, item.id, e);
                }
                None
            }

            Effect::Notify { channel, message } => {
                self.notifications.dispatch(channel, message);
                None
            }

            Effect::Log { level, message } => {
                match level {
                    LogLevel::Debug => debug!("{}", message),
                    LogLevel::Info => info!("{}", message),
                    LogLevel::Warn => warn!("{}", message),
                    LogLevel::Error => error!("{}", message),
                }
                None
            }
        }
    }

    /// Push the item's committed status to the board and record the mirror on
    /// success.
    ///
    /// `status` is what the caller committed. If a later transition has landed
    /// since, its status is pushed instead, so a slow mirror never leaves the
    /// board behind the database.
    pub async fn mirror_status(&self, item: &WorkItem, status: WorkItemStatus) -> ExternalSync {
        if item.project_item_id.is_none() {
            debug!("{} is not on the board; skipping mirror", item.id);
            return ExternalSync::NotRequired;
        }

        let _guard = self.mirror_lock.lock().await;
        let status = match self.repository.get_item(&item.id).await {
            Ok(Some(stored)) => stored.status,
            Ok(None) => status,
            Err(e) => {
                warn!("Could not reload {} before mirroring: {}", item.id, e);
                status
            }
        };

        let result = retry(
            &self.policy,
            "mirror status",
            AdapterError::is_retryable,
            |_| self.project.set_status(item, status),
        )
        .await;

        match result {
            Ok(()) => {
                match self.repository.record_mirror(&item.id, status).await {
                    Ok(true) => {}
                    Ok(false) => debug!(
                        "{} moved past {} while mirroring; its own mirror follows",
                        item.id, status
                    ),
                    // The board is right; the next reconciliation pass will
                    // rewrite it and try recording again.
                    Err(e) => warn!("Mirrored {} but could not record it: {}", item.id, e),
                }
                ExternalSync::Synced
            }
            Err(e) => {
                let reason = AdapterError::from(e).to_string();
                warn!(
                    "Could not mirror {} to {} on the board: {}",
                    item.id, status, reason
                );
                ExternalSync::Deferred { reason }
            }
        }
    }
}
