//! Project-management adapter.
//!
//! The workflow's own status is authoritative. The adapter mirrors it onto an
//! external board, posts comments, and performs the pull request merges and
//! reverts that some transitions depend on.

mod github;

pub use github::{GitHubProjectAdapter, StatusColumns};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskpilot_core::{WorkItem, WorkItemStatus};

use crate::github::GitHubApiError;
use crate::retry::RetryError;
use crate::workflow::transition::MergeMethod;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Transport failures and server-side errors.
    #[error("request failed: {0}")]
    Request(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("project board has no column for {0}")]
    UnmappedStatus(WorkItemStatus),

    #[error("work item is not on the project board")]
    NotOnBoard,

    #[error("timed out after {attempts} attempt(s)")]
    TimedOut { attempts: u32 },

    #[error("no project adapter is configured")]
    NotConfigured,
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Request(_) | AdapterError::TimedOut { .. } => true,
            AdapterError::Rejected { status, .. } => *status == 429,
            _ => false,
        }
    }

    /// Classify an error from [`GitHubClient`](crate::github::GitHubClient).
    pub(crate) fn from_github(error: anyhow::Error) -> Self {
        match error.downcast_ref::<GitHubApiError>() {
            Some(api) if api.status < 500 => AdapterError::Rejected {
                status: api.status,
                message: api.body.clone(),
            },
            _ => AdapterError::Request(format!("{:#}", error)),
        }
    }
}

impl From<RetryError<AdapterError>> for AdapterError {
    fn from(error: RetryError<AdapterError>) -> Self {
        match error {
            RetryError::TimedOut { attempts } => AdapterError::TimedOut { attempts },
            RetryError::Failed { error, .. } => error,
        }
    }
}

/// Where a comment goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentTarget {
    Issue(u64),
    PullRequest(u64),
}

impl CommentTarget {
    /// Issue or pull request number; GitHub comments on both through the
    /// issues API.
    pub fn number(&self) -> u64 {
        match self {
            CommentTarget::Issue(n) | CommentTarget::PullRequest(n) => *n,
        }
    }
}

/// A column of the board's status field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOption {
    pub id: String,
    pub name: String,
    /// The workflow status this column represents, if any.
    pub status: Option<WorkItemStatus>,
}

#[async_trait]
pub trait ProjectAdapter: Send + Sync {
    /// Move the item's card to the column for `status`.
    async fn set_status(&self, item: &WorkItem, status: WorkItemStatus)
        -> Result<(), AdapterError>;

    /// The status the board currently shows, if its column maps to one.
    async fn read_status(&self, item: &WorkItem) -> Result<Option<WorkItemStatus>, AdapterError>;

    async fn post_comment(&self, target: CommentTarget, body: &str) -> Result<(), AdapterError>;

    async fn status_options(&self) -> Result<Vec<StatusOption>, AdapterError>;

    /// Merge a pull request and return the merge commit SHA.
    async fn merge_pull_request(
        &self,
        pr_number: u64,
        method: MergeMethod,
        commit_title: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<String, AdapterError>;

    /// Open a pull request reverting a merged one and return its number.
    async fn revert_pull_request(&self, pr_number: u64) -> Result<u64, AdapterError>;
}

/// Adapter used when no GitHub credentials are configured.
///
/// Every call fails with [`AdapterError::NotConfigured`]; items without a
/// board card never reach `set_status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProjectAdapter;

#[async_trait]
impl ProjectAdapter for OfflineProjectAdapter {
    async fn set_status(&self, _: &WorkItem, _: WorkItemStatus) -> Result<(), AdapterError> {
        Err(AdapterError::NotConfigured)
    }

    async fn read_status(&self, _: &WorkItem) -> Result<Option<WorkItemStatus>, AdapterError> {
        Err(AdapterError::NotConfigured)
    }

    async fn post_comment(&self, _: CommentTarget, _: &str) -> Result<(), AdapterError> {
        Err(AdapterError::NotConfigured)
    }

    async fn status_options(&self) -> Result<Vec<StatusOption>, AdapterError> {
        Err(AdapterError::NotConfigured)
    }

    async fn merge_pull_request(
        &self,
        _: u64,
        _: MergeMethod,
        _: Option<&str>,
        _: Option<&str>,
    ) -> Result<String, AdapterError> {
        Err(AdapterError::NotConfigured)
    }

    async fn revert_pull_request(&self, _: u64) -> Result<u64, AdapterError> {
        Err(AdapterError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_github_errors_are_classified_by_status() {
        let rejected = Err::<(), _>(GitHubApiError {
            status: 405,
            body: "not mergeable".to_string(),
        })
        .context("merge")
        .unwrap_err();
        let error = AdapterError::from_github(rejected);
        assert_eq!(
            error,
            AdapterError::Rejected {
                status: 405,
                message: "not mergeable".to_string()
            }
        );
        assert!(!error.is_retryable());

        let unavailable = Err::<(), _>(GitHubApiError {
            status: 502,
            body: "bad gateway".to_string(),
        })
        .context("merge")
        .unwrap_err();
        assert!(AdapterError::from_github(unavailable).is_retryable());

        let transport = anyhow::anyhow!("connection reset");
        assert!(AdapterError::from_github(transport).is_retryable());
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let error = AdapterError::Rejected {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(error.is_retryable());
    }
}
