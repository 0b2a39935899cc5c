//! GitHub Projects V2 implementation of [`ProjectAdapter`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AdapterError, CommentTarget, ProjectAdapter, StatusOption};
use crate::github::{GitHubClient, RepoRef};
use crate::workflow::transition::MergeMethod;
use taskpilot_core::{WorkItem, WorkItemStatus};

const STATUS_FIELD: &str = "Status";

const STATUS_FIELD_QUERY: &str = r#"
query($project: ID!, $field: String!) {
  node(id: $project) {
    ... on ProjectV2 {
      field(name: $field) {
        ... on ProjectV2SingleSelectField { id options { id name } }
      }
    }
  }
}"#;

const UPDATE_STATUS_MUTATION: &str = r#"
mutation($project: ID!, $item: ID!, $field: ID!, $option: String!) {
  updateProjectV2ItemFieldValue(input: {
    projectId: $project, itemId: $item, fieldId: $field,
    value: { singleSelectOptionId: $option }
  }) { projectV2Item { id } }
}"#;

const READ_STATUS_QUERY: &str = r#"
query($item: ID!, $field: String!) {
  node(id: $item) {
    ... on ProjectV2Item {
      fieldValueByName(name: $field) {
        ... on ProjectV2ItemFieldSingleSelectValue { name optionId }
      }
    }
  }
}"#;

const REVERT_MUTATION: &str = r#"
mutation($pr: ID!) {
  revertPullRequest(input: { pullRequestId: $pr }) { revertPullRequest { number } }
}"#;

/// Board column names for each workflow status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusColumns {
    columns: Vec<(WorkItemStatus, String)>,
}

impl Default for StatusColumns {
    fn default() -> Self {
        Self::new([
            (WorkItemStatus::Backlog, "Backlog"),
            (WorkItemStatus::ProductDesign, "Product Design"),
            (WorkItemStatus::TechDesign, "Tech Design"),
            (WorkItemStatus::Implementation, "Implementation"),
            (WorkItemStatus::Review, "Review"),
            (WorkItemStatus::Done, "Done"),
            (WorkItemStatus::Reverted, "Reverted"),
        ])
    }
}

impl StatusColumns {
    pub fn new<'a>(columns: impl IntoIterator<Item = (WorkItemStatus, &'a str)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(status, name)| (status, name.to_string()))
                .collect(),
        }
    }

    pub fn column_for(&self, status: WorkItemStatus) -> Option<&str> {
        self.columns
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, name)| name.as_str())
    }

    /// Status shown by a column, ignoring case and surrounding whitespace.
    pub fn status_for(&self, column: &str) -> Option<WorkItemStatus> {
        let column = column.trim();
        self.columns
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(column))
            .map(|(status, _)| *status)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FieldOption {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusField {
    id: String,
    options: Vec<FieldOption>,
}

#[derive(Debug, Deserialize)]
struct NodeResponse<T> {
    node: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ProjectNode {
    field: Option<StatusField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemNode {
    field_value_by_name: Option<SingleSelectValue>,
}

#[derive(Debug, Deserialize)]
struct SingleSelectValue {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevertResponse {
    revert_pull_request: RevertPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevertPayload {
    revert_pull_request: Option<PullRequestNumber>,
}

#[derive(Debug, Deserialize)]
struct PullRequestNumber {
    number: u64,
}

pub struct GitHubProjectAdapter {
    client: GitHubClient,
    repo: RepoRef,
    project_id: String,
    columns: StatusColumns,
    status_field: RwLock<Option<StatusField>>,
}

impl GitHubProjectAdapter {
    pub fn new(
        client: GitHubClient,
        repo: RepoRef,
        project_id: String,
        columns: StatusColumns,
    ) -> Self {
        Self {
            client,
            repo,
            project_id,
            columns,
            status_field: RwLock::new(None),
        }
    }

    async fn status_field(&self) -> Result<StatusField, AdapterError> {
        if let Some(field) = self.status_field.read().await.as_ref() {
            return Ok(field.clone());
        }

        let response: NodeResponse<ProjectNode> = self
            .client
            .graphql(
                STATUS_FIELD_QUERY,
                json!({ "project": self.project_id, "field": STATUS_FIELD }),
            )
            .await
            .map_err(AdapterError::from_github)?;
        let field = response
            .node
            .and_then(|project| project.field)
            .ok_or_else(|| AdapterError::Rejected {
                status: 404,
                message: format!("project {} has no {} field", self.project_id, STATUS_FIELD),
            })?;

        debug!("Loaded {} status options", field.options.len());
        *self.status_field.write().await = Some(field.clone());
        Ok(field)
    }
}

#[async_trait]
impl ProjectAdapter for GitHubProjectAdapter {
    async fn set_status(&self, item: &WorkItem, status: WorkItemStatus) -> Result<(), AdapterError> {
        let project_item = item
            .project_item_id
            .as_deref()
            .ok_or(AdapterError::NotOnBoard)?;
        let column = self
            .columns
            .column_for(status)
            .ok_or(AdapterError::UnmappedStatus(status))?;
        let field = self.status_field().await?;
        let option = field
            .options
            .iter()
            .find(|option| option.name.eq_ignore_ascii_case(column))
            .ok_or(AdapterError::UnmappedStatus(status))?;

        let _: serde_json::Value = self
            .client
            .graphql(
                UPDATE_STATUS_MUTATION,
                json!({
                    "project": self.project_id,
                    "item": project_item,
                    "field": field.id,
                    "option": option.id,
                }),
            )
            .await
            .map_err(AdapterError::from_github)?;

        info!("Moved {} to '{}' on the board", item.id, column);
        Ok(())
    }

    async fn read_status(&self, item: &WorkItem) -> Result<Option<WorkItemStatus>, AdapterError> {
        let project_item = item
            .project_item_id
            .as_deref()
            .ok_or(AdapterError::NotOnBoard)?;
        let response: NodeResponse<ItemNode> = self
            .client
            .graphql(
                READ_STATUS_QUERY,
                json!({ "item": project_item, "field": STATUS_FIELD }),
            )
            .await
            .map_err(AdapterError::from_github)?;

        let node = response.node.ok_or(AdapterError::NotOnBoard)?;
        Ok(node
            .field_value_by_name
            .and_then(|value| value.name)
            .and_then(|name| self.columns.status_for(&name)))
    }

    async fn post_comment(&self, target: CommentTarget, body: &str) -> Result<(), AdapterError> {
        self.client
            .post_issue_comment(&self.repo, target.number(), body)
            .await
            .map_err(AdapterError::from_github)?;
        Ok(())
    }

    async fn status_options(&self) -> Result<Vec<StatusOption>, AdapterError> {
        let field = self.status_field().await?;
        Ok(field
            .options
            .into_iter()
            .map(|option| StatusOption {
                status: self.columns.status_for(&option.name),
                id: option.id,
                name: option.name,
            })
            .collect())
    }

    async fn merge_pull_request(
        &self,
        pr_number: u64,
        method: MergeMethod,
        commit_title: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<String, AdapterError> {
        self.client
            .merge_pull_request(
                &self.repo,
                pr_number,
                method.as_str(),
                commit_title,
                commit_message,
            )
            .await
            .map_err(AdapterError::from_github)
    }

    async fn revert_pull_request(&self, pr_number: u64) -> Result<u64, AdapterError> {
        let pr = self
            .client
            .get_pull_request(&self.repo, pr_number)
            .await
            .map_err(AdapterError::from_github)?;
        if !pr.merged {
            return Err(AdapterError::Rejected {
                status: 422,
                message: format!("PR #{} is {} and not merged", pr_number, pr.state),
            });
        }

        let response: RevertResponse = self
            .client
            .graphql(REVERT_MUTATION, json!({ "pr": pr.node_id }))
            .await
            .map_err(AdapterError::from_github)?;
        let revert = response
            .revert_pull_request
            .revert_pull_request
            .ok_or_else(|| AdapterError::Request("revert returned no pull request".to_string()))?;

        info!("Opened revert PR #{} for #{}", revert.number, pr_number);
        Ok(revert.number)
    }
}
