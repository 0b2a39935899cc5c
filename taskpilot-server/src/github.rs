//! Minimal GitHub client: GitHub App authentication, the handful of REST
//! endpoints the workflow needs, and a GraphQL entry point for Projects V2.

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Method;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::recording::{with_recording, RecordingLogger, ServiceType};

const GITHUB_API: &str = "https://api.github.com";

/// Cached installation tokens are refreshed this long before they expire.
const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// A non-success response from the GitHub API.
///
/// Returned inside `anyhow::Error` so callers can downcast to inspect the
/// status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("GitHub API error {status}: {body}")]
pub struct GitHubApiError {
    pub status: u16,
    pub body: String,
}

/// `owner/name` of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl std::str::FromStr for RepoRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (owner, name) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow!("repository must be 'owner/name', got '{}'", s))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(anyhow!("repository must be 'owner/name', got '{}'", s));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    app_id: u64,
    private_key: String,
    installation_id: u64,
    token_cache: Arc<RwLock<Option<(String, SystemTime)>>>,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct Comment {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub node_id: String,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    pub merge_commit_sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    merge_method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_message: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    sha: String,
    merged: bool,
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl GitHubClient {
    pub fn new(
        app_id: u64,
        private_key: String,
        installation_id: u64,
        recording_logger: Option<&RecordingLogger>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("taskpilot/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create GitHub HTTP client")?;

        Ok(Self {
            client: with_recording(client, recording_logger, ServiceType::GitHub),
            app_id,
            private_key,
            installation_id,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.as_ref() {
                let remaining = expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default();
                if remaining > TOKEN_REFRESH_BUFFER {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            GITHUB_API, self.installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .context("Failed to send installation token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub App token request failed: {} - {}", status, body);
            return Err(GitHubApiError {
                status: status.as_u16(),
                body,
            })
            .context("GitHub App token request failed");
        }

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = chrono::DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?;
        let expires_at_system =
            UNIX_EPOCH + Duration::from_secs(u64::try_from(expires_at.timestamp()).unwrap_or(0));

        *self.token_cache.write().await = Some((token_response.token.clone(), expires_at_system));

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }

    async fn authorized(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.get_installation_token().await?;
        Ok(self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github+json"))
    }

    /// Send `request` and decode a successful JSON response.
    async fn send_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error during {}: {} - {}", what, status, body);
            return Err(GitHubApiError {
                status: status.as_u16(),
                body,
            })
            .with_context(|| format!("GitHub API error during {}", what));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    pub async fn post_issue_comment(
        &self,
        repo: &RepoRef,
        issue_number: u64,
        body: &str,
    ) -> Result<Comment> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            GITHUB_API, repo.owner, repo.name, issue_number
        );
        info!("Posting comment to #{} in {}", issue_number, repo);

        let request = self
            .authorized(Method::POST, &url)
            .await?
            .json(&serde_json::json!({ "body": body }));
        let comment: Comment = Self::send_json(request, "post comment").await?;

        info!("Successfully posted comment with ID: {}", comment.id);
        Ok(comment)
    }

    pub async fn get_pull_request(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<PullRequestResponse> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            GITHUB_API, repo.owner, repo.name, pr_number
        );
        let request = self.authorized(Method::GET, &url).await?;
        Self::send_json(request, "get pull request").await
    }

    /// Merge a pull request, returning the merge commit SHA.
    pub async fn merge_pull_request(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        merge_method: &str,
        commit_title: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<String> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            GITHUB_API, repo.owner, repo.name, pr_number
        );
        info!("Merging PR #{} in {} ({})", pr_number, repo, merge_method);

        let request = self
            .authorized(Method::PUT, &url)
            .await?
            .json(&MergeRequest {
                merge_method,
                commit_title,
                commit_message,
            });
        let merge: MergeResponse = Self::send_json(request, "merge pull request").await?;

        if !merge.merged {
            return Err(anyhow!(
                "GitHub did not merge PR #{}: {}",
                pr_number,
                merge.message
            ));
        }
        info!("Merged PR #{} as {}", pr_number, merge.sha);
        Ok(merge.sha)
    }

    /// Run a GraphQL query or mutation.
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let request = self
            .authorized(Method::POST, &format!("{}/graphql", GITHUB_API))
            .await?
            .json(&serde_json::json!({ "query": query, "variables": variables }));
        let response: GraphQlResponse<T> = Self::send_json(request, "GraphQL").await?;

        if let Some(first) = response.errors.first() {
            return Err(anyhow!("GitHub GraphQL error: {}", first.message));
        }
        response
            .data
            .ok_or_else(|| anyhow!("GitHub GraphQL response had no data"))
    }
}
