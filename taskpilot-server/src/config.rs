use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::github::RepoRef;
use crate::retry::RetryPolicy;
use crate::workflow::ServiceSettings;

/// File name of the SQLite database inside `state_dir`.
pub const DATABASE_FILE: &str = "taskpilot.db";

/// GitHub App credentials and the board to mirror onto.
#[derive(Clone)]
pub struct GitHubConfig {
    pub app_id: u64,
    pub private_key: String,
    pub installation_id: u64,
    pub repository: RepoRef,
    /// Node ID of the Projects V2 board.
    pub project_id: String,
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub alerts_chat_id: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    /// Unset means no board mirroring, comments or merges.
    pub github: Option<GitHubConfig>,
    pub openai_api_key: String,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
    /// Key for clarification token hashes.
    pub clarification_secret: String,
    pub clarification_ttl: Duration,
    pub public_base_url: String,
    /// Unset means notifications are only logged.
    pub telegram: Option<TelegramConfig>,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Optional bearer token for /status and /cycle.
    /// If not set, both endpoints are disabled (403 Forbidden).
    pub status_auth_token: Option<String>,
    pub poll_interval: Duration,
    pub max_concurrent_agents: usize,
    pub llm_timeout: Duration,
    pub llm_max_attempts: u32,
    pub github_timeout: Duration,
    pub github_max_attempts: u32,
    pub undo_window: Duration,
    /// Read board columns back during reconciliation and correct drift.
    pub drift_check: bool,
    pub recording_enabled: bool,
    pub recording_log_path: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("github", &self.github.as_ref().map(|g| g.repository.to_string()))
            .field("telegram", &self.telegram.is_some())
            .field("port", &self.port)
            .field("state_dir", &self.state_dir)
            .field("poll_interval", &self.poll_interval)
            .field("max_concurrent_agents", &self.max_concurrent_agents)
            .field("drift_check", &self.drift_check)
            .finish_non_exhaustive()
    }
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty token can never grant access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| anyhow!("{} environment variable is required", key))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(key) {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("{} has an invalid value '{}'", key, value)),
            None => Ok(default),
        }
    }

    fn seconds(&self, key: &str, default: u64) -> Result<Duration> {
        Ok(Duration::from_secs(self.parsed(key, default)?))
    }

    fn github(&self) -> Result<Option<GitHubConfig>> {
        let Some(app_id) = self.optional("GITHUB_APP_ID") else {
            return Ok(None);
        };
        let app_id = app_id
            .trim()
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;
        let private_key = self.required("GITHUB_PRIVATE_KEY")?.replace("\\n", "\n");
        let installation_id = self
            .required("GITHUB_INSTALLATION_ID")?
            .trim()
            .parse::<u64>()
            .context("GITHUB_INSTALLATION_ID must be a valid number")?;
        let repository = self
            .required("GITHUB_REPOSITORY")?
            .parse::<RepoRef>()
            .context("GITHUB_REPOSITORY is invalid")?;
        let project_id = self.required("GITHUB_PROJECT_ID")?;

        Ok(Some(GitHubConfig {
            app_id,
            private_key,
            installation_id,
            repository,
            project_id,
        }))
    }

    fn telegram(&self) -> Result<Option<TelegramConfig>> {
        let Some(bot_token) = self.optional("TELEGRAM_BOT_TOKEN") else {
            return Ok(None);
        };
        Ok(Some(TelegramConfig {
            bot_token,
            chat_id: self
                .required("TELEGRAM_CHAT_ID")
                .context("TELEGRAM_CHAT_ID is required when TELEGRAM_BOT_TOKEN is set")?,
            alerts_chat_id: self.optional("TELEGRAM_ALERTS_CHAT_ID"),
        }))
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };

        let max_concurrent_agents: usize = vars.parsed("MAX_CONCURRENT_AGENTS", 2)?;
        if max_concurrent_agents == 0 {
            return Err(anyhow!("MAX_CONCURRENT_AGENTS must be at least 1"));
        }

        Ok(Config {
            github: vars.github()?,
            openai_api_key: vars.required("OPENAI_API_KEY")?,
            openai_model: vars.optional("OPENAI_MODEL"),
            openai_base_url: vars.optional("OPENAI_BASE_URL"),
            clarification_secret: vars.required("CLARIFICATION_SECRET")?,
            clarification_ttl: vars.seconds("CLARIFICATION_TTL_SECS", 86_400)?,
            public_base_url: vars
                .optional("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            telegram: vars.telegram()?,
            port: vars.parsed("PORT", 3000)?,
            state_dir: vars
                .optional("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            status_auth_token: parse_status_auth_token(vars.optional("STATUS_AUTH_TOKEN")),
            poll_interval: vars.seconds("POLL_INTERVAL_SECS", 300)?,
            max_concurrent_agents,
            llm_timeout: vars.seconds("LLM_TIMEOUT_SECS", 600)?,
            llm_max_attempts: vars.parsed("LLM_MAX_ATTEMPTS", 3)?,
            github_timeout: vars.seconds("GITHUB_TIMEOUT_SECS", 30)?,
            github_max_attempts: vars.parsed("GITHUB_MAX_ATTEMPTS", 3)?,
            undo_window: vars.seconds("UNDO_WINDOW_SECS", 300)?,
            drift_check: vars.parsed("DRIFT_CHECK", false)?,
            recording_enabled: vars.parsed("RECORDING_ENABLED", false)?,
            recording_log_path: vars
                .optional("RECORDING_LOG_PATH")
                .unwrap_or_else(|| "recordings.jsonl".to_string()),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }

    pub fn llm_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.llm_max_attempts, self.llm_timeout)
    }

    pub fn github_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.github_max_attempts, self.github_timeout)
    }

    pub fn service_settings(&self) -> Result<ServiceSettings> {
        let chrono_duration = |d: Duration, name: &str| {
            chrono::Duration::from_std(d).with_context(|| format!("{} is out of range", name))
        };
        Ok(ServiceSettings {
            undo_window: chrono_duration(self.undo_window, "UNDO_WINDOW_SECS")?,
            clarification_ttl: chrono_duration(self.clarification_ttl, "CLARIFICATION_TTL_SECS")?,
            public_base_url: self.public_base_url.clone(),
            github_policy: self.github_policy(),
            max_concurrent_agents: self.max_concurrent_agents,
        })
    }
}
