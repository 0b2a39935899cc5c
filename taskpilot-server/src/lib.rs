pub mod agent;
pub mod clarification;
pub mod clock;
pub mod config;
pub mod github;
pub mod http;
pub mod notify;
pub mod project;
pub mod reconciliation;
pub mod recording;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod workflow;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::agent::LlmAgentRunner;
use crate::clarification::TokenSigner;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::github::GitHubClient;
use crate::notify::{NotificationDispatcher, Notifier, TelegramNotifier};
use crate::project::{GitHubProjectAdapter, OfflineProjectAdapter, ProjectAdapter, StatusColumns};
use crate::scheduler::Scheduler;
use crate::workflow::{WorkflowRepository, WorkflowService};
use taskpilot_core::{build_http_client, OpenAIClient, ServiceType};

pub use recording::RecordingLogger;
pub use taskpilot_core::get_service_version;

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub status_auth_token: Option<String>,
}

fn user_agent() -> String {
    format!("taskpilot/{}", env!("CARGO_PKG_VERSION"))
}

/// Open the recording log if recording is enabled.
///
/// A log that cannot be opened disables recording rather than the service.
pub fn recording_logger(config: &Config) -> Option<RecordingLogger> {
    if !config.recording_enabled {
        return None;
    }
    match RecordingLogger::new(PathBuf::from(&config.recording_log_path)) {
        Ok(logger) => {
            info!(
                "Recording enabled, logging to: {}",
                config.recording_log_path
            );
            Some(logger)
        }
        Err(e) => {
            error!("Failed to initialize recording logger: {}", e);
            None
        }
    }
}

/// Wire a [`WorkflowService`] from configuration over `repository`.
pub fn build_service(
    config: &Config,
    repository: Arc<dyn WorkflowRepository>,
    recording: Option<&RecordingLogger>,
) -> Result<WorkflowService> {
    let llm = OpenAIClient::new(
        recording::with_recording(
            build_http_client(&user_agent())?,
            recording,
            ServiceType::OpenAi,
        ),
        config.openai_api_key.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
    );
    let agents = LlmAgentRunner::new(Arc::new(llm), config.llm_policy());

    let project: Arc<dyn ProjectAdapter> = match &config.github {
        Some(github) => {
            let client = GitHubClient::new(
                github.app_id,
                github.private_key.clone(),
                github.installation_id,
                recording,
            )?;
            info!(
                "Mirroring to project {} for {}",
                github.project_id, github.repository
            );
            Arc::new(GitHubProjectAdapter::new(
                client,
                github.repository.clone(),
                github.project_id.clone(),
                StatusColumns::default(),
            ))
        }
        None => {
            info!("GitHub is not configured; board mirroring is disabled");
            Arc::new(OfflineProjectAdapter)
        }
    };

    let notifier: Option<Arc<dyn Notifier>> = match &config.telegram {
        Some(telegram) => Some(Arc::new(TelegramNotifier::new(
            recording::with_recording(
                build_http_client(&user_agent())?,
                recording,
                ServiceType::Telegram,
            ),
            telegram.bot_token.clone(),
            telegram.chat_id.clone(),
            telegram.alerts_chat_id.clone(),
        ))),
        None => {
            info!("Telegram is not configured; notifications are only logged");
            None
        }
    };

    let signer = TokenSigner::new(config.clarification_secret.as_bytes())
        .context("Invalid CLARIFICATION_SECRET")?;

    Ok(WorkflowService::new(
        repository,
        Arc::new(agents),
        project,
        NotificationDispatcher::new(notifier),
        Arc::new(SystemClock),
        signer,
        config.service_settings()?,
    ))
}
