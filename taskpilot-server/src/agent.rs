//! Stage agents.
//!
//! A runner turns an item and what has been recorded about it into either an
//! artifact or a question for a human. Runners never write anything; the
//! workflow service persists whatever they return.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::retry::{retry, RetryError, RetryPolicy};
use taskpilot_core::{
    build_agent_prompt, parse_agent_output, AgentStage, Artifact, ArtifactBody, Clarification,
    LlmClient, LlmError, ParsedOutput, QuestionDraft, WorkItem,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// The model could not be reached within the retry budget.
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// The model answered, but not in the expected shape. Not retried.
    #[error("unparsable agent output: {0}")]
    UnparsableOutput(String),
}

/// Everything an agent sees for one run.
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub stage: AgentStage,
    pub item: WorkItem,
    /// Artifacts of the item, oldest first.
    pub artifacts: Vec<Artifact>,
    pub clarifications: Vec<Clarification>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Artifact(ArtifactBody),
    ClarificationNeeded(QuestionDraft),
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, input: &AgentInput) -> Result<AgentOutcome, AgentError>;
}

/// Runs a stage by prompting an LLM and validating its structured reply.
pub struct LlmAgentRunner {
    llm: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl LlmAgentRunner {
    pub fn new(llm: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { llm, policy }
    }
}

#[async_trait]
impl AgentRunner for LlmAgentRunner {
    async fn run(&self, input: &AgentInput) -> Result<AgentOutcome, AgentError> {
        let prompt = build_agent_prompt(
            input.stage,
            &input.item,
            &input.artifacts,
            &input.clarifications,
        );
        info!(
            "Running {} agent for {} ({} prompt chars)",
            input.stage,
            input.item.id,
            prompt.user.len()
        );

        let operation = format!("{} agent for {}", input.stage, input.item.id);
        let raw = retry(&self.policy, &operation, LlmError::is_retryable, |_| {
            self.llm.run_agent(&prompt)
        })
        .await
        .map_err(|e| match e {
            RetryError::TimedOut { attempts } => {
                AgentError::LlmUnavailable(format!("timed out after {} attempt(s)", attempts))
            }
            RetryError::Failed { attempts, error } => AgentError::LlmUnavailable(format!(
                "{} (after {} attempt(s))",
                error, attempts
            )),
        })?;

        match parse_agent_output(input.stage, &raw) {
            ParsedOutput::Artifact(body) => Ok(AgentOutcome::Artifact(body)),
            ParsedOutput::ClarificationNeeded(draft) => {
                Ok(AgentOutcome::ClarificationNeeded(draft))
            }
            ParsedOutput::ParseError(reason) => {
                warn!(
                    "{} agent for {} returned unparsable output: {}",
                    input.stage, input.item.id, reason
                );
                Err(AgentError::UnparsableOutput(reason))
            }
        }
    }
}
