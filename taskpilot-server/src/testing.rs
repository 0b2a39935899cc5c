//! In-crate fakes for the service's collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Barrier;

use crate::agent::{AgentError, AgentInput, AgentOutcome, AgentRunner};
use crate::clarification::TokenSigner;
use crate::clock::ManualClock;
use crate::notify::{Channel, NotificationDispatcher, Notifier, NotifyError};
use crate::project::{AdapterError, CommentTarget, ProjectAdapter, StatusOption};
use crate::retry::RetryPolicy;
use crate::workflow::transition::{test_support, MergeMethod};
use crate::workflow::{InMemoryRepository, ServiceSettings, WorkflowRepository, WorkflowService};
use taskpilot_core::{
    AgentPrompt, LlmClient, LlmError, WorkItem, WorkItemId, WorkItemKind, WorkItemStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Channel, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<(Channel, String)> {
        lock(&self.sent).clone()
    }

    pub fn messages_on(&self, channel: Channel) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, m)| m)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, channel: Channel, text: &str) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Api {
                status: 400,
                body: "chat not found".to_string(),
            });
        }
        lock(&self.sent).push((channel, text.to_string()));
        Ok(())
    }
}

/// LLM that replays a fixed script of replies.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<AgentPrompt>>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::default(),
        }
    }

    pub fn prompts(&self) -> Vec<AgentPrompt> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn run_agent(&self, prompt: &AgentPrompt) -> Result<String, LlmError> {
        lock(&self.prompts).push(prompt.clone());
        lock(&self.replies)
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

/// Agent runner that replays a fixed script of outcomes.
#[derive(Default)]
pub struct ScriptedAgent {
    outcomes: Mutex<VecDeque<Result<AgentOutcome, AgentError>>>,
    inputs: Mutex<Vec<AgentInput>>,
}

impl ScriptedAgent {
    pub fn new(outcomes: impl IntoIterator<Item = Result<AgentOutcome, AgentError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            inputs: Mutex::default(),
        }
    }

    pub fn push(&self, outcome: Result<AgentOutcome, AgentError>) {
        lock(&self.outcomes).push_back(outcome);
    }

    pub fn inputs(&self) -> Vec<AgentInput> {
        lock(&self.inputs).clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run(&self, input: &AgentInput) -> Result<AgentOutcome, AgentError> {
        lock(&self.inputs).push(input.clone());
        lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::LlmUnavailable("script exhausted".to_string())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub pr_number: u64,
    pub method: MergeMethod,
    pub commit_title: Option<String>,
    pub commit_message: Option<String>,
}

#[derive(Default)]
struct Board {
    columns: HashMap<String, WorkItemStatus>,
    comments: Vec<(CommentTarget, String)>,
    merges: Vec<MergeCall>,
    reverts: Vec<u64>,
    set_status_error: Option<AdapterError>,
    merge_error: Option<AdapterError>,
}

/// Project board kept in memory.
#[derive(Default)]
pub struct FakeProjectAdapter {
    board: Mutex<Board>,
    merge_gate: Option<Arc<Barrier>>,
}

impl FakeProjectAdapter {
    /// Every merge waits at `gate` before returning.
    pub fn with_merge_gate(gate: Arc<Barrier>) -> Self {
        Self {
            board: Mutex::default(),
            merge_gate: Some(gate),
        }
    }

    pub fn fail_set_status(&self, error: Option<AdapterError>) {
        lock(&self.board).set_status_error = error;
    }

    pub fn fail_merges(&self, error: Option<AdapterError>) {
        lock(&self.board).merge_error = error;
    }

    pub fn board_status(&self, project_item_id: &str) -> Option<WorkItemStatus> {
        lock(&self.board).columns.get(project_item_id).copied()
    }

    /// Simulate someone dragging a card on the board.
    pub fn move_card(&self, project_item_id: &str, status: WorkItemStatus) {
        lock(&self.board)
            .columns
            .insert(project_item_id.to_string(), status);
    }

    pub fn comments(&self) -> Vec<(CommentTarget, String)> {
        lock(&self.board).comments.clone()
    }

    pub fn merges(&self) -> Vec<MergeCall> {
        lock(&self.board).merges.clone()
    }

    pub fn reverts(&self) -> Vec<u64> {
        lock(&self.board).reverts.clone()
    }
}

#[async_trait]
impl ProjectAdapter for FakeProjectAdapter {
    async fn set_status(&self, item: &WorkItem, status: WorkItemStatus) -> Result<(), AdapterError> {
        let mut board = lock(&self.board);
        if let Some(error) = board.set_status_error.clone() {
            return Err(error);
        }
        let card = item
            .project_item_id
            .clone()
            .ok_or(AdapterError::NotOnBoard)?;
        board.columns.insert(card, status);
        Ok(())
    }

    async fn read_status(&self, item: &WorkItem) -> Result<Option<WorkItemStatus>, AdapterError> {
        let card = item
            .project_item_id
            .as_deref()
            .ok_or(AdapterError::NotOnBoard)?;
        Ok(lock(&self.board).columns.get(card).copied())
    }

    async fn post_comment(&self, target: CommentTarget, body: &str) -> Result<(), AdapterError> {
        lock(&self.board).comments.push((target, body.to_string()));
        Ok(())
    }

    async fn status_options(&self) -> Result<Vec<StatusOption>, AdapterError> {
        Ok(WorkItemStatus::ALL
            .into_iter()
            .map(|status| StatusOption {
                id: format!("opt_{}", status),
                name: status.to_string(),
                status: Some(status),
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
        if let Some(gate) = &self.merge_gate {
            gate.wait().await;
        }
        let mut board = lock(&self.board);
        if let Some(error) = board.merge_error.clone() {
            return Err(error);
        }
        board.merges.push(MergeCall {
            pr_number,
            method,
            commit_title: commit_title.map(str::to_string),
            commit_message: commit_message.map(str::to_string),
        });
        Ok(format!("sha-{}-{}", pr_number, board.merges.len()))
    }

    async fn revert_pull_request(&self, pr_number: u64) -> Result<u64, AdapterError> {
        let mut board = lock(&self.board);
        board.reverts.push(pr_number);
        Ok(pr_number + 1000)
    }
}

/// A service wired to in-memory fakes, for tests above the service layer.
pub struct TestPipeline {
    pub service: Arc<WorkflowService>,
    pub repository: Arc<InMemoryRepository>,
    pub project: Arc<FakeProjectAdapter>,
    pub agents: Arc<ScriptedAgent>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl TestPipeline {
    pub fn new() -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        let project = Arc::new(FakeProjectAdapter::default());
        let agents = Arc::new(ScriptedAgent::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(test_support::now()));
        let settings = ServiceSettings {
            clarification_ttl: chrono::Duration::hours(1),
            public_base_url: "https://pilot.example.com".to_string(),
            github_policy: RetryPolicy::once(std::time::Duration::from_secs(5)),
            ..ServiceSettings::default()
        };
        let service = WorkflowService::new(
            repository.clone(),
            agents.clone(),
            project.clone(),
            NotificationDispatcher::new(Some(notifier.clone())),
            clock.clone(),
            TokenSigner::new(b"test secret").unwrap(),
            settings,
        );
        Self {
            service: Arc::new(service),
            repository,
            project,
            agents,
            notifier,
            clock,
        }
    }

    /// Store an item in `status` without going through the workflow.
    pub async fn seed(&self, kind: WorkItemKind, status: WorkItemStatus) -> WorkItem {
        let item = test_support::item_in(kind, status);
        self.repository.insert_item(&item).await.unwrap();
        item
    }

    pub async fn stored(&self, id: &WorkItemId) -> WorkItem {
        self.repository.get_item(id).await.unwrap().unwrap()
    }

    /// Wait for queued notifications and return everything sent.
    pub async fn sent(&self) -> Vec<(Channel, String)> {
        self.service.notifications().flush().await;
        self.notifier.messages()
    }
}
