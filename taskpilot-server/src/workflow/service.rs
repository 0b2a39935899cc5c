//! The workflow service: the only writer of workflow state.
//!
//! Every mutation follows the same shape. Load the item, decide with the pure
//! transition functions, run any repository action that must happen first,
//! commit with a version check, then hand the effects to the interpreter.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::effect::Effect;
use super::error::WorkflowError;
use super::history;
use super::interpreter::{ExternalSync, Interpreter};
use super::repository::{ClarificationWrite, CommitOutcome, ItemCommit, WorkflowRepository};
use super::transition::{self, ExternalAction, ExternalOutcome, TransitionContext};
use crate::agent::{AgentInput, AgentOutcome, AgentRunner};
use crate::clarification::{answer_link, question_message, TokenSigner};
use crate::clock::Clock;
use crate::notify::{Channel, NotificationDispatcher};
use crate::project::{AdapterError, CommentTarget, ProjectAdapter};
use crate::retry::{retry, RetryPolicy};
use taskpilot_core::{
    Actor, AgentStage, Artifact, ArtifactBody, ArtifactId, Clarification, ClarificationId,
    ClarificationState, DesignDecision, Operation, ReviewComment, ReviewStatus, ReviewVerdict,
    StatusTransition, WorkItem, WorkItemId, WorkItemKind, WorkItemStatus,
};

/// How many times a clarification answer is re-applied after losing a race
/// with another write to the same item.
const ANSWER_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub undo_window: Duration,
    pub clarification_ttl: Duration,
    /// Base of the answer links sent with clarification questions.
    pub public_base_url: String,
    /// Applied to every project adapter call.
    pub github_policy: RetryPolicy,
    pub max_concurrent_agents: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            undo_window: Duration::minutes(5),
            clarification_ttl: Duration::hours(24),
            public_base_url: "http://localhost:3000".to_string(),
            github_policy: RetryPolicy::new(3, std::time::Duration::from_secs(30)),
            max_concurrent_agents: 2,
        }
    }
}

/// A new item to add to the backlog.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub kind: WorkItemKind,
    pub title: String,
    pub description: String,
    pub issue_number: Option<u64>,
    pub project_item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedTransition {
    pub item: WorkItem,
    /// `None` for operations that only change review fields.
    pub transition: Option<StatusTransition>,
    pub external_sync: ExternalSync,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    NotDue,
    ArtifactRecorded {
        item: WorkItem,
        artifact: Artifact,
        /// Set when a review verdict sent the item back to implementation.
        transition: Option<StatusTransition>,
    },
    ClarificationRequested {
        item: WorkItem,
        clarification: Clarification,
        answer_link: String,
    },
}

/// Result of one agent run within a cycle.
#[derive(Debug)]
pub struct StageRun {
    pub item_id: WorkItemId,
    pub stage: Option<AgentStage>,
    pub result: Result<StageOutcome, WorkflowError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnsweredClarification {
    pub clarification: Clarification,
    pub item: WorkItem,
}

pub struct WorkflowService {
    repository: Arc<dyn WorkflowRepository>,
    agents: Arc<dyn AgentRunner>,
    project: Arc<dyn ProjectAdapter>,
    notifications: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    signer: TokenSigner,
    settings: ServiceSettings,
    interpreter: Interpreter,
}

impl WorkflowService {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        agents: Arc<dyn AgentRunner>,
        project: Arc<dyn ProjectAdapter>,
        notifications: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        signer: TokenSigner,
        settings: ServiceSettings,
    ) -> Self {
        let interpreter = Interpreter::new(
            repository.clone(),
            project.clone(),
            notifications.clone(),
            settings.github_policy.clone(),
        );
        Self {
            repository,
            agents,
            project,
            notifications,
            clock,
            signer,
            settings,
            interpreter,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    pub(crate) fn repository(&self) -> &Arc<dyn WorkflowRepository> {
        &self.repository
    }

    pub(crate) fn project(&self) -> &Arc<dyn ProjectAdapter> {
        &self.project
    }

    pub(crate) fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn context<'a>(
        &self,
        item: &'a WorkItem,
        artifacts: &'a [Artifact],
        transitions: &'a [StatusTransition],
        now: DateTime<Utc>,
    ) -> TransitionContext<'a> {
        let mut recent = transitions.iter().rev();
        TransitionContext {
            item,
            artifacts,
            last_transition: recent.next(),
            previous_transition: recent.next(),
            now,
            undo_window: self.settings.undo_window,
        }
    }

    async fn commit(&self, commit: ItemCommit) -> Result<(), WorkflowError> {
        let id = commit.item.id.clone();
        match self.repository.commit(commit).await? {
            CommitOutcome::Committed => Ok(()),
            CommitOutcome::Conflict => {
                warn!("Lost a concurrent update race on {}", id);
                Err(WorkflowError::ConflictingUpdate(id))
            }
        }
    }

    async fn run_effects(
        &self,
        mut item: WorkItem,
        effects: Vec<Effect>,
    ) -> (WorkItem, ExternalSync) {
        let sync = self.interpreter.execute(&item, effects).await;
        if sync == ExternalSync::Synced {
            item.mirrored_status = Some(item.status);
        }
        (item, sync)
    }

    pub async fn create_item(&self, new: NewItem) -> Result<WorkItem, WorkflowError> {
        let mut item = WorkItem::new(new.kind, new.title, new.description, self.clock.now());
        item.issue_number = new.issue_number;
        item.project_item_id = new.project_item_id;
        self.repository.insert_item(&item).await?;

        info!("Created {} {} \"{}\"", item.kind, item.id, item.title);
        self.notifications.dispatch(
            Channel::Updates,
            format!("New {} in the backlog: \"{}\"", item.kind, item.title),
        );
        Ok(item)
    }

    pub async fn get_item(&self, id: &WorkItemId) -> Result<WorkItem, WorkflowError> {
        self.repository
            .get_item(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }

    pub async fn list_items(&self) -> Result<Vec<WorkItem>, WorkflowError> {
        Ok(self.repository.list_items().await?)
    }

    /// Transition log of an item, oldest first.
    pub async fn history(&self, id: &WorkItemId) -> Result<Vec<StatusTransition>, WorkflowError> {
        self.get_item(id).await?;
        Ok(self.repository.transitions(id).await?)
    }

    pub async fn artifacts(&self, id: &WorkItemId) -> Result<Vec<Artifact>, WorkflowError> {
        self.get_item(id).await?;
        Ok(self.repository.artifacts(id).await?)
    }

    pub async fn clarifications(
        &self,
        id: &WorkItemId,
    ) -> Result<Vec<Clarification>, WorkflowError> {
        self.get_item(id).await?;
        Ok(self.repository.clarifications(id).await?)
    }

    /// Replay the transition log and compare it with the stored status.
    pub async fn verify_history(&self, id: &WorkItemId) -> Result<(), WorkflowError> {
        let item = self.get_item(id).await?;
        let transitions = self.repository.transitions(id).await?;
        history::verify(&item, &transitions).map_err(|e| WorkflowError::HistoryMismatch {
            item_id: id.clone(),
            detail: e.to_string(),
        })
    }

    /// Status `undoStatusChange` would currently restore, if any.
    pub async fn undo_target(
        &self,
        id: &WorkItemId,
    ) -> Result<Option<WorkItemStatus>, WorkflowError> {
        let item = self.get_item(id).await?;
        let transitions = self.repository.transitions(id).await?;
        let ctx = self.context(&item, &[], &transitions, self.clock.now());
        Ok(transition::undo_target(&ctx))
    }

    /// Apply `operation` to an item on behalf of `actor`.
    pub async fn apply(
        &self,
        id: &WorkItemId,
        operation: Operation,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        let item = self.get_item(id).await?;
        let artifacts = self.repository.artifacts(id).await?;
        let transitions = self.repository.transitions(id).await?;
        let ctx = self.context(&item, &artifacts, &transitions, self.clock.now());

        let plan = transition::plan(&ctx, &operation)?;
        debug!("{}: planned {} -> {:?}", id, operation.kind(), plan.target);

        let outcome = match &plan.external {
            Some(action) => Some(self.execute_external(action).await?),
            None => None,
        };

        let result = transition::apply(&ctx, &plan, actor, outcome.as_ref());
        let commit = ItemCommit::new(item.version, result.item.clone())
            .with_transition(result.transition.clone());
        self.commit(commit).await?;

        let (item, external_sync) = self.run_effects(result.item, result.effects).await;
        Ok(AppliedTransition {
            item,
            transition: result.transition,
            external_sync,
        })
    }

    async fn execute_external(
        &self,
        action: &ExternalAction,
    ) -> Result<ExternalOutcome, WorkflowError> {
        let policy = &self.settings.github_policy;
        let result = match action {
            ExternalAction::MergePullRequest {
                pr_number,
                method,
                commit_title,
                commit_message,
            } => retry(
                policy,
                &format!("merge PR #{}", pr_number),
                AdapterError::is_retryable,
                |_| {
                    self.project.merge_pull_request(
                        *pr_number,
                        *method,
                        commit_title.as_deref(),
                        commit_message.as_deref(),
                    )
                },
            )
            .await
            .map(|sha| ExternalOutcome::Merged { sha }),
            ExternalAction::RevertPullRequest { pr_number } => retry(
                policy,
                &format!("revert PR #{}", pr_number),
                AdapterError::is_retryable,
                |_| self.project.revert_pull_request(*pr_number),
            )
            .await
            .map(|pr_number| ExternalOutcome::RevertOpened { pr_number }),
        };

        result.map_err(|e| {
            let error = AdapterError::from(e);
            warn!("External action {:?} failed: {}", action, error);
            WorkflowError::ExternalSyncFailed(error)
        })
    }

    pub async fn approve(
        &self,
        id: &WorkItemId,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::Approve, actor).await
    }

    pub async fn review_design(
        &self,
        id: &WorkItemId,
        decision: DesignDecision,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::ReviewDesign { decision }, actor).await
    }

    pub async fn merge_design_pr(
        &self,
        id: &WorkItemId,
        pr_number: u64,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::MergeDesignPR { pr_number }, actor)
            .await
    }

    pub async fn submit_implementation_pr(
        &self,
        id: &WorkItemId,
        pr_number: u64,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::SubmitImplementationPR { pr_number }, actor)
            .await
    }

    pub async fn request_changes_on_pr(
        &self,
        id: &WorkItemId,
        feedback: String,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::RequestChangesOnPR { feedback }, actor)
            .await
    }

    pub async fn merge_implementation_pr(
        &self,
        id: &WorkItemId,
        commit_message: Option<String>,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::MergeImplementationPR { commit_message }, actor)
            .await
    }

    pub async fn revert_merge(
        &self,
        id: &WorkItemId,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::RevertMerge, actor).await
    }

    pub async fn merge_revert_pr(
        &self,
        id: &WorkItemId,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::MergeRevertPR, actor).await
    }

    pub async fn undo_status_change(
        &self,
        id: &WorkItemId,
        actor: Actor,
    ) -> Result<AppliedTransition, WorkflowError> {
        self.apply(id, Operation::UndoStatusChange, actor).await
    }

    /// Run the agent for the item's current stage, if it is due, and record
    /// what it produced.
    pub async fn run_agent_stage(&self, id: &WorkItemId) -> Result<StageOutcome, WorkflowError> {
        let item = self.get_item(id).await?;
        let Some(stage) = item.agent_stage().filter(|_| item.is_due()) else {
            return Ok(StageOutcome::NotDue);
        };

        let artifacts = self.repository.artifacts(id).await?;
        let clarifications = self.repository.clarifications(id).await?;
        let input = AgentInput {
            stage,
            item: item.clone(),
            artifacts,
            clarifications,
        };

        let outcome = match self.agents.run(&input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.notifications.dispatch(
                    Channel::Alerts,
                    format!(
                        "{} agent failed for \"{}\" ({}): {}",
                        stage.display_name(),
                        item.title,
                        item.id,
                        e
                    ),
                );
                return Err(e.into());
            }
        };

        match outcome {
            AgentOutcome::Artifact(body) => {
                if !body.matches_stage(stage) {
                    let error = WorkflowError::UnparsableOutput(format!(
                        "{} agent returned an artifact for another stage",
                        stage
                    ));
                    self.notifications
                        .dispatch(Channel::Alerts, format!("\"{}\": {}", item.title, error));
                    return Err(error);
                }
                self.record_artifact(item, stage, body, &input.artifacts)
                    .await
            }
            AgentOutcome::ClarificationNeeded(draft) => {
                let now = self.clock.now();
                let (clarification, token) = self.signer.issue(
                    &item.id,
                    stage,
                    draft,
                    now,
                    self.settings.clarification_ttl,
                );
                let mut next = item.clone();
                next.version += 1;
                next.updated_at = now;
                next.review_status = Some(ReviewStatus::WaitingForClarification);

                let commit = ItemCommit::new(item.version, next.clone())
                    .with_clarification(ClarificationWrite::Insert(clarification.clone()));
                self.commit(commit).await?;

                let link = answer_link(&self.settings.public_base_url, &clarification.id, &token);
                info!(
                    "{} agent asked a question about {} ({})",
                    stage, item.id, clarification.id
                );
                self.notifications.dispatch(
                    Channel::Updates,
                    question_message(&item.title, &clarification, &link),
                );
                Ok(StageOutcome::ClarificationRequested {
                    item: next,
                    clarification,
                    answer_link: link,
                })
            }
        }
    }

    async fn record_artifact(
        &self,
        item: WorkItem,
        stage: AgentStage,
        body: ArtifactBody,
        artifacts: &[Artifact],
    ) -> Result<StageOutcome, WorkflowError> {
        let now = self.clock.now();
        let artifact = Artifact {
            id: ArtifactId::generate(),
            item_id: item.id.clone(),
            stage: item.status,
            agent: stage,
            supersedes: artifacts
                .iter()
                .rev()
                .find(|a| a.agent == stage)
                .map(|a| a.id.clone()),
            body,
            created_at: now,
        };

        let mut effects: Vec<Effect> = artifact_comment(&item, &artifact).into_iter().collect();

        let (next, transition) = match &artifact.body {
            ArtifactBody::Review {
                verdict: ReviewVerdict::RequestChanges,
                summary,
                comments,
            } => {
                // The reviewer sends the PR back exactly as a human would.
                let transitions = self.repository.transitions(&item.id).await?;
                let ctx = self.context(&item, artifacts, &transitions, now);
                let operation = Operation::RequestChangesOnPR {
                    feedback: review_feedback(summary, comments),
                };
                let plan = transition::plan(&ctx, &operation)?;
                let result = transition::apply(&ctx, &plan, Actor::Agent, None);
                effects.extend(result.effects);
                (result.item, result.transition)
            }
            body => {
                let mut next = item.clone();
                next.version += 1;
                next.updated_at = now;
                next.feedback = None;
                next.review_status = Some(ReviewStatus::WaitingForReview);
                let message = match body {
                    ArtifactBody::Review { .. } => {
                        next.review_status = Some(ReviewStatus::Approved);
                        format!("PR review approved \"{}\"; ready to merge", item.title)
                    }
                    ArtifactBody::Implementation { commit_message, .. } => {
                        next.commit_message = Some(commit_message.clone());
                        format!("Implementation of \"{}\" is ready for a PR", item.title)
                    }
                    ArtifactBody::Design { .. } => format!(
                        "{} for \"{}\" is ready for review",
                        stage.display_name(),
                        item.title
                    ),
                };
                effects.push(Effect::Notify {
                    channel: Channel::Updates,
                    message,
                });
                (next, None)
            }
        };

        let commit = ItemCommit::new(item.version, next.clone())
            .with_transition(transition.clone())
            .with_artifact(artifact.clone());
        self.commit(commit).await?;
        info!(
            "Recorded {} artifact {} for {}",
            stage, artifact.id, item.id
        );

        let (item, _) = self.run_effects(next, effects).await;
        Ok(StageOutcome::ArtifactRecorded {
            item,
            artifact,
            transition,
        })
    }

    /// Run every due item's stage agent, at most `max_concurrent_agents` at a
    /// time.
    pub async fn run_due_stages(&self) -> Result<Vec<StageRun>, WorkflowError> {
        let due: Vec<WorkItem> = self
            .repository
            .list_items()
            .await?
            .into_iter()
            .filter(WorkItem::is_due)
            .collect();
        if due.is_empty() {
            return Ok(Vec::new());
        }
        info!("{} item(s) due for an agent run", due.len());

        let runs: Vec<StageRun> = stream::iter(due)
            .map(|item| async move {
                let result = self.run_agent_stage(&item.id).await;
                if let Err(e) = &result {
                    warn!("Stage run for {} failed: {}", item.id, e);
                }
                StageRun {
                    stage: item.agent_stage(),
                    item_id: item.id,
                    result,
                }
            })
            .buffer_unordered(self.settings.max_concurrent_agents.max(1))
            .collect()
            .await;
        Ok(runs)
    }

    /// Load a clarification the holder of `token` may still answer.
    ///
    /// The token is checked before the state, so a wrong token never reveals
    /// whether the question exists or has expired.
    async fn answerable(
        &self,
        id: &ClarificationId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Clarification, WorkflowError> {
        let clarification = self
            .repository
            .get_clarification(id)
            .await?
            .ok_or(WorkflowError::InvalidToken)?;
        if !self.signer.verify(id, token, &clarification.token_hash) {
            warn!("Rejected token for clarification {}", id);
            return Err(WorkflowError::InvalidToken);
        }

        match clarification.state {
            ClarificationState::Answered { .. } => Err(WorkflowError::InvalidToken),
            ClarificationState::Expired { .. } => Err(WorkflowError::ExpiredToken),
            ClarificationState::Pending if clarification.is_past_ttl(now) => {
                Err(WorkflowError::ExpiredToken)
            }
            ClarificationState::Pending => Ok(clarification),
        }
    }

    /// The question behind an answer link, if the link is still usable.
    pub async fn open_clarification(
        &self,
        id: &ClarificationId,
        token: &str,
    ) -> Result<Clarification, WorkflowError> {
        self.answerable(id, token, self.clock.now()).await
    }

    /// Record a human's answer to a clarification and make the item due again.
    pub async fn answer_clarification(
        &self,
        id: &ClarificationId,
        token: &str,
        answer: &str,
    ) -> Result<AnsweredClarification, WorkflowError> {
        for _ in 0..ANSWER_ATTEMPTS {
            let now = self.clock.now();
            let clarification = self.answerable(id, token, now).await?;

            let item = self.get_item(&clarification.item_id).await?;
            let resolved = Clarification {
                state: ClarificationState::Answered {
                    answer: answer.to_string(),
                    answered_at: now,
                },
                ..clarification
            };
            let next = reopen_stage(&item, &resolved, now);
            let commit = ItemCommit::new(item.version, next.clone())
                .with_clarification(ClarificationWrite::Resolve(resolved.clone()));

            match self.repository.commit(commit).await? {
                CommitOutcome::Committed => {
                    info!("Clarification {} answered for {}", id, item.id);
                    self.notifications.dispatch(
                        Channel::Updates,
                        format!(
                            "Answer received for \"{}\"; the {} agent will pick it up",
                            item.title,
                            resolved.agent.display_name().to_lowercase()
                        ),
                    );
                    return Ok(AnsweredClarification {
                        clarification: resolved,
                        item: next,
                    });
                }
                // Either the item moved on or the clarification was resolved
                // concurrently; the reload decides which.
                CommitOutcome::Conflict => {
                    debug!("Answer to {} raced another write; retrying", id)
                }
            }
        }

        let item_id = self
            .repository
            .get_clarification(id)
            .await?
            .map(|c| c.item_id)
            .ok_or(WorkflowError::InvalidToken)?;
        Err(WorkflowError::ConflictingUpdate(item_id))
    }

    /// Expire pending clarifications whose TTL has elapsed.
    ///
    /// The waiting items become due again. Items that lose a race are picked
    /// up by the next sweep.
    pub async fn expire_clarifications(&self) -> Result<Vec<ClarificationId>, WorkflowError> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        for clarification in self.repository.pending_clarifications().await? {
            if !clarification.is_past_ttl(now) {
                continue;
            }
            let Some(item) = self.repository.get_item(&clarification.item_id).await? else {
                warn!(
                    "Clarification {} refers to missing item {}",
                    clarification.id, clarification.item_id
                );
                continue;
            };

            let resolved = Clarification {
                state: ClarificationState::Expired { expired_at: now },
                ..clarification
            };
            let next = reopen_stage(&item, &resolved, now);
            let commit = ItemCommit::new(item.version, next)
                .with_clarification(ClarificationWrite::Resolve(resolved.clone()));

            match self.repository.commit(commit).await? {
                CommitOutcome::Committed => {
                    info!("Clarification {} for {} expired", resolved.id, item.id);
                    self.notifications.dispatch(
                        Channel::Updates,
                        format!(
                            "Question about \"{}\" expired unanswered; the {} agent will run again",
                            item.title,
                            resolved.agent.display_name().to_lowercase()
                        ),
                    );
                    expired.push(resolved.id);
                }
                CommitOutcome::Conflict => {
                    debug!("Expiry of {} raced another write", resolved.id)
                }
            }
        }
        Ok(expired)
    }
}

/// The item after a clarification is resolved: if it is still waiting on that
/// question, the stage agent becomes due again.
fn reopen_stage(item: &WorkItem, clarification: &Clarification, now: DateTime<Utc>) -> WorkItem {
    let mut next = item.clone();
    next.version += 1;
    next.updated_at = now;
    if item.review_status == Some(ReviewStatus::WaitingForClarification)
        && item.agent_stage() == Some(clarification.agent)
    {
        next.review_status = None;
    }
    next
}

fn review_feedback(summary: &str, comments: &[ReviewComment]) -> String {
    let mut feedback = summary.trim().to_string();
    for comment in comments {
        let location = match (&comment.path, comment.line) {
            (Some(path), Some(line)) => format!("{}:{}: ", path, line),
            (Some(path), None) => format!("{}: ", path),
            _ => String::new(),
        };
        feedback.push_str(&format!("\n- {}{}", location, comment.body));
    }
    feedback
}

/// Comment announcing an artifact on the item's issue or pull request.
fn artifact_comment(item: &WorkItem, artifact: &Artifact) -> Option<Effect> {
    match &artifact.body {
        ArtifactBody::Design { document } => item.issue_number.map(|issue| Effect::PostComment {
            target: CommentTarget::Issue(issue),
            body: format!("## {}\n\n{}", artifact.agent.display_name(), document),
        }),
        ArtifactBody::Review {
            verdict,
            summary,
            comments,
        } => item.pr_number.map(|pr| {
            let verdict = match verdict {
                ReviewVerdict::Approve => "approved",
                ReviewVerdict::RequestChanges => "changes requested",
            };
            Effect::PostComment {
                target: CommentTarget::PullRequest(pr),
                body: format!(
                    "## Automated review: {}\n\n{}",
                    verdict,
                    review_feedback(summary, comments)
                ),
            }
        }),
        ArtifactBody::Implementation { .. } => None,
    }
}
