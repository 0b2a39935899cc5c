//! Pure transition functions.
//!
//! [`plan`] checks an operation against the current item and decides what has
//! to happen: the target status, and any repository action (a merge or a
//! revert) that must succeed before anything is committed. [`apply`] then
//! builds the updated item, its transition record and the effects to run after
//! commit. Neither function touches storage or the network.
//!
//! Each group of statuses has its own handler module with co-located tests:
//! - `backlog`: Backlog
//! - `design`: ProductDesign and TechDesign
//! - `implementation`: Implementation and Review
//! - `release`: Done and Reverted
//! - `undo`: `undoStatusChange`, from any status

mod backlog;
mod design;
mod implementation;
mod release;
mod undo;

pub use undo::undo_target;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use taskpilot_core::{
    Actor, Artifact, ArtifactBody, DesignDecision, Operation, OperationKind, ReviewStatus,
    StatusTransition, TransitionId, WorkItem, WorkItemStatus,
};

use super::effect::{Effect, LogLevel};
use crate::notify::Channel;
use crate::project::CommentTarget;

/// Everything the pure functions need to know about an item.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub item: &'a WorkItem,
    /// The item's artifacts, oldest first.
    pub artifacts: &'a [Artifact],
    pub last_transition: Option<&'a StatusTransition>,
    /// The transition before `last_transition`.
    pub previous_transition: Option<&'a StatusTransition>,
    pub now: DateTime<Utc>,
    pub undo_window: Duration,
}

impl<'a> TransitionContext<'a> {
    /// Latest design document written in the item's current status.
    pub fn current_design(&self) -> Option<&'a Artifact> {
        self.artifacts.iter().rev().find(|artifact| {
            artifact.stage == self.item.status
                && matches!(artifact.body, ArtifactBody::Design { .. })
        })
    }

    /// Whether the stage agent has output waiting for review in the current
    /// round of the item's current status.
    pub fn has_pending_output(&self) -> bool {
        self.item.review_status == Some(ReviewStatus::WaitingForReview)
    }

    /// Latest implementation artifact, from any attempt.
    pub fn latest_implementation(&self) -> Option<&'a Artifact> {
        self.artifacts
            .iter()
            .rev()
            .find(|artifact| matches!(artifact.body, ArtifactBody::Implementation { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("operation {operation} is not allowed while the item is in {status}")]
    InvalidTransition {
        operation: OperationKind,
        status: WorkItemStatus,
    },

    #[error("missing {what}")]
    MissingArtifact { what: String },
}

impl TransitionError {
    pub(crate) fn invalid(operation: &Operation, status: WorkItemStatus) -> Self {
        Self::InvalidTransition {
            operation: operation.kind(),
            status,
        }
    }

    pub(crate) fn missing(what: impl Into<String>) -> Self {
        Self::MissingArtifact { what: what.into() }
    }
}

/// How a pull request is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Merge,
    Squash,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
        }
    }
}

/// Repository action that must succeed before the transition is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalAction {
    MergePullRequest {
        pr_number: u64,
        method: MergeMethod,
        commit_title: Option<String>,
        commit_message: Option<String>,
    },
    RevertPullRequest {
        pr_number: u64,
    },
}

/// What an [`ExternalAction`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalOutcome {
    Merged { sha: String },
    RevertOpened { pr_number: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTarget {
    /// Move to a new status and append a transition record.
    StatusChange { to: WorkItemStatus },
    /// Stay in the current status; only review fields change.
    ReviewUpdate,
}

/// Outcome of a successful [`plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub operation: Operation,
    pub target: PlanTarget,
    pub external: Option<ExternalAction>,
    /// Transition reversed by this one.
    pub compensates: Option<TransitionId>,
}

impl TransitionPlan {
    pub(crate) fn status_change(operation: &Operation, to: WorkItemStatus) -> Self {
        Self {
            operation: operation.clone(),
            target: PlanTarget::StatusChange { to },
            external: None,
            compensates: None,
        }
    }

    pub(crate) fn review_update(operation: &Operation) -> Self {
        Self {
            operation: operation.clone(),
            target: PlanTarget::ReviewUpdate,
            external: None,
            compensates: None,
        }
    }

    pub(crate) fn with_external(mut self, action: ExternalAction) -> Self {
        self.external = Some(action);
        self
    }

    /// Status the item ends in.
    pub fn target_status(&self, current: WorkItemStatus) -> WorkItemStatus {
        match self.target {
            PlanTarget::StatusChange { to } => to,
            PlanTarget::ReviewUpdate => current,
        }
    }
}

/// Result of [`apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    /// The item to commit, with its version bumped.
    pub item: WorkItem,
    pub transition: Option<StatusTransition>,
    /// Effects to execute after commit.
    pub effects: Vec<Effect>,
}

/// Check `operation` against the item and decide what it does.
pub fn plan(
    ctx: &TransitionContext<'_>,
    operation: &Operation,
) -> Result<TransitionPlan, TransitionError> {
    if matches!(operation, Operation::UndoStatusChange) {
        return undo::plan(ctx);
    }

    match ctx.item.status {
        WorkItemStatus::Backlog => backlog::plan(ctx, operation),
        WorkItemStatus::ProductDesign | WorkItemStatus::TechDesign => design::plan(ctx, operation),
        WorkItemStatus::Implementation | WorkItemStatus::Review => {
            implementation::plan(ctx, operation)
        }
        WorkItemStatus::Done | WorkItemStatus::Reverted => release::plan(ctx, operation),
    }
}

/// Build the committed form of a planned transition.
///
/// `outcome` is whatever the plan's external action returned.
pub fn apply(
    ctx: &TransitionContext<'_>,
    plan: &TransitionPlan,
    actor: Actor,
    outcome: Option<&ExternalOutcome>,
) -> TransitionResult {
    let item = ctx.item;
    let mut next = item.clone();
    next.version += 1;
    next.updated_at = ctx.now;

    let mut effects = Vec::new();

    match &plan.operation {
        Operation::Approve => {
            next.review_status = None;
        }
        Operation::ReviewDesign { decision } => match decision {
            DesignDecision::Approve => {
                next.review_status = None;
                next.feedback = None;
            }
            DesignDecision::RequestChanges { feedback } => {
                next.review_status = Some(ReviewStatus::ChangesRequested);
                next.feedback = Some(feedback.clone());
                if let Some(issue) = item.issue_number {
                    effects.push(Effect::PostComment {
                        target: CommentTarget::Issue(issue),
                        body: format!(
                            "Changes requested on the {} document:\n\n{}",
                            item.status, feedback
                        ),
                    });
                }
            }
            DesignDecision::Reject { reason } => {
                next.review_status = Some(ReviewStatus::Rejected);
                next.feedback = Some(reason.clone());
                if let Some(issue) = item.issue_number {
                    effects.push(Effect::PostComment {
                        target: CommentTarget::Issue(issue),
                        body: format!("Design rejected:\n\n{}", reason),
                    });
                }
            }
        },
        Operation::MergeDesignPR { .. } => {
            next.review_status = None;
            next.feedback = None;
        }
        Operation::SubmitImplementationPR { pr_number } => {
            next.pr_number = Some(*pr_number);
            next.review_status = None;
            next.feedback = None;
        }
        Operation::RequestChangesOnPR { feedback } => {
            next.review_status = Some(ReviewStatus::ChangesRequested);
            next.feedback = Some(feedback.clone());
            if let (Actor::Human, Some(pr)) = (actor, item.pr_number) {
                effects.push(Effect::PostComment {
                    target: CommentTarget::PullRequest(pr),
                    body: format!("Changes requested:\n\n{}", feedback),
                });
            }
        }
        Operation::MergeImplementationPR { commit_message } => {
            next.review_status = None;
            next.commit_message =
                implementation::resolve_commit_message(ctx, commit_message.as_deref());
            if let Some(ExternalOutcome::Merged { sha }) = outcome {
                next.merge_commit_sha = Some(sha.clone());
                effects.push(Effect::Notify {
                    channel: Channel::Updates,
                    message: format!("Merged \"{}\" as {}", item.title, sha),
                });
            }
        }
        Operation::RevertMerge => {
            next.review_status = None;
            if let Some(ExternalOutcome::RevertOpened { pr_number }) = outcome {
                next.revert_pr_number = Some(*pr_number);
            }
        }
        Operation::MergeRevertPR => {
            next.review_status = None;
            next.pr_number = None;
            next.merge_commit_sha = None;
            next.revert_pr_number = None;
        }
        Operation::UndoStatusChange => {
            let restored = plan.target_status(item.status);
            next.review_status = undo::restored_review_status(ctx, restored);
            next.feedback = None;
        }
    }

    let transition = match plan.target {
        PlanTarget::StatusChange { to } => {
            next.status = to;
            effects.push(Effect::MirrorStatus { status: to });
            effects.push(Effect::Notify {
                channel: Channel::Updates,
                message: format!(
                    "\"{}\" moved from {} to {} ({})",
                    item.title,
                    item.status,
                    to,
                    plan.operation.kind()
                ),
            });
            Some(StatusTransition {
                id: TransitionId::generate(),
                item_id: item.id.clone(),
                sequence: ctx.last_transition.map_or(0, |t| t.sequence) + 1,
                from: item.status,
                to,
                operation: plan.operation.kind(),
                actor,
                reason: transition_reason(&plan.operation),
                compensates: plan.compensates.clone(),
                recorded_at: ctx.now,
            })
        }
        PlanTarget::ReviewUpdate => None,
    };

    effects.push(Effect::Log {
        level: LogLevel::Info,
        message: format!(
            "{}: {} by {} ({} -> {})",
            item.id,
            plan.operation.kind(),
            actor,
            item.status,
            next.status
        ),
    });

    TransitionResult {
        item: next,
        transition,
        effects,
    }
}

fn transition_reason(operation: &Operation) -> Option<String> {
    match operation {
        Operation::ReviewDesign {
            decision: DesignDecision::Reject { reason },
        } => Some(reason.clone()),
        Operation::RequestChangesOnPR { feedback } => Some(feedback.clone()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;
    use taskpilot_core::{AgentStage, ArtifactId, WorkItemKind};

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()
    }

    pub fn item_in(kind: WorkItemKind, status: WorkItemStatus) -> WorkItem {
        let mut item = WorkItem::new(kind, "Export CSV", "Users want CSV", now());
        item.status = status;
        item.issue_number = Some(42);
        item.project_item_id = Some("PVTI_42".to_string());
        item
    }

    pub fn artifact(item: &WorkItem, agent: AgentStage, body: ArtifactBody) -> Artifact {
        Artifact {
            id: ArtifactId::generate(),
            item_id: item.id.clone(),
            stage: item.status,
            agent,
            body,
            supersedes: None,
            created_at: now(),
        }
    }

    pub fn design(item: &WorkItem) -> Artifact {
        let agent = item.agent_stage().unwrap_or(AgentStage::ProductDesign);
        artifact(
            item,
            agent,
            ArtifactBody::Design {
                document: "# Plan".to_string(),
            },
        )
    }

    pub fn implementation(item: &WorkItem) -> Artifact {
        artifact(
            item,
            AgentStage::Implementation,
            ArtifactBody::Implementation {
                summary: "Adds CSV export".to_string(),
                diff: "+csv".to_string(),
                commit_message: "feat: add CSV export\n\nStreams rows.".to_string(),
            },
        )
    }

    pub fn ctx<'a>(item: &'a WorkItem, artifacts: &'a [Artifact]) -> TransitionContext<'a> {
        TransitionContext {
            item,
            artifacts,
            last_transition: None,
            previous_transition: None,
            now: now(),
            undo_window: Duration::minutes(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use proptest::prelude::*;
    use taskpilot_core::WorkItemKind;

    /// Every status change the workflow may ever make.
    fn legal_edge(from: WorkItemStatus, to: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        matches!(
            (from, to),
            (Backlog, ProductDesign)
                | (Backlog, TechDesign)
                | (ProductDesign, TechDesign)
                | (TechDesign, Implementation)
                | (ProductDesign, Backlog)
                | (TechDesign, Backlog)
                | (Implementation, Review)
                | (Review, Implementation)
                | (Review, Done)
                | (Done, Reverted)
                | (Reverted, Implementation)
        )
    }

    fn any_status() -> impl Strategy<Value = WorkItemStatus> {
        prop::sample::select(WorkItemStatus::ALL.to_vec())
    }

    fn any_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::Approve),
            Just(Operation::ReviewDesign {
                decision: DesignDecision::Approve
            }),
            Just(Operation::ReviewDesign {
                decision: DesignDecision::RequestChanges {
                    feedback: "more".to_string()
                }
            }),
            Just(Operation::ReviewDesign {
                decision: DesignDecision::Reject {
                    reason: "no".to_string()
                }
            }),
            (1u64..100).prop_map(|pr_number| Operation::MergeDesignPR { pr_number }),
            (1u64..100).prop_map(|pr_number| Operation::SubmitImplementationPR { pr_number }),
            Just(Operation::RequestChangesOnPR {
                feedback: "fix".to_string()
            }),
            Just(Operation::MergeImplementationPR {
                commit_message: None
            }),
            Just(Operation::RevertMerge),
            Just(Operation::MergeRevertPR),
        ]
    }

    proptest! {
        #[test]
        fn plans_only_follow_legal_edges(
            status in any_status(),
            is_bug in any::<bool>(),
            operation in any_operation(),
        ) {
            let kind = if is_bug { WorkItemKind::Bug } else { WorkItemKind::Feature };
            let mut item = item_in(kind, status);
            item.pr_number = Some(9);
            item.merge_commit_sha = Some("abc".to_string());
            item.revert_pr_number = Some(10);
            item.review_status = Some(ReviewStatus::WaitingForReview);
            let artifacts = vec![design(&item), implementation(&item)];
            let ctx = ctx(&item, &artifacts);

            if let Ok(plan) = plan(&ctx, &operation) {
                match plan.target {
                    PlanTarget::StatusChange { to } => {
                        prop_assert!(legal_edge(status, to), "{:?} -> {:?}", status, to);
                    }
                    PlanTarget::ReviewUpdate => prop_assert!(status.is_design()),
                }
                let result = apply(&ctx, &plan, Actor::Human, None);
                prop_assert_eq!(result.item.version, item.version + 1);
                prop_assert_eq!(result.transition.is_some(), result.item.status != status);
            }
        }
    }

    #[test]
    fn test_apply_records_sequence_after_last_transition() {
        let item = item_in(WorkItemKind::Feature, WorkItemStatus::Backlog);
        let previous = StatusTransition {
            id: TransitionId::generate(),
            item_id: item.id.clone(),
            sequence: 4,
            from: WorkItemStatus::ProductDesign,
            to: WorkItemStatus::Backlog,
            operation: OperationKind::ReviewDesign,
            actor: Actor::Human,
            reason: Some("no".to_string()),
            compensates: None,
            recorded_at: now(),
        };
        let ctx = TransitionContext {
            last_transition: Some(&previous),
            ..ctx(&item, &[])
        };

        let plan = plan(&ctx, &Operation::Approve).unwrap();
        let result = apply(&ctx, &plan, Actor::Human, None);
        let transition = result.transition.unwrap();

        assert_eq!(transition.sequence, 5);
        assert_eq!(transition.from, WorkItemStatus::Backlog);
        assert_eq!(transition.to, WorkItemStatus::ProductDesign);
        assert_eq!(transition.recorded_at, now());
        assert_eq!(result.item.updated_at, now());
        assert!(result
            .effects
            .contains(&Effect::MirrorStatus {
                status: WorkItemStatus::ProductDesign
            }));
    }

    #[test]
    fn test_status_change_notification_text() {
        let item = item_in(WorkItemKind::Feature, WorkItemStatus::Backlog);
        let ctx = ctx(&item, &[]);
        let plan = plan(&ctx, &Operation::Approve).unwrap();
        let result = apply(&ctx, &plan, Actor::Human, None);
        let messages: Vec<_> = result
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Notify { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect();
        insta::assert_debug_snapshot!(messages, @r###"
        [
            "\"Export CSV\" moved from backlog to product_design (approve)",
        ]
        "###);
    }
}
