//! Domain types for the workflow pipeline.
//!
//! A [`WorkItem`] moves through a fixed set of [`WorkItemStatus`] values. Each
//! status change is recorded as a [`StatusTransition`], agent output is kept as
//! immutable [`Artifact`]s, and questions an agent raises for a human are
//! tracked as [`Clarification`]s.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a work item.
    WorkItemId
);
string_id!(
    /// Identifier of an artifact.
    ArtifactId
);
string_id!(
    /// Identifier of a status transition record.
    TransitionId
);
string_id!(
    /// Identifier of a clarification question.
    ClarificationId
);

/// Error returned when parsing one of the enums below from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// What sort of work an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    Feature,
    Bug,
}

impl WorkItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
        }
    }
}

impl fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkItemKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            _ => Err(ParseEnumError {
                kind: "work item kind",
                value: s.to_string(),
            }),
        }
    }
}

/// Pipeline stage of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Backlog,
    ProductDesign,
    TechDesign,
    Implementation,
    Review,
    Done,
    Reverted,
}

impl WorkItemStatus {
    pub const ALL: [WorkItemStatus; 7] = [
        Self::Backlog,
        Self::ProductDesign,
        Self::TechDesign,
        Self::Implementation,
        Self::Review,
        Self::Done,
        Self::Reverted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::ProductDesign => "product_design",
            Self::TechDesign => "tech_design",
            Self::Implementation => "implementation",
            Self::Review => "review",
            Self::Done => "done",
            Self::Reverted => "reverted",
        }
    }

    /// Whether this status is one of the two design stages.
    pub fn is_design(&self) -> bool {
        matches!(self, Self::ProductDesign | Self::TechDesign)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkItemStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                kind: "work item status",
                value: s.to_string(),
            })
    }
}

/// Review state of the current stage's output, mirrored from the board's
/// "Review Status" field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    WaitingForReview,
    Approved,
    ChangesRequested,
    Rejected,
    WaitingForClarification,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForReview => "waiting_for_review",
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
            Self::Rejected => "rejected",
            Self::WaitingForClarification => "waiting_for_clarification",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "waiting_for_review" => Ok(Self::WaitingForReview),
            "approved" => Ok(Self::Approved),
            "changes_requested" => Ok(Self::ChangesRequested),
            "rejected" => Ok(Self::Rejected),
            "waiting_for_clarification" => Ok(Self::WaitingForClarification),
            _ => Err(ParseEnumError {
                kind: "review status",
                value: s.to_string(),
            }),
        }
    }
}

/// The LLM-backed agent that performs one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStage {
    ProductDesign,
    TechDesign,
    BugInvestigation,
    Implementation,
    PrReview,
}

impl AgentStage {
    /// The agent that works on an item of `kind` while it sits in `status`.
    ///
    /// Bugs skip product design; their technical stage is an investigation.
    pub fn for_item(kind: WorkItemKind, status: WorkItemStatus) -> Option<Self> {
        match (kind, status) {
            (WorkItemKind::Feature, WorkItemStatus::ProductDesign) => Some(Self::ProductDesign),
            (WorkItemKind::Feature, WorkItemStatus::TechDesign) => Some(Self::TechDesign),
            (WorkItemKind::Bug, WorkItemStatus::TechDesign) => Some(Self::BugInvestigation),
            (_, WorkItemStatus::Implementation) => Some(Self::Implementation),
            (_, WorkItemStatus::Review) => Some(Self::PrReview),
            _ => None,
        }
    }

    /// The status an item is in while this agent runs.
    pub fn status(&self) -> WorkItemStatus {
        match self {
            Self::ProductDesign => WorkItemStatus::ProductDesign,
            Self::TechDesign | Self::BugInvestigation => WorkItemStatus::TechDesign,
            Self::Implementation => WorkItemStatus::Implementation,
            Self::PrReview => WorkItemStatus::Review,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductDesign => "product_design",
            Self::TechDesign => "tech_design",
            Self::BugInvestigation => "bug_investigation",
            Self::Implementation => "implementation",
            Self::PrReview => "pr_review",
        }
    }

    /// Human-readable name for comments and notifications.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ProductDesign => "Product design",
            Self::TechDesign => "Technical design",
            Self::BugInvestigation => "Bug investigation",
            Self::Implementation => "Implementation",
            Self::PrReview => "PR review",
        }
    }

    /// Whether this agent produces a design document.
    pub fn produces_design(&self) -> bool {
        matches!(
            self,
            Self::ProductDesign | Self::TechDesign | Self::BugInvestigation
        )
    }
}

impl fmt::Display for AgentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "product_design" => Ok(Self::ProductDesign),
            "tech_design" => Ok(Self::TechDesign),
            "bug_investigation" => Ok(Self::BugInvestigation),
            "implementation" => Ok(Self::Implementation),
            "pr_review" => Ok(Self::PrReview),
            _ => Err(ParseEnumError {
                kind: "agent stage",
                value: s.to_string(),
            }),
        }
    }
}

/// Who requested a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Agent,
    Human,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Human => "human",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actor {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "human" => Ok(Self::Human),
            _ => Err(ParseEnumError {
                kind: "actor",
                value: s.to_string(),
            }),
        }
    }
}

/// A trackable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub kind: WorkItemKind,
    pub title: String,
    pub description: String,
    /// GitHub issue backing this item.
    pub issue_number: Option<u64>,
    /// Node ID of the item on the project board.
    pub project_item_id: Option<String>,
    pub status: WorkItemStatus,
    pub review_status: Option<ReviewStatus>,
    /// Feedback to hand to the next agent run (change requests, rejection reasons).
    pub feedback: Option<String>,
    /// Implementation pull request.
    pub pr_number: Option<u64>,
    pub commit_message: Option<String>,
    pub merge_commit_sha: Option<String>,
    pub revert_pr_number: Option<u64>,
    /// Last status successfully written to the project board.
    pub mirrored_status: Option<WorkItemStatus>,
    /// Optimistic-concurrency counter, bumped on every workflow mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a new item in `Backlog`.
    pub fn new(
        kind: WorkItemKind,
        title: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkItemId::generate(),
            kind,
            title: title.into(),
            description: description.into(),
            issue_number: None,
            project_item_id: None,
            status: WorkItemStatus::Backlog,
            review_status: None,
            feedback: None,
            pr_number: None,
            commit_message: None,
            merge_commit_sha: None,
            revert_pr_number: None,
            mirrored_status: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The agent responsible for the item's current status, if any.
    pub fn agent_stage(&self) -> Option<AgentStage> {
        AgentStage::for_item(self.kind, self.status)
    }

    /// Whether the stage agent should run for this item.
    ///
    /// An item is due when its status has an agent and the agent has either
    /// not produced output yet or been asked for changes.
    pub fn is_due(&self) -> bool {
        self.agent_stage().is_some()
            && matches!(self.review_status, None | Some(ReviewStatus::ChangesRequested))
    }

    /// Whether the board needs to be told about the current status.
    pub fn needs_mirror(&self) -> bool {
        self.mirrored_status != Some(self.status)
    }
}

/// Verdict of a PR review agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approve,
    RequestChanges,
}

/// A single review remark, optionally anchored to a file location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub body: String,
}

/// Stage-specific content of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactBody {
    Design {
        document: String,
    },
    Implementation {
        summary: String,
        diff: String,
        commit_message: String,
    },
    Review {
        verdict: ReviewVerdict,
        summary: String,
        comments: Vec<ReviewComment>,
    },
}

impl ArtifactBody {
    /// Whether this body is the right shape for `stage`.
    pub fn matches_stage(&self, stage: AgentStage) -> bool {
        match self {
            Self::Design { .. } => stage.produces_design(),
            Self::Implementation { .. } => stage == AgentStage::Implementation,
            Self::Review { .. } => stage == AgentStage::PrReview,
        }
    }
}

/// Immutable output of an agent stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub item_id: WorkItemId,
    /// Status of the item when the artifact was written.
    pub stage: WorkItemStatus,
    pub agent: AgentStage,
    pub body: ArtifactBody,
    /// The earlier artifact from the same agent that this one replaces.
    pub supersedes: Option<ArtifactId>,
    pub created_at: DateTime<Utc>,
}

/// Fieldless name of an operation, as stored in the transition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Approve,
    ReviewDesign,
    MergeDesignPR,
    SubmitImplementationPR,
    RequestChangesOnPR,
    MergeImplementationPR,
    RevertMerge,
    MergeRevertPR,
    UndoStatusChange,
}

impl OperationKind {
    pub const ALL: [OperationKind; 9] = [
        Self::Approve,
        Self::ReviewDesign,
        Self::MergeDesignPR,
        Self::SubmitImplementationPR,
        Self::RequestChangesOnPR,
        Self::MergeImplementationPR,
        Self::RevertMerge,
        Self::MergeRevertPR,
        Self::UndoStatusChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::ReviewDesign => "reviewDesign",
            Self::MergeDesignPR => "mergeDesignPR",
            Self::SubmitImplementationPR => "submitImplementationPR",
            Self::RequestChangesOnPR => "requestChangesOnPR",
            Self::MergeImplementationPR => "mergeImplementationPR",
            Self::RevertMerge => "revertMerge",
            Self::MergeRevertPR => "mergeRevertPR",
            Self::UndoStatusChange => "undoStatusChange",
        }
    }

    /// Whether a transition made by this operation may be undone with
    /// `undoStatusChange`. Merges touch the repository and are reverted with
    /// `revertMerge` instead.
    pub fn is_undoable(&self) -> bool {
        matches!(
            self,
            Self::Approve
                | Self::ReviewDesign
                | Self::SubmitImplementationPR
                | Self::RequestChangesOnPR
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                kind: "operation",
                value: s.to_string(),
            })
    }
}

/// Human decision on a design document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DesignDecision {
    Approve,
    RequestChanges { feedback: String },
    Reject { reason: String },
}

/// A requested workflow operation with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum Operation {
    Approve,
    ReviewDesign {
        #[serde(flatten)]
        decision: DesignDecision,
    },
    #[serde(rename = "mergeDesignPR")]
    MergeDesignPR { pr_number: u64 },
    #[serde(rename = "submitImplementationPR")]
    SubmitImplementationPR { pr_number: u64 },
    #[serde(rename = "requestChangesOnPR")]
    RequestChangesOnPR { feedback: String },
    #[serde(rename = "mergeImplementationPR")]
    MergeImplementationPR {
        #[serde(default)]
        commit_message: Option<String>,
    },
    RevertMerge,
    #[serde(rename = "mergeRevertPR")]
    MergeRevertPR,
    UndoStatusChange,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Approve => OperationKind::Approve,
            Self::ReviewDesign { .. } => OperationKind::ReviewDesign,
            Self::MergeDesignPR { .. } => OperationKind::MergeDesignPR,
            Self::SubmitImplementationPR { .. } => OperationKind::SubmitImplementationPR,
            Self::RequestChangesOnPR { .. } => OperationKind::RequestChangesOnPR,
            Self::MergeImplementationPR { .. } => OperationKind::MergeImplementationPR,
            Self::RevertMerge => OperationKind::RevertMerge,
            Self::MergeRevertPR => OperationKind::MergeRevertPR,
            Self::UndoStatusChange => OperationKind::UndoStatusChange,
        }
    }
}

/// Append-only record of one status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: TransitionId,
    pub item_id: WorkItemId,
    /// Position in the item's log, starting at 1.
    pub sequence: u64,
    pub from: WorkItemStatus,
    pub to: WorkItemStatus,
    pub operation: OperationKind,
    pub actor: Actor,
    pub reason: Option<String>,
    /// The transition this one reverses, for undo records.
    pub compensates: Option<TransitionId>,
    pub recorded_at: DateTime<Utc>,
}

/// Question and options an agent wants a human to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub question: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Lifecycle of a clarification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClarificationState {
    Pending,
    Answered {
        answer: String,
        answered_at: DateTime<Utc>,
    },
    Expired {
        expired_at: DateTime<Utc>,
    },
}

impl ClarificationState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered { .. } => "answered",
            Self::Expired { .. } => "expired",
        }
    }
}

/// A question posed by an agent to a human, answered through a tokenised link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub id: ClarificationId,
    pub item_id: WorkItemId,
    pub agent: AgentStage,
    pub question: String,
    pub context: String,
    pub options: Vec<String>,
    /// Keyed hash of the answer token; the token itself is never stored.
    pub token_hash: String,
    pub state: ClarificationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Clarification {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, ClarificationState::Pending)
    }

    /// Whether the token TTL has elapsed at `now`.
    pub fn is_past_ttl(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn answer(&self) -> Option<&str> {
        match &self.state {
            ClarificationState::Answered { answer, .. } => Some(answer),
            _ => None,
        }
    }
}
