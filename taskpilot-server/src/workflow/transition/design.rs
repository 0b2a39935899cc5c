//! ProductDesign and TechDesign transitions.

use taskpilot_core::{Artifact, DesignDecision, Operation, WorkItemStatus};

use super::{
    ExternalAction, MergeMethod, TransitionContext, TransitionError, TransitionPlan,
};

/// The stage a design hands over to once accepted.
fn next_stage(status: WorkItemStatus) -> WorkItemStatus {
    match status {
        WorkItemStatus::ProductDesign => WorkItemStatus::TechDesign,
        _ => WorkItemStatus::Implementation,
    }
}

fn require_design<'a>(ctx: &TransitionContext<'a>) -> Result<&'a Artifact, TransitionError> {
    ctx.current_design()
        .ok_or_else(|| TransitionError::missing(format!("{} document", ctx.item.status)))
}

pub fn plan(
    ctx: &TransitionContext<'_>,
    operation: &Operation,
) -> Result<TransitionPlan, TransitionError> {
    let status = ctx.item.status;
    match operation {
        Operation::ReviewDesign { decision } => match decision {
            DesignDecision::Approve => {
                require_design(ctx)?;
                Ok(TransitionPlan::status_change(operation, next_stage(status)))
            }
            DesignDecision::RequestChanges { .. } => {
                require_design(ctx)?;
                Ok(TransitionPlan::review_update(operation))
            }
            DesignDecision::Reject { .. } => Ok(TransitionPlan::status_change(
                operation,
                WorkItemStatus::Backlog,
            )),
        },
        Operation::MergeDesignPR { pr_number } => {
            require_design(ctx)?;
            Ok(
                TransitionPlan::status_change(operation, next_stage(status)).with_external(
                    ExternalAction::MergePullRequest {
                        pr_number: *pr_number,
                        method: MergeMethod::Squash,
                        commit_title: Some(format!(
                            "docs: {} for {}",
                            status, ctx.item.title
                        )),
                        commit_message: None,
                    },
                ),
            )
        }
        _ => Err(TransitionError::invalid(operation, status)),
    }
}
