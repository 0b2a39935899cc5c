//! Backlog transitions.

use taskpilot_core::{Operation, WorkItemKind, WorkItemStatus};

use super::{TransitionContext, TransitionError, TransitionPlan};

/// Approving a backlog item starts its first agent stage. Bugs skip product
/// design.
pub fn plan(
    ctx: &TransitionContext<'_>,
    operation: &Operation,
) -> Result<TransitionPlan, TransitionError> {
    match operation {
        Operation::Approve => {
            let to = match ctx.item.kind {
                WorkItemKind::Feature => WorkItemStatus::ProductDesign,
                WorkItemKind::Bug => WorkItemStatus::TechDesign,
            };
            Ok(TransitionPlan::status_change(operation, to))
        }
        _ => Err(TransitionError::invalid(operation, ctx.item.status)),
    }
}
