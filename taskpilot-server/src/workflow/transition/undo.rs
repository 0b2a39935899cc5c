//! `undoStatusChange`.
//!
//! Undo never deletes history: it appends a compensating record that moves the
//! item back to where the latest transition started.

use taskpilot_core::{AgentStage, Operation, ReviewStatus, WorkItemStatus};

use super::{PlanTarget, TransitionContext, TransitionError, TransitionPlan};

pub fn plan(ctx: &TransitionContext<'_>) -> Result<TransitionPlan, TransitionError> {
    let invalid = || TransitionError::invalid(&Operation::UndoStatusChange, ctx.item.status);

    let last = ctx.last_transition.ok_or_else(invalid)?;
    let in_window = ctx.now <= last.recorded_at + ctx.undo_window;
    if last.to != ctx.item.status || !last.operation.is_undoable() || !in_window {
        return Err(invalid());
    }

    Ok(TransitionPlan {
        operation: Operation::UndoStatusChange,
        target: PlanTarget::StatusChange { to: last.from },
        external: None,
        compensates: Some(last.id.clone()),
    })
}

/// Review state to restore along with `restored`.
///
/// The restored stage is only back under review if its agent produced output
/// between entering it and the transition being undone. A design rejected
/// before the agent wrote anything leaves the stage due again.
pub(super) fn restored_review_status(
    ctx: &TransitionContext<'_>,
    restored: WorkItemStatus,
) -> Option<ReviewStatus> {
    AgentStage::for_item(ctx.item.kind, restored)?;
    let entered = ctx.previous_transition.map(|t| t.recorded_at);
    let left = ctx.last_transition.map(|t| t.recorded_at);
    let produced = ctx.artifacts.iter().any(|artifact| {
        artifact.stage == restored
            && entered.map_or(true, |at| artifact.created_at >= at)
            && left.map_or(true, |at| artifact.created_at <= at)
    });
    produced.then_some(ReviewStatus::WaitingForReview)
}

/// Status an undo would restore, if one is currently possible.
pub fn undo_target(ctx: &TransitionContext<'_>) -> Option<WorkItemStatus> {
    plan(ctx).ok().map(|plan| plan.target_status(ctx.item.status))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{apply, TransitionContext};
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use taskpilot_core::{Actor, OperationKind, StatusTransition, TransitionId, WorkItemKind};

    fn approved_into_tech_design() -> (taskpilot_core::WorkItem, StatusTransition) {
        let item = item_in(WorkItemKind::Feature, WorkItemStatus::TechDesign);
        let last = StatusTransition {
            id: TransitionId::generate(),
            item_id: item.id.clone(),
            sequence: 2,
            from: WorkItemStatus::ProductDesign,
            to: WorkItemStatus::TechDesign,
            operation: OperationKind::ReviewDesign,
            actor: Actor::Human,
            reason: None,
            compensates: None,
            recorded_at: now() - Duration::minutes(2),
        };
        (item, last)
    }

    #[test]
    fn test_undo_restores_previous_status_with_compensating_record() {
        let (item, last) = approved_into_tech_design();
        let mut product_design = design(&item);
        product_design.stage = WorkItemStatus::ProductDesign;
        product_design.agent = AgentStage::ProductDesign;
        product_design.created_at = last.recorded_at - Duration::minutes(10);
        let artifacts = vec![product_design];
        let ctx = TransitionContext {
            last_transition: Some(&last),
            ..ctx(&item, &artifacts)
        };

        let plan = plan(&ctx).unwrap();
        let result = apply(&ctx, &plan, Actor::Human, None);

        assert_eq!(result.item.status, WorkItemStatus::ProductDesign);
        assert_eq!(
            result.item.review_status,
            Some(ReviewStatus::WaitingForReview)
        );
        let record = result.transition.unwrap();
        assert_eq!(record.sequence, 3);
        assert_eq!(record.from, WorkItemStatus::TechDesign);
        assert_eq!(record.to, WorkItemStatus::ProductDesign);
        assert_eq!(record.operation, OperationKind::UndoStatusChange);
        assert_eq!(record.compensates, Some(last.id.clone()));
    }

    #[test]
    fn test_undo_to_backlog_leaves_review_status_empty() {
        let item = item_in(WorkItemKind::Feature, WorkItemStatus::ProductDesign);
        let last = StatusTransition {
            id: TransitionId::generate(),
            item_id: item.id.clone(),
            sequence: 1,
            from: WorkItemStatus::Backlog,
            to: WorkItemStatus::ProductDesign,
            operation: OperationKind::Approve,
            actor: Actor::Human,
            reason: None,
            compensates: None,
            recorded_at: now(),
        };
        let ctx = TransitionContext {
            last_transition: Some(&last),
            ..ctx(&item, &[])
        };
        let result = apply(&ctx, &plan(&ctx).unwrap(), Actor::Human, None);
        assert_eq!(result.item.status, WorkItemStatus::Backlog);
        assert_eq!(result.item.review_status, None);
    }

    fn rejected_from_tech_design(
        entered_at: DateTime<Utc>,
    ) -> (taskpilot_core::WorkItem, StatusTransition, StatusTransition) {
        let item = item_in(WorkItemKind::Bug, WorkItemStatus::Backlog);
        let approved = StatusTransition {
            id: TransitionId::generate(),
            item_id: item.id.clone(),
            sequence: 1,
            from: WorkItemStatus::Backlog,
            to: WorkItemStatus::TechDesign,
            operation: OperationKind::Approve,
            actor: Actor::Human,
            reason: None,
            compensates: None,
            recorded_at: entered_at,
        };
        let rejected = StatusTransition {
            id: TransitionId::generate(),
            sequence: 2,
            from: WorkItemStatus::TechDesign,
            to: WorkItemStatus::Backlog,
            operation: OperationKind::ReviewDesign,
            reason: Some("Wrong repository".to_string()),
            recorded_at: now() - Duration::minutes(1),
            ..approved.clone()
        };
        (item, approved, rejected)
    }

    #[test]
    fn test_undoing_a_reject_without_a_design_makes_the_stage_due() {
        let (item, approved, rejected) = rejected_from_tech_design(now() - Duration::minutes(3));
        let ctx = TransitionContext {
            last_transition: Some(&rejected),
            previous_transition: Some(&approved),
            ..ctx(&item, &[])
        };

        let result = apply(&ctx, &plan(&ctx).unwrap(), Actor::Human, None);

        assert_eq!(result.item.status, WorkItemStatus::TechDesign);
        assert_eq!(result.item.review_status, None);
        assert!(result.item.is_due());
    }

    #[test]
    fn test_undoing_a_reject_ignores_designs_from_earlier_rounds() {
        let (item, approved, rejected) = rejected_from_tech_design(now() - Duration::minutes(3));
        let mut old_design = design(&item);
        old_design.stage = WorkItemStatus::TechDesign;
        old_design.agent = AgentStage::TechDesign;
        old_design.created_at = approved.recorded_at - Duration::days(1);
        let mut fresh_design = old_design.clone();
        fresh_design.created_at = approved.recorded_at + Duration::minutes(1);

        let stale = [old_design.clone()];
        let ctx = TransitionContext {
            last_transition: Some(&rejected),
            previous_transition: Some(&approved),
            ..ctx(&item, &stale)
        };
        let result = apply(&ctx, &plan(&ctx).unwrap(), Actor::Human, None);
        assert_eq!(result.item.review_status, None);

        let produced = [old_design, fresh_design];
        let ctx = TransitionContext {
            artifacts: &produced,
            ..ctx
        };
        let result = apply(&ctx, &plan(&ctx).unwrap(), Actor::Human, None);
        assert_eq!(
            result.item.review_status,
            Some(ReviewStatus::WaitingForReview)
        );
    }

    #[test]
    fn test_undo_outside_window_is_invalid() {
        let (item, last) = approved_into_tech_design();
        let ctx = TransitionContext {
            last_transition: Some(&last),
            now: last.recorded_at + Duration::minutes(5) + Duration::seconds(1),
            ..ctx(&item, &[])
        };
        assert!(matches!(
            plan(&ctx),
            Err(TransitionError::InvalidTransition {
                operation: OperationKind::UndoStatusChange,
                ..
            })
        ));
        assert_eq!(undo_target(&ctx), None);
    }

    #[test]
    fn test_undo_at_window_edge_is_allowed() {
        let (item, last) = approved_into_tech_design();
        let ctx = TransitionContext {
            last_transition: Some(&last),
            now: last.recorded_at + Duration::minutes(5),
            ..ctx(&item, &[])
        };
        assert_eq!(undo_target(&ctx), Some(WorkItemStatus::ProductDesign));
    }

    #[test]
    fn test_merges_and_undos_cannot_be_undone() {
        let (item, mut last) = approved_into_tech_design();
        for operation in [
            OperationKind::MergeDesignPR,
            OperationKind::UndoStatusChange,
        ] {
            last.operation = operation;
            let ctx = TransitionContext {
                last_transition: Some(&last),
                ..ctx(&item, &[])
            };
            assert!(plan(&ctx).is_err(), "{} should not be undoable", operation);
        }
    }

    #[test]
    fn test_undo_without_history_is_invalid() {
        let item = item_in(WorkItemKind::Feature, WorkItemStatus::Backlog);
        assert!(plan(&ctx(&item, &[])).is_err());
    }
}
