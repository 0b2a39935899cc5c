//! Done and Reverted transitions.

use taskpilot_core::{Operation, WorkItemStatus};

use super::{
    ExternalAction, MergeMethod, TransitionContext, TransitionError, TransitionPlan,
};

pub fn plan(
    ctx: &TransitionContext<'_>,
    operation: &Operation,
) -> Result<TransitionPlan, TransitionError> {
    let item = ctx.item;
    match (item.status, operation) {
        (WorkItemStatus::Done, Operation::RevertMerge) => {
            if item.merge_commit_sha.is_none() {
                return Err(TransitionError::missing("merge commit"));
            }
            let pr_number = item
                .pr_number
                .ok_or_else(|| TransitionError::missing("implementation pull request"))?;
            Ok(
                TransitionPlan::status_change(operation, WorkItemStatus::Reverted)
                    .with_external(ExternalAction::RevertPullRequest { pr_number }),
            )
        }
        (WorkItemStatus::Reverted, Operation::MergeRevertPR) => {
            let pr_number = item
                .revert_pr_number
                .ok_or_else(|| TransitionError::missing("revert pull request"))?;
            Ok(
                TransitionPlan::status_change(operation, WorkItemStatus::Implementation)
                    .with_external(ExternalAction::MergePullRequest {
                        pr_number,
                        method: MergeMethod::Merge,
                        commit_title: None,
                        commit_message: None,
                    }),
            )
        }
        _ => Err(TransitionError::invalid(operation, item.status)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{apply, ExternalOutcome};
    use super::*;
    use taskpilot_core::{Actor, OperationKind, WorkItemKind};

    fn merged_item() -> taskpilot_core::WorkItem {
        let mut item = item_in(WorkItemKind::Feature, WorkItemStatus::Done);
        item.pr_number = Some(5);
        item.merge_commit_sha = Some("deadbeef".to_string());
        item.commit_message = Some("feat: add CSV export".to_string());
        item
    }

    #[test]
    fn test_revert_opens_revert_pr() {
        let item = merged_item();
        let ctx = ctx(&item, &[]);
        let plan = plan(&ctx, &Operation::RevertMerge).unwrap();
        assert_eq!(
            plan.external,
            Some(ExternalAction::RevertPullRequest { pr_number: 5 })
        );

        let outcome = ExternalOutcome::RevertOpened { pr_number: 6 };
        let result = apply(&ctx, &plan, Actor::Human, Some(&outcome));
        assert_eq!(result.item.status, WorkItemStatus::Reverted);
        assert_eq!(result.item.revert_pr_number, Some(6));
        assert_eq!(result.item.merge_commit_sha.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_revert_needs_a_merge() {
        let mut item = merged_item();
        item.merge_commit_sha = None;
        assert_eq!(
            plan(&ctx(&item, &[]), &Operation::RevertMerge),
            Err(TransitionError::MissingArtifact {
                what: "merge commit".to_string()
            })
        );
    }

    #[test]
    fn test_merging_the_revert_reopens_implementation() {
        let mut item = merged_item();
        item.status = WorkItemStatus::Reverted;
        item.revert_pr_number = Some(6);
        let ctx = ctx(&item, &[]);

        let plan = plan(&ctx, &Operation::MergeRevertPR).unwrap();
        assert_eq!(
            plan.external,
            Some(ExternalAction::MergePullRequest {
                pr_number: 6,
                method: MergeMethod::Merge,
                commit_title: None,
                commit_message: None,
            })
        );

        let outcome = ExternalOutcome::Merged {
            sha: "cafe".to_string(),
        };
        let result = apply(&ctx, &plan, Actor::Human, Some(&outcome));
        assert_eq!(result.item.status, WorkItemStatus::Implementation);
        assert_eq!(result.item.pr_number, None);
        assert_eq!(result.item.merge_commit_sha, None);
        assert_eq!(result.item.revert_pr_number, None);
        assert!(result.item.is_due());
    }

    #[test]
    fn test_done_items_cannot_be_approved() {
        let item = merged_item();
        assert_eq!(
            plan(&ctx(&item, &[]), &Operation::Approve),
            Err(TransitionError::InvalidTransition {
                operation: OperationKind::Approve,
                status: WorkItemStatus::Done,
            })
        );
    }
}
