//! Implementation and Review transitions.

use taskpilot_core::{ArtifactBody, Operation, WorkItemStatus};

use super::{
    ExternalAction, MergeMethod, TransitionContext, TransitionError, TransitionPlan,
};

/// Commit message for the squash merge: the operator's override, else the one
/// the implementation agent wrote.
pub(super) fn resolve_commit_message(
    ctx: &TransitionContext<'_>,
    payload: Option<&str>,
) -> Option<String> {
    payload
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
        .or_else(|| ctx.item.commit_message.clone())
        .or_else(|| match ctx.latest_implementation().map(|a| &a.body) {
            Some(ArtifactBody::Implementation { commit_message, .. }) => {
                Some(commit_message.clone())
            }
            _ => None,
        })
}

/// Split a commit message into its subject line and (optional) body.
fn split_commit_message(message: &str) -> (String, Option<String>) {
    let mut parts = message.trim().splitn(2, '\n');
    let title = parts.next().unwrap_or_default().trim().to_string();
    let body = parts
        .next()
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .map(str::to_string);
    (title, body)
}

fn require_pr(ctx: &TransitionContext<'_>) -> Result<u64, TransitionError> {
    ctx.item
        .pr_number
        .ok_or_else(|| TransitionError::missing("implementation pull request"))
}

pub fn plan(
    ctx: &TransitionContext<'_>,
    operation: &Operation,
) -> Result<TransitionPlan, TransitionError> {
    let status = ctx.item.status;
    match (status, operation) {
        (WorkItemStatus::Implementation, Operation::SubmitImplementationPR { .. }) => {
            // Output from an earlier round does not count once changes have
            // been requested.
            if !ctx.has_pending_output() || ctx.latest_implementation().is_none() {
                return Err(TransitionError::missing("implementation artifact"));
            }
            Ok(TransitionPlan::status_change(
                operation,
                WorkItemStatus::Review,
            ))
        }
        (WorkItemStatus::Review, Operation::RequestChangesOnPR { .. }) => {
            require_pr(ctx)?;
            Ok(TransitionPlan::status_change(
                operation,
                WorkItemStatus::Implementation,
            ))
        }
        (WorkItemStatus::Review, Operation::MergeImplementationPR { commit_message }) => {
            let pr_number = require_pr(ctx)?;
            let message = resolve_commit_message(ctx, commit_message.as_deref())
                .ok_or_else(|| TransitionError::missing("commit message"))?;
            let (title, body) = split_commit_message(&message);
            Ok(
                TransitionPlan::status_change(operation, WorkItemStatus::Done).with_external(
                    ExternalAction::MergePullRequest {
                        pr_number,
                        method: MergeMethod::Squash,
                        commit_title: Some(title),
                        commit_message: body,
                    },
                ),
            )
        }
        _ => Err(TransitionError::invalid(operation, status)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{apply, ExternalOutcome};
    use super::*;
    use taskpilot_core::{Actor, ReviewStatus, WorkItemKind};

    #[test]
    fn test_submit_requires_implementation_output() {
        let item = item_in(WorkItemKind::Feature, WorkItemStatus::Implementation);
        let result = plan(
            &ctx(&item, &[]),
            &Operation::SubmitImplementationPR { pr_number: 5 },
        );
        assert!(matches!(result, Err(TransitionError::MissingArtifact { .. })));

        let mut item = item;
        item.review_status = Some(ReviewStatus::WaitingForReview);
        let artifacts = vec![implementation(&item)];
        let ctx = ctx(&item, &artifacts);
        let plan = plan(&ctx, &Operation::SubmitImplementationPR { pr_number: 5 }).unwrap();
        let result = apply(&ctx, &plan, Actor::Agent, None);
        assert_eq!(result.item.status, WorkItemStatus::Review);
        assert_eq!(result.item.pr_number, Some(5));
        assert!(result.item.is_due());
    }

    #[test]
    fn test_submit_after_requested_changes_needs_new_output() {
        let mut item = item_in(WorkItemKind::Feature, WorkItemStatus::Implementation);
        item.pr_number = Some(5);
        item.review_status = Some(ReviewStatus::ChangesRequested);
        let artifacts = vec![implementation(&item)];

        let result = plan(
            &ctx(&item, &artifacts),
            &Operation::SubmitImplementationPR { pr_number: 5 },
        );

        assert!(matches!(result, Err(TransitionError::MissingArtifact { .. })));
    }

    #[test]
    fn test_request_changes_on_pr_returns_to_implementation() {
        let mut item = item_in(WorkItemKind::Bug, WorkItemStatus::Review);
        item.pr_number = Some(5);
        let ctx = ctx(&item, &[]);
        let operation = Operation::RequestChangesOnPR {
            feedback: "Handle empty input".to_string(),
        };

        let plan = plan(&ctx, &operation).unwrap();
        let result = apply(&ctx, &plan, Actor::Human, None);

        assert_eq!(result.item.status, WorkItemStatus::Implementation);
        assert_eq!(
            result.item.review_status,
            Some(ReviewStatus::ChangesRequested)
        );
        assert_eq!(result.item.feedback.as_deref(), Some("Handle empty input"));
        assert!(result.item.is_due());
    }

    #[test]
    fn test_request_changes_needs_a_pr() {
        let item = item_in(WorkItemKind::Feature, WorkItemStatus::Review);
        let result = plan(
            &ctx(&item, &[]),
            &Operation::RequestChangesOnPR {
                feedback: "x".to_string(),
            },
        );
        assert_eq!(
            result,
            Err(TransitionError::MissingArtifact {
                what: "implementation pull request".to_string()
            })
        );
    }

    #[test]
    fn test_merge_uses_artifact_commit_message() {
        let mut item = item_in(WorkItemKind::Feature, WorkItemStatus::Review);
        item.pr_number = Some(5);
        let mut implementing = item.clone();
        implementing.status = WorkItemStatus::Implementation;
        let artifacts = vec![implementation(&implementing)];
        let ctx = ctx(&item, &artifacts);
        let operation = Operation::MergeImplementationPR {
            commit_message: None,
        };

        let plan = plan(&ctx, &operation).unwrap();
        assert_eq!(
            plan.external,
            Some(ExternalAction::MergePullRequest {
                pr_number: 5,
                method: MergeMethod::Squash,
                commit_title: Some("feat: add CSV export".to_string()),
                commit_message: Some("Streams rows.".to_string()),
            })
        );

        let outcome = ExternalOutcome::Merged {
            sha: "deadbeef".to_string(),
        };
        let result = apply(&ctx, &plan, Actor::Human, Some(&outcome));
        assert_eq!(result.item.status, WorkItemStatus::Done);
        assert_eq!(result.item.merge_commit_sha.as_deref(), Some("deadbeef"));
        assert_eq!(
            result.item.commit_message.as_deref(),
            Some("feat: add CSV export\n\nStreams rows.")
        );
    }

    #[test]
    fn test_merge_payload_overrides_commit_message() {
        let mut item = item_in(WorkItemKind::Feature, WorkItemStatus::Review);
        item.pr_number = Some(5);
        item.commit_message = Some("feat: old".to_string());
        let plan = plan(
            &ctx(&item, &[]),
            &Operation::MergeImplementationPR {
                commit_message: Some("fix: new subject".to_string()),
            },
        )
        .unwrap();
        assert!(matches!(
            plan.external,
            Some(ExternalAction::MergePullRequest {
                commit_title: Some(ref title),
                commit_message: None,
                ..
            }) if title == "fix: new subject"
        ));
    }

    #[test]
    fn test_merge_without_any_commit_message_fails() {
        let mut item = item_in(WorkItemKind::Feature, WorkItemStatus::Review);
        item.pr_number = Some(5);
        let result = plan(
            &ctx(&item, &[]),
            &Operation::MergeImplementationPR {
                commit_message: Some("   ".to_string()),
            },
        );
        assert_eq!(
            result,
            Err(TransitionError::MissingArtifact {
                what: "commit message".to_string()
            })
        );
    }

    #[test]
    fn test_split_commit_message() {
        assert_eq!(
            split_commit_message("feat: x\n\nbody line\nmore"),
            ("feat: x".to_string(), Some("body line\nmore".to_string()))
        );
        assert_eq!(split_commit_message("feat: x\n"), ("feat: x".to_string(), None));
    }
}
