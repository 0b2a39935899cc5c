//! Audit-log replay.
//!
//! The transition log is the authority on how an item got where it is.
//! Replaying it from `Backlog` must land on the item's stored status.

use taskpilot_core::{StatusTransition, WorkItem, WorkItemStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("transition #{sequence} starts in {from} but the item was in {expected}")]
    Discontinuous {
        sequence: u64,
        from: WorkItemStatus,
        expected: WorkItemStatus,
    },

    #[error("transition #{found} follows #{previous}")]
    SequenceGap { previous: u64, found: u64 },

    #[error("replay ends in {replayed} but the item is in {stored}")]
    StatusMismatch {
        replayed: WorkItemStatus,
        stored: WorkItemStatus,
    },
}

/// Fold a transition log, ordered by sequence, starting from `Backlog`.
pub fn replay_status(transitions: &[StatusTransition]) -> Result<WorkItemStatus, ReplayError> {
    let mut status = WorkItemStatus::Backlog;
    let mut previous = 0;
    for transition in transitions {
        if transition.sequence != previous + 1 {
            return Err(ReplayError::SequenceGap {
                previous,
                found: transition.sequence,
            });
        }
        if transition.from != status {
            return Err(ReplayError::Discontinuous {
                sequence: transition.sequence,
                from: transition.from,
                expected: status,
            });
        }
        status = transition.to;
        previous = transition.sequence;
    }
    Ok(status)
}

/// Check that `transitions` explain `item.status`.
pub fn verify(item: &WorkItem, transitions: &[StatusTransition]) -> Result<(), ReplayError> {
    let replayed = replay_status(transitions)?;
    if replayed != item.status {
        return Err(ReplayError::StatusMismatch {
            replayed,
            stored: item.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::transition::test_support::{design, implementation, item_in, now};
    use crate::workflow::transition::{
        apply, plan, ExternalAction, ExternalOutcome, TransitionContext,
    };
    use chrono::Duration;
    use proptest::prelude::*;
    use taskpilot_core::{
        Actor, Artifact, DesignDecision, Operation, OperationKind, ReviewStatus, TransitionId,
        WorkItemKind,
    };

    fn record(sequence: u64, from: WorkItemStatus, to: WorkItemStatus) -> StatusTransition {
        StatusTransition {
            id: TransitionId::generate(),
            item_id: "item".into(),
            sequence,
            from,
            to,
            operation: OperationKind::Approve,
            actor: Actor::Human,
            reason: None,
            compensates: None,
            recorded_at: now(),
        }
    }

    #[test]
    fn test_empty_log_replays_to_backlog() {
        assert_eq!(replay_status(&[]), Ok(WorkItemStatus::Backlog));
    }

    #[test]
    fn test_detects_broken_chain() {
        let log = vec![
            record(1, WorkItemStatus::Backlog, WorkItemStatus::ProductDesign),
            record(2, WorkItemStatus::TechDesign, WorkItemStatus::Implementation),
        ];
        assert_eq!(
            replay_status(&log),
            Err(ReplayError::Discontinuous {
                sequence: 2,
                from: WorkItemStatus::TechDesign,
                expected: WorkItemStatus::ProductDesign,
            })
        );
    }

    #[test]
    fn test_detects_sequence_gap() {
        let log = vec![record(2, WorkItemStatus::Backlog, WorkItemStatus::ProductDesign)];
        assert_eq!(
            replay_status(&log),
            Err(ReplayError::SequenceGap {
                previous: 0,
                found: 2
            })
        );
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
            Just(Operation::MergeDesignPR { pr_number: 3 }),
            Just(Operation::SubmitImplementationPR { pr_number: 4 }),
            Just(Operation::RequestChangesOnPR {
                feedback: "fix".to_string()
            }),
            Just(Operation::MergeImplementationPR {
                commit_message: None
            }),
            Just(Operation::RevertMerge),
            Just(Operation::MergeRevertPR),
            Just(Operation::UndoStatusChange),
        ]
    }

    proptest! {
        /// Drive an item through random operations, keeping only the legal
        /// ones, then check the log explains where it ended up.
        #[test]
        fn replay_reproduces_current_status(
            is_bug in any::<bool>(),
            operations in prop::collection::vec(any_operation(), 0..40),
        ) {
            let kind = if is_bug { WorkItemKind::Bug } else { WorkItemKind::Feature };
            let mut item = item_in(kind, WorkItemStatus::Backlog);
            let mut log: Vec<StatusTransition> = Vec::new();
            let mut artifacts: Vec<Artifact> = Vec::new();
            let mut next_pr = 100;

            for (step, operation) in operations.iter().enumerate() {
                let at = now() + Duration::seconds(step as i64);
                // Stage agents have always produced something to review.
                let output = match item.status {
                    status if status.is_design() => Some(design(&item)),
                    WorkItemStatus::Implementation => Some(implementation(&item)),
                    _ => None,
                };
                if let Some(mut output) = output.filter(|_| item.is_due()) {
                    output.created_at = at;
                    artifacts.push(output);
                    item.review_status = Some(ReviewStatus::WaitingForReview);
                }

                let ctx = TransitionContext {
                    item: &item,
                    artifacts: &artifacts,
                    last_transition: log.last(),
                    previous_transition: log.iter().rev().nth(1),
                    now: at,
                    undo_window: Duration::minutes(5),
                };
                let Ok(plan) = plan(&ctx, operation) else {
                    continue;
                };
                let outcome = plan.external.as_ref().map(|action| match action {
                    ExternalAction::MergePullRequest { .. } => ExternalOutcome::Merged {
                        sha: format!("sha{}", step),
                    },
                    ExternalAction::RevertPullRequest { .. } => {
                        next_pr += 1;
                        ExternalOutcome::RevertOpened { pr_number: next_pr }
                    }
                });
                let result = apply(&ctx, &plan, Actor::Human, outcome.as_ref());
                if let Some(transition) = result.transition {
                    log.push(transition);
                }
                item = result.item;
            }

            prop_assert_eq!(replay_status(&log), Ok(item.status));
            prop_assert!(verify(&item, &log).is_ok());
        }
    }
}
