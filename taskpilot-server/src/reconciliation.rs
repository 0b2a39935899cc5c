//! Board reconciliation.
//!
//! A commit is final even when the board write that follows it fails. This
//! pass finds items whose board column is behind their committed status and
//! pushes the status again. Internal status always wins: a card someone moved
//! by hand is put back, never turned into a transition.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::notify::Channel;
use crate::workflow::{ExternalSync, WorkflowError, WorkflowService};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Items whose pending mirror was written.
    pub pushed: usize,
    /// Items that still could not be written or read back.
    pub failed: usize,
    /// Cards moved by hand and put back.
    pub drift_corrected: usize,
}

/// Push every unmirrored status to the board.
///
/// With `drift_check`, items the store believes are mirrored are read back
/// and corrected if the board disagrees.
pub async fn reconcile_external_status(
    service: &WorkflowService,
    drift_check: bool,
) -> Result<ReconcileReport, WorkflowError> {
    let items = service.list_items().await?;
    let mut report = ReconcileReport::default();

    for item in items.iter().filter(|item| item.project_item_id.is_some()) {
        if item.needs_mirror() {
            match service.interpreter().mirror_status(item, item.status).await {
                ExternalSync::Synced => {
                    info!("Reconciled {} to {} on the board", item.id, item.status);
                    report.pushed += 1;
                }
                ExternalSync::Deferred { .. } => report.failed += 1,
                ExternalSync::NotRequired => {}
            }
            continue;
        }

        if !drift_check {
            continue;
        }

        let board = match service.project().read_status(item).await {
            Ok(board) => board,
            Err(e) => {
                warn!("Could not read the board column of {}: {}", item.id, e);
                report.failed += 1;
                continue;
            }
        };
        if board == Some(item.status) {
            continue;
        }

        let shown = board.map_or_else(|| "no column".to_string(), |s| s.to_string());
        warn!(
            "{} is in {} but the board shows {}; restoring",
            item.id, item.status, shown
        );
        match service.interpreter().mirror_status(item, item.status).await {
            ExternalSync::Synced => {
                report.drift_corrected += 1;
                service.notifications().dispatch(
                    Channel::Alerts,
                    format!(
                        "\"{}\" was moved to {} on the board; moved it back to {}",
                        item.title, shown, item.status
                    ),
                );
            }
            ExternalSync::Deferred { reason } => {
                error!("Failed to restore {} on the board: {}", item.id, reason);
                report.failed += 1;
            }
            ExternalSync::NotRequired => {}
        }
    }

    if report != ReconcileReport::default() {
        info!(
            "Reconciliation: {} pushed, {} corrected, {} failed",
            report.pushed, report.drift_corrected, report.failed
        );
    }
    Ok(report)
}
