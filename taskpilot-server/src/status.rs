//! Status types for the status endpoint.

use serde::Serialize;

use taskpilot_core::{ReviewStatus, WorkItem, WorkItemId, WorkItemKind, WorkItemStatus};

/// Item counts per pipeline stage.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub total_items: usize,
    pub backlog: usize,
    pub product_design: usize,
    pub tech_design: usize,
    pub implementation: usize,
    pub review: usize,
    pub done: usize,
    pub reverted: usize,
    pub waiting_for_review: usize,
    pub waiting_for_clarification: usize,
    /// Items whose board column has not caught up yet.
    pub unmirrored: usize,
}

#[derive(Debug, Serialize)]
pub struct ItemStatusEntry {
    pub id: WorkItemId,
    pub kind: WorkItemKind,
    pub title: String,
    pub status: WorkItemStatus,
    pub review_status: Option<ReviewStatus>,
    pub pr_number: Option<u64>,
    pub due: bool,
    pub mirrored: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub items: Vec<ItemStatusEntry>,
}

impl StatusData {
    pub fn from_items(items: Vec<WorkItem>, version: String) -> Self {
        let mut summary = StatusSummary {
            total_items: items.len(),
            ..Default::default()
        };

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            match item.status {
                WorkItemStatus::Backlog => summary.backlog += 1,
                WorkItemStatus::ProductDesign => summary.product_design += 1,
                WorkItemStatus::TechDesign => summary.tech_design += 1,
                WorkItemStatus::Implementation => summary.implementation += 1,
                WorkItemStatus::Review => summary.review += 1,
                WorkItemStatus::Done => summary.done += 1,
                WorkItemStatus::Reverted => summary.reverted += 1,
            }
            match item.review_status {
                Some(ReviewStatus::WaitingForReview) => summary.waiting_for_review += 1,
                Some(ReviewStatus::WaitingForClarification) => {
                    summary.waiting_for_clarification += 1
                }
                _ => {}
            }
            let mirrored = !item.needs_mirror();
            if !mirrored && item.project_item_id.is_some() {
                summary.unmirrored += 1;
            }

            entries.push(ItemStatusEntry {
                due: item.is_due(),
                id: item.id,
                kind: item.kind,
                title: item.title,
                status: item.status,
                review_status: item.review_status,
                pr_number: item.pr_number,
                mirrored,
            });
        }

        Self {
            version,
            summary,
            items: entries,
        }
    }
}
