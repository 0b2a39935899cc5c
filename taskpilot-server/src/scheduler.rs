//! The pipeline cycle and the loop that runs it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::reconciliation::{reconcile_external_status, ReconcileReport};
use crate::workflow::{StageOutcome, WorkflowError, WorkflowService};
use taskpilot_core::WorkItemId;

#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub item_id: WorkItemId,
    pub error: String,
}

/// What one cycle did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleReport {
    pub clarifications_expired: usize,
    pub reconciliation: ReconcileReport,
    pub artifacts_recorded: usize,
    pub clarifications_requested: usize,
    pub failures: Vec<StageFailure>,
}

/// Runs pipeline cycles, one at a time.
pub struct Scheduler {
    service: Arc<WorkflowService>,
    drift_check: bool,
    running: Mutex<()>,
}

impl Scheduler {
    pub fn new(service: Arc<WorkflowService>, drift_check: bool) -> Self {
        Self {
            service,
            drift_check,
            running: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &Arc<WorkflowService> {
        &self.service
    }

    /// Expire clarifications, reconcile the board, then run due agents.
    ///
    /// Returns `None` without doing anything if a cycle is already running.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>, WorkflowError> {
        let Ok(_guard) = self.running.try_lock() else {
            info!("A pipeline cycle is already running; skipping");
            return Ok(None);
        };

        let expired = self.service.expire_clarifications().await?;
        let reconciliation = reconcile_external_status(&self.service, self.drift_check).await?;
        let runs = self.service.run_due_stages().await?;

        let mut report = CycleReport {
            clarifications_expired: expired.len(),
            reconciliation,
            ..CycleReport::default()
        };
        for run in runs {
            match run.result {
                Ok(StageOutcome::ArtifactRecorded { .. }) => report.artifacts_recorded += 1,
                Ok(StageOutcome::ClarificationRequested { .. }) => {
                    report.clarifications_requested += 1
                }
                Ok(StageOutcome::NotDue) => {}
                Err(e) => report.failures.push(StageFailure {
                    item_id: run.item_id,
                    error: e.to_string(),
                }),
            }
        }
        Ok(Some(report))
    }
}

/// Run a cycle every `period`, forever.
pub async fn pipeline_loop(scheduler: Arc<Scheduler>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match scheduler.run_cycle().await {
            Ok(Some(report)) if !report.failures.is_empty() => warn!(
                "Pipeline cycle finished with {} failed stage run(s)",
                report.failures.len()
            ),
            Ok(_) => {}
            Err(e) => error!("Pipeline cycle failed: {}", e),
        }
    }
}
