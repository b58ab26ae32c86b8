use crate::Metrics;
use async_trait::async_trait;
use common::{
    Result,
    reconciler::Reconciler,
    task::{Task, TaskHandler},
};
use tracing::debug;

/// Runs the reconciler for a task and records the result.
pub struct ReconcileHandler {
    reconciler: Reconciler,
    metrics: Metrics,
}

impl ReconcileHandler {
    #[must_use]
    pub fn new(reconciler: Reconciler, metrics: Metrics) -> Self {
        Self { reconciler, metrics }
    }
}

#[async_trait]
impl TaskHandler for ReconcileHandler {
    async fn handle(&self, task: &Task) -> Result<()> {
        let _timer = self.metrics.count_and_measure(&task.kind);
        let waited = chrono::Utc::now() - task.received;
        debug!(lb = %task.lb.id, kind = %task.kind, queued_ms = waited.num_milliseconds(), "reconciling");
        match self.reconciler.converge(&task.lb, &task.kind).await {
            Ok(outcome) => {
                self.metrics.reconcile_outcome(outcome);
                Ok(())
            }
            Err(e) => {
                self.metrics.reconcile_failure(task.key(), &e);
                Err(e)
            }
        }
    }
}
