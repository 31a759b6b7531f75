//! Sequential strategy: one task at a time, in submission order.

use super::{ExecutionConfig, Strategy, StrategyRunner};
use crate::error::RunError;
use tracing::debug;
use waitbench_core::{ProgressTracker, TaskBatch};

/// Runs each task on the calling thread and stops at the first failure
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialRunner;

impl StrategyRunner for SequentialRunner {
    fn strategy(&self) -> Strategy {
        Strategy::Sequential
    }

    fn execute(
        &self,
        batch: &TaskBatch,
        _config: &ExecutionConfig,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<(), RunError> {
        for (task_id, task) in batch.iter().enumerate() {
            debug!(task_id, "running task");
            task.execute().map_err(|e| RunError::task(task_id, e))?;
            progress.record();
        }
        Ok(())
    }
}
