//! Process pool strategy: tasks run in child worker processes.

use super::{ExecutionConfig, Strategy, StrategyRunner};
use crate::error::RunError;
use crate::supervisor::{Supervisor, TaskOutcome};
use tracing::debug;
use waitbench_core::{ProgressTracker, TaskBatch};

/// Runs tasks on at most `worker_count` worker processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessPoolRunner;

impl ProcessPoolRunner {
    fn supervisor(config: &ExecutionConfig, workers: usize) -> Result<Supervisor, RunError> {
        match &config.worker_binary {
            Some(binary) => Ok(Supervisor::new(binary.clone(), workers)),
            None => Ok(Supervisor::for_current_exe(workers)?),
        }
    }
}

impl StrategyRunner for ProcessPoolRunner {
    fn strategy(&self) -> Strategy {
        Strategy::ProcessPool
    }

    fn execute(
        &self,
        batch: &TaskBatch,
        config: &ExecutionConfig,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<(), RunError> {
        if batch.is_empty() {
            return Ok(());
        }

        let supervisor = Self::supervisor(config, config.pool_size(batch.len()))?;
        debug!(workers = supervisor.num_workers(), tasks = batch.len(), "process pool ready");

        let mut failures = Vec::new();
        supervisor.run_batch(batch, |outcome| match outcome {
            TaskOutcome::Completed { .. } => progress.record(),
            TaskOutcome::Failed(failed) => failures.push(failed),
        })?;

        RunError::collect(batch.len(), failures)
    }
}
