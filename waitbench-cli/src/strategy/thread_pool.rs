//! Thread pool strategy: tasks block OS threads of a bounded rayon pool.

use super::{ExecutionConfig, Strategy, StrategyRunner};
use crate::error::{FailureCause, RunError, TaskFailed};
use rayon::ThreadPoolBuilder;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::Duration;
use tracing::debug;
use waitbench_core::{ProgressTracker, TaskBatch, TaskError};

/// Runs tasks on at most `worker_count` threads and collects every failure
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPoolRunner;

enum ThreadOutcome {
    Finished(Result<Duration, TaskError>),
    Panicked(String),
}

impl StrategyRunner for ThreadPoolRunner {
    fn strategy(&self) -> Strategy {
        Strategy::ThreadPool
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

        let worker_count = config.pool_size(batch.len());
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("waitbench-worker-{i}"))
            .build()
            .map_err(|e| {
                RunError::Runtime(std::io::Error::other(format!(
                    "Failed to build thread pool: {}",
                    e
                )))
            })?;
        debug!(workers = worker_count, tasks = batch.len(), "thread pool ready");

        let (tx, rx) = mpsc::channel();
        for (task_id, task) in batch.iter().enumerate() {
            let task = *task;
            let tx = tx.clone();
            pool.spawn(move || {
                // A panic escaping a rayon job aborts the process.
                let outcome = match catch_unwind(AssertUnwindSafe(|| task.execute())) {
                    Ok(result) => ThreadOutcome::Finished(result),
                    Err(panic) => ThreadOutcome::Panicked(panic_message(panic.as_ref())),
                };
                let _ = tx.send((task_id, outcome));
            });
        }
        drop(tx);

        let mut failures = Vec::new();
        for (task_id, outcome) in rx {
            match outcome {
                ThreadOutcome::Finished(Ok(_)) => progress.record(),
                ThreadOutcome::Finished(Err(e)) => {
                    failures.push(TaskFailed::from_task_error(task_id, e));
                }
                ThreadOutcome::Panicked(message) => failures.push(TaskFailed {
                    task_id,
                    cause: FailureCause::Panic,
                    message,
                }),
            }
        }

        RunError::collect(batch.len(), failures)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
