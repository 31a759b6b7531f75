//! Distributed strategy: tasks are submitted as remote calls to a pool with a
//! CPU budget. The caller may await only the first K completions.

use super::{ExecutionConfig, Strategy, StrategyRunner};
use crate::distributed::{DistributedPool, ObjectRef};
use crate::error::{FailureCause, RunError, TaskFailed};
use std::collections::HashMap;
use tracing::{debug, warn};
use waitbench_core::{ProgressTracker, TaskBatch};
use waitbench_ipc::{RemoteCall, RemoteOutcome};

/// Name of the thread that keeps a pool alive for its unawaited calls
const UNAWAITED_THREAD: &str = "unawaited-calls";

/// Runs tasks on a [`DistributedPool`] sized by the config's CPU budget.
///
/// With an `await_count`, the run ends after that many completions. The pool
/// and the calls nobody awaited move to a detached thread and keep running
/// there until they finish.
#[derive(Debug, Default, Clone, Copy)]
pub struct DistributedRunner;

impl StrategyRunner for DistributedRunner {
    fn strategy(&self) -> Strategy {
        Strategy::Distributed
    }

    fn tracked_total(&self, batch: &TaskBatch, config: &ExecutionConfig) -> usize {
        config.await_count.unwrap_or(batch.len()).min(batch.len())
    }

    fn execute(
        &self,
        batch: &TaskBatch,
        config: &ExecutionConfig,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<(), RunError> {
        let cpus = config.cpu_budget().ok_or_else(|| {
            RunError::InvalidArgument("the distributed strategy needs a CPU budget".to_string())
        })?;
        let pool = DistributedPool::init(cpus)?;

        let mut task_of = HashMap::with_capacity(batch.len());
        let mut pending: Vec<ObjectRef> = Vec::with_capacity(batch.len());
        for (task_id, task) in batch.iter().enumerate() {
            let object = pool.submit(&RemoteCall::Wait {
                task_id: task_id as u32,
                duration_secs: task.duration_secs(),
            })?;
            task_of.insert(object.id(), task_id);
            pending.push(object);
        }

        let awaited = self.tracked_total(batch, config);
        debug!(cpus, submitted = batch.len(), awaited, "distributed tasks submitted");

        let mut failures = Vec::new();
        let mut settled = 0;
        while settled < awaited && !pending.is_empty() {
            let (ready, rest) = pool.wait(pending, 1)?;
            pending = rest;
            for result in ready {
                settled += 1;
                let task_id = task_of.get(&result.id).copied().unwrap_or_default();
                match result.outcome {
                    Ok(RemoteOutcome::Completed { .. }) => progress.record(),
                    Ok(RemoteOutcome::Failed { kind, message, .. }) => failures.push(TaskFailed {
                        task_id,
                        cause: kind.into(),
                        message,
                    }),
                    Err(e) => failures.push(TaskFailed {
                        task_id,
                        cause: match e {
                            RunError::SerializationFailure(_) => FailureCause::Serialization,
                            _ => FailureCause::WorkerLost,
                        },
                        message: e.to_string(),
                    }),
                }
            }
        }

        if !pending.is_empty() {
            debug!(unawaited = pending.len(), "leaving unawaited tasks running");
            let detached = std::thread::Builder::new()
                .name(UNAWAITED_THREAD.to_string())
                .spawn(move || match pool.get(pending) {
                    Ok(results) => debug!(finished = results.len(), "unawaited tasks finished"),
                    Err(e) => debug!(error = %e, "unawaited tasks lost"),
                });
            if let Err(e) = detached {
                warn!(error = %e, "could not detach unawaited tasks; cancelling them");
            }
        }
        RunError::collect(awaited, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{UNIT, assert_close};
    use std::time::Duration;
    use waitbench_core::{RecordingSink, WaitTask};

    fn config(cpus: usize) -> ExecutionConfig {
        ExecutionConfig::new(Strategy::Distributed, 0, UNIT.as_secs_f64()).with_cpus(cpus)
    }

    #[test]
    fn test_capacity_one_runs_in_series() {
        let batch = TaskBatch::uniform(5, UNIT);
        let result = DistributedRunner.run(&batch, &config(1), None).unwrap();
        assert_close(result.elapsed(), UNIT * 5);
    }

    #[test]
    fn test_capacity_covers_batch() {
        let batch = TaskBatch::uniform(4, UNIT);
        let result = DistributedRunner.run(&batch, &config(4), None).unwrap();
        assert_close(result.elapsed(), UNIT);
    }

    #[test]
    fn test_await_count_returns_early() {
        let batch = TaskBatch::from_tasks(vec![
            WaitTask::new(0.0),
            WaitTask::new(0.0),
            WaitTask::new(10.0),
        ]);
        let mut sink = RecordingSink::default();
        let result = DistributedRunner
            .run(&batch, &config(3).with_await_count(2), Some(&mut sink))
            .unwrap();

        assert!(result.elapsed() < Duration::from_secs(2));
        assert_eq!(result.task_count, 3);
        assert_eq!(sink.started, Some(2));
        assert!(sink.last().unwrap().is_final());
    }

    fn thread_names() -> Vec<String> {
        std::fs::read_dir("/proc/self/task")
            .unwrap()
            .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path().join("comm")).ok())
            .map(|name| name.trim().to_string())
            .collect()
    }

    #[test]
    fn test_unawaited_calls_keep_running() {
        let batch = TaskBatch::from_tasks(vec![WaitTask::new(0.0), WaitTask::new(5.0)]);
        DistributedRunner
            .run(&batch, &config(2).with_await_count(1), None)
            .unwrap();

        assert!(
            thread_names().iter().any(|name| name == UNAWAITED_THREAD),
            "{:?}",
            thread_names()
        );
    }

    #[test]
    fn test_zero_tasks() {
        let result = DistributedRunner
            .run(&TaskBatch::default(), &config(2), None)
            .unwrap();
        assert_eq!(result.task_count, 0);
        assert!(result.elapsed() < Duration::from_millis(200), "{result:?}");
    }

    #[test]
    fn test_repeated_runs_are_comparable() {
        let batch = TaskBatch::uniform(4, UNIT);
        let first = DistributedRunner.run(&batch, &config(2), None).unwrap();
        let second = DistributedRunner.run(&batch, &config(2), None).unwrap();
        assert_close(first.elapsed(), UNIT * 2);
        assert_close(second.elapsed(), UNIT * 2);
    }

    #[test]
    fn test_missing_budget_is_invalid() {
        let batch = TaskBatch::uniform(1, UNIT);
        let config = ExecutionConfig::new(Strategy::Distributed, 1, UNIT.as_secs_f64());
        assert!(DistributedRunner
            .run(&batch, &config, None)
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn test_failures_are_collected() {
        let batch = TaskBatch::from_tasks(vec![WaitTask::new(-1.0), WaitTask::new(0.0)]);
        let err = DistributedRunner.run(&batch, &config(2), None).unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].task_id, 0);
        assert_eq!(err.failures()[0].cause, FailureCause::InvalidArgument);
    }
}
