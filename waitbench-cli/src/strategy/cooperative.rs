//! Cooperative strategy: every task suspends on a timer inside one
//! single-threaded tokio runtime, so all waits overlap on the calling thread.

use super::{ExecutionConfig, FailureMode, Strategy, StrategyRunner};
use crate::error::{RunError, TaskFailed};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use waitbench_core::{ProgressTracker, TaskBatch, TaskError, WaitTask};

/// How the set of pending futures is put together before gathering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherStyle {
    /// Build every future up front and gather the finished list
    FixedList,
    /// Push futures one at a time onto a growing set
    IncrementalList,
}

/// Runs all tasks concurrently on a current-thread runtime
#[derive(Debug, Clone, Copy)]
pub struct CooperativeRunner {
    style: GatherStyle,
}

impl CooperativeRunner {
    /// Gather over a list built in one go
    pub fn fixed_list() -> Self {
        Self {
            style: GatherStyle::FixedList,
        }
    }

    /// Gather over a list built task by task
    pub fn incremental_list() -> Self {
        Self {
            style: GatherStyle::IncrementalList,
        }
    }

    /// Construction style of this runner
    pub fn style(&self) -> GatherStyle {
        self.style
    }
}

impl Default for CooperativeRunner {
    fn default() -> Self {
        Self::fixed_list()
    }
}

type Settled = (usize, Result<Duration, TaskError>);

async fn settle(task_id: usize, task: WaitTask, announce: bool) -> Settled {
    let result = if announce {
        task.execute_announced(task_id).await
    } else {
        task.execute_async().await
    };
    (task_id, result)
}

/// Drive every pending task to completion, recording progress as each one settles.
async fn gather<F>(
    mut pending: FuturesUnordered<F>,
    total: usize,
    mode: FailureMode,
    progress: &mut ProgressTracker<'_>,
) -> Result<(), RunError>
where
    F: Future<Output = Settled>,
{
    let mut failures = Vec::new();

    while let Some((task_id, result)) = pending.next().await {
        match result {
            Ok(_) => progress.record(),
            Err(e) => {
                if mode == FailureMode::FirstFailure {
                    return Err(RunError::task(task_id, e));
                }
                failures.push(TaskFailed::from_task_error(task_id, e));
            }
        }
    }

    RunError::collect(total, failures)
}

impl StrategyRunner for CooperativeRunner {
    fn strategy(&self) -> Strategy {
        match self.style {
            GatherStyle::FixedList => Strategy::Cooperative,
            GatherStyle::IncrementalList => Strategy::CooperativeList,
        }
    }

    fn execute(
        &self,
        batch: &TaskBatch,
        config: &ExecutionConfig,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<(), RunError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let announce = config.announce;
        let pending = match self.style {
            GatherStyle::FixedList => batch
                .iter()
                .enumerate()
                .map(|(task_id, task)| settle(task_id, *task, announce))
                .collect::<FuturesUnordered<_>>(),
            GatherStyle::IncrementalList => {
                let pending = FuturesUnordered::new();
                for (task_id, task) in batch.iter().enumerate() {
                    pending.push(settle(task_id, *task, announce));
                }
                pending
            }
        };
        debug!(tasks = pending.len(), style = ?self.style, "gathering cooperative tasks");

        runtime.block_on(gather(pending, batch.len(), config.failure_mode, progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCause;
    use crate::strategy::test_support::{UNIT, assert_close};
    use waitbench_core::RecordingSink;

    fn config(mode: FailureMode) -> ExecutionConfig {
        ExecutionConfig::new(Strategy::Cooperative, 0, UNIT.as_secs_f64()).with_failure_mode(mode)
    }

    #[test]
    fn test_cooperative_overlaps_waits() {
        for runner in [CooperativeRunner::fixed_list(), CooperativeRunner::incremental_list()] {
            let batch = TaskBatch::uniform(8, UNIT);
            let result = runner.run(&batch, &config(FailureMode::Gather), None).unwrap();
            assert_close(result.elapsed(), UNIT);
        }
    }

    #[test]
    fn test_zero_tasks() {
        for runner in [CooperativeRunner::fixed_list(), CooperativeRunner::incremental_list()] {
            let mut sink = RecordingSink::default();
            let result = runner
                .run(&TaskBatch::default(), &config(FailureMode::Gather), Some(&mut sink))
                .unwrap();
            assert_eq!(result.task_count, 0);
            assert!(result.elapsed() < Duration::from_millis(100), "{result:?}");
            assert!(sink.events.is_empty());
            assert!(sink.finished);
        }
    }

    #[test]
    fn test_styles_report_their_own_names() {
        assert_eq!(CooperativeRunner::fixed_list().strategy(), Strategy::Cooperative);
        assert_eq!(
            CooperativeRunner::incremental_list().strategy(),
            Strategy::CooperativeList
        );
    }

    #[test]
    fn test_progress_reaches_total() {
        let batch = TaskBatch::uniform(5, Duration::from_millis(5));
        let mut sink = RecordingSink::default();
        CooperativeRunner::default()
            .run(&batch, &config(FailureMode::Gather), Some(&mut sink))
            .unwrap();
        assert_eq!(sink.started, Some(5));
        assert_eq!(sink.events.len(), 5);
        assert!(sink.is_monotonic());
        assert!(sink.last().unwrap().is_final());
    }

    #[test]
    fn test_gather_waits_for_every_task() {
        let batch = TaskBatch::from_tasks(vec![
            WaitTask::new(UNIT.as_secs_f64()),
            WaitTask::new(-1.0),
            WaitTask::new(UNIT.as_secs_f64()),
            WaitTask::new(f64::INFINITY),
        ]);
        let (result, elapsed) = waitbench_core::Stopwatch::measure(|| {
            CooperativeRunner::default().run(&batch, &config(FailureMode::Gather), None)
        });
        let err = result.unwrap_err();

        let mut ids: Vec<usize> = err.failures().iter().map(|f| f.task_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
        assert!(err
            .failures()
            .iter()
            .all(|f| f.cause == FailureCause::InvalidArgument));
        // The valid tasks still finished their waits.
        assert!(elapsed >= UNIT.saturating_sub(Duration::from_millis(10)));
    }

    #[test]
    fn test_first_failure_returns_immediately() {
        let batch = TaskBatch::from_tasks(vec![WaitTask::new(2.0), WaitTask::new(-1.0)]);
        let (result, elapsed) = waitbench_core::Stopwatch::measure(|| {
            CooperativeRunner::default().run(&batch, &config(FailureMode::FirstFailure), None)
        });
        let err = result.unwrap_err();
        assert!(matches!(err, RunError::TaskFailure(ref f) if f.task_id == 1));
        assert!(elapsed < Duration::from_secs(1));
    }
}
