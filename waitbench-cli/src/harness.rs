//! Benchmark Harness
//!
//! Builds the batch a config describes, picks the matching runner and times it.

use crate::error::RunError;
use crate::strategy::{
    CooperativeRunner, DistributedRunner, ExecutionConfig, ProcessPoolRunner, SequentialRunner,
    Strategy, StrategyRunner, ThreadPoolRunner, TimingResult,
};
use tracing::{info, warn};
use waitbench_core::ProgressSink;

/// Runner implementing `strategy`
pub fn runner_for(strategy: Strategy) -> Box<dyn StrategyRunner> {
    match strategy {
        Strategy::Sequential => Box::new(SequentialRunner),
        Strategy::Cooperative => Box::new(CooperativeRunner::fixed_list()),
        Strategy::CooperativeList => Box::new(CooperativeRunner::incremental_list()),
        Strategy::ThreadPool => Box::new(ThreadPoolRunner),
        Strategy::ProcessPool => Box::new(ProcessPoolRunner),
        Strategy::Distributed => Box::new(DistributedRunner),
    }
}

/// Validate `config`, run its batch and return the timing
pub fn run_benchmark(
    config: &ExecutionConfig,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<TimingResult, RunError> {
    config.validate()?;
    let batch = config.build_batch();
    let runner = runner_for(config.strategy);

    let result = runner.run(&batch, config, progress)?;
    info!(
        strategy = %result.strategy,
        tasks = result.task_count,
        elapsed_secs = result.elapsed_seconds,
        "strategy finished"
    );
    Ok(result)
}

/// Time `task_count` waits of `per_task_duration` seconds under `strategy`
pub fn run_strategy(
    strategy: Strategy,
    task_count: usize,
    per_task_duration: f64,
    worker_count: Option<usize>,
) -> Result<TimingResult, RunError> {
    let mut config = ExecutionConfig::new(strategy, task_count, per_task_duration);
    config.worker_count = worker_count;
    run_benchmark(&config, None)
}

/// Outcome of one strategy in a comparison run
#[derive(Debug)]
pub struct StrategyOutcome {
    /// Strategy that ran
    pub strategy: Strategy,
    /// Its timing, or why it failed
    pub result: Result<TimingResult, RunError>,
}

/// Run several strategies back to back over the same parameters.
///
/// A failing strategy does not stop the ones after it. `make_sink` is asked
/// for a fresh progress sink per strategy.
pub fn run_all<F>(
    strategies: &[Strategy],
    base: &ExecutionConfig,
    mut make_sink: F,
) -> Vec<StrategyOutcome>
where
    F: FnMut(Strategy) -> Option<Box<dyn ProgressSink>>,
{
    strategies
        .iter()
        .map(|&strategy| {
            let config = ExecutionConfig {
                strategy,
                ..base.clone()
            };
            let mut sink = make_sink(strategy);
            let result =
                run_benchmark(&config, sink.as_deref_mut().map(|s| s as &mut dyn ProgressSink));
            if let Err(e) = &result {
                warn!(strategy = %strategy, error = %e, "strategy failed");
            }
            StrategyOutcome { strategy, result }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use waitbench_core::RecordingSink;

    #[test]
    fn test_runner_for_matches_strategy() {
        for strategy in Strategy::ALL {
            assert_eq!(runner_for(strategy).strategy(), strategy);
        }
    }

    #[test]
    fn test_run_strategy_zero_tasks() {
        let result = run_strategy(Strategy::ThreadPool, 0, 1.0, None).unwrap();
        assert_eq!(result.task_count, 0);
        assert!(result.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_run_benchmark_rejects_negative_duration() {
        let err = run_strategy(Strategy::Cooperative, 3, -0.5, None).unwrap_err();
        assert!(matches!(err, RunError::InvalidArgument(_)));
    }

    #[test]
    fn test_run_benchmark_rejects_zero_workers() {
        let err = run_strategy(Strategy::ThreadPool, 3, 0.0, Some(0)).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_repeated_runs_are_comparable() {
        let first = run_strategy(Strategy::Cooperative, 4, 0.05, None).unwrap();
        let second = run_strategy(Strategy::Cooperative, 4, 0.05, None).unwrap();
        let delta = (first.elapsed_seconds - second.elapsed_seconds).abs();
        assert!(delta < 0.1, "{first:?} vs {second:?}");
    }

    #[test]
    fn test_run_all_continues_past_failure() {
        // Distributed without a budget is rejected; the others still run.
        let base = ExecutionConfig::new(Strategy::Sequential, 2, 0.0);
        let outcomes = run_all(
            &[Strategy::Sequential, Strategy::Distributed, Strategy::ThreadPool],
            &base,
            |_| Some(Box::new(RecordingSink::default()) as Box<dyn ProgressSink>),
        );

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
        assert_eq!(outcomes[2].result.as_ref().unwrap().strategy, "thread-pool");
    }
}
