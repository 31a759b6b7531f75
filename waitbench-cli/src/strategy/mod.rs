//! Execution Strategies
//!
//! Every strategy runs the same [`TaskBatch`] and is timed the same way: the
//! provided [`StrategyRunner::run`] wraps the strategy's `execute` in a
//! [`Stopwatch`], so the measured interval covers setup, every task and the
//! final join.

mod cooperative;
mod distributed;
mod process_pool;
mod sequential;
mod thread_pool;

pub use cooperative::{CooperativeRunner, GatherStyle};
pub use distributed::DistributedRunner;
pub use process_pool::ProcessPoolRunner;
pub use sequential::SequentialRunner;
pub use thread_pool::ThreadPoolRunner;

use crate::error::RunError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use waitbench_core::{ProgressSink, ProgressTracker, Stopwatch, TaskBatch};

/// A named scheduling discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// One task at a time on the calling thread
    Sequential,
    /// Timer-driven tasks on a single-threaded runtime, gathered from a fixed list
    Cooperative,
    /// Same as `Cooperative`, with the task list built incrementally
    CooperativeList,
    /// Bounded pool of OS threads
    ThreadPool,
    /// Bounded pool of worker processes
    ProcessPool,
    /// In-process cluster with a CPU budget
    Distributed,
}

impl Strategy {
    /// Every strategy, in reporting order
    pub const ALL: [Strategy; 6] = [
        Strategy::Sequential,
        Strategy::Cooperative,
        Strategy::CooperativeList,
        Strategy::ThreadPool,
        Strategy::ProcessPool,
        Strategy::Distributed,
    ];

    /// Name used on the command line and in reports
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Cooperative => "cooperative",
            Strategy::CooperativeList => "cooperative-list",
            Strategy::ThreadPool => "thread-pool",
            Strategy::ProcessPool => "process-pool",
            Strategy::Distributed => "distributed",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == wanted)
            .ok_or_else(|| RunError::InvalidArgument(format!("unknown strategy '{s}'")))
    }
}

/// Parse strategy names, expanding `all` and dropping duplicates.
///
/// An empty list means every strategy.
pub fn parse_strategies<S: AsRef<str>>(names: &[S]) -> Result<Vec<Strategy>, RunError> {
    if names.is_empty() {
        return Ok(Strategy::ALL.to_vec());
    }

    let mut strategies = Vec::new();
    for name in names {
        let name = name.as_ref();
        let expanded: Vec<Strategy> = if name.trim().eq_ignore_ascii_case("all") {
            Strategy::ALL.to_vec()
        } else {
            vec![name.parse()?]
        };
        for strategy in expanded {
            if !strategies.contains(&strategy) {
                strategies.push(strategy);
            }
        }
    }
    Ok(strategies)
}

/// How a cooperative run reacts to a failing task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Let every task settle, then surface all failures
    #[default]
    Gather,
    /// Return the first failure as soon as it happens
    FirstFailure,
}

impl FromStr for FailureMode {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "gather" => Ok(FailureMode::Gather),
            "first-failure" => Ok(FailureMode::FirstFailure),
            _ => Err(RunError::InvalidArgument(format!(
                "unknown failure mode '{s}' (expected gather or first-failure)"
            ))),
        }
    }
}

/// Parameters of one strategy run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Strategy to run
    pub strategy: Strategy,
    /// Number of tasks in the batch
    pub task_count: usize,
    /// Wait per task, in seconds
    pub task_duration_secs: f64,
    /// Concurrency limit; one per task when unset
    pub worker_count: Option<usize>,
    /// CPU budget of the distributed pool; `worker_count` stands in when unset
    pub cpus: Option<usize>,
    /// Cooperative failure policy
    pub failure_mode: FailureMode,
    /// Distributed only: number of completions to await before returning
    pub await_count: Option<usize>,
    /// Cooperative only: log a line as each task finishes
    pub announce: bool,
    /// Binary spawned for process workers; the current executable when unset
    pub worker_binary: Option<PathBuf>,
}

impl ExecutionConfig {
    /// Config with defaults for everything but the batch shape
    pub fn new(strategy: Strategy, task_count: usize, task_duration_secs: f64) -> Self {
        Self {
            strategy,
            task_count,
            task_duration_secs,
            worker_count: None,
            cpus: None,
            failure_mode: FailureMode::default(),
            await_count: None,
            announce: false,
            worker_binary: None,
        }
    }

    /// Set the concurrency limit
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = Some(workers);
        self
    }

    /// Set the distributed CPU budget
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus);
        self
    }

    /// CPU budget for the distributed pool, if one was declared
    pub fn cpu_budget(&self) -> Option<usize> {
        self.cpus.or(self.worker_count)
    }

    /// Set the cooperative failure policy
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Only await the first `count` distributed completions
    pub fn with_await_count(mut self, count: usize) -> Self {
        self.await_count = Some(count);
        self
    }

    /// Spawn process workers from `binary`
    pub fn with_worker_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(binary.into());
        self
    }

    /// Reject configurations no strategy can run
    pub fn validate(&self) -> Result<(), RunError> {
        if !self.task_duration_secs.is_finite() || self.task_duration_secs < 0.0 {
            return Err(RunError::InvalidArgument(format!(
                "task duration must be a non-negative number of seconds, got {}",
                self.task_duration_secs
            )));
        }
        if self.worker_count == Some(0) {
            return Err(RunError::InvalidArgument(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.cpus == Some(0) {
            return Err(RunError::InvalidArgument(
                "CPU budget must be at least 1".to_string(),
            ));
        }
        if self.strategy == Strategy::Distributed && self.cpu_budget().is_none() {
            return Err(RunError::InvalidArgument(
                "the distributed strategy needs a CPU budget (--cpus or --workers)".to_string(),
            ));
        }
        Ok(())
    }

    /// The batch this config describes
    pub fn build_batch(&self) -> TaskBatch {
        let duration = Duration::try_from_secs_f64(self.task_duration_secs).unwrap_or_default();
        TaskBatch::uniform(self.task_count, duration)
    }

    /// Workers to start for `task_count` tasks: never more than the tasks, never zero.
    pub fn pool_size(&self, task_count: usize) -> usize {
        self.worker_count
            .unwrap_or(task_count)
            .min(task_count)
            .max(1)
    }
}

/// Wall-clock time of one strategy run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingResult {
    /// Strategy name
    pub strategy: String,
    /// Tasks in the batch
    pub task_count: usize,
    /// Elapsed wall-clock seconds
    pub elapsed_seconds: f64,
}

impl TimingResult {
    /// Elapsed time as a `Duration`
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_seconds.max(0.0))
    }
}

/// A way of executing a task batch
pub trait StrategyRunner: Send + Sync {
    /// Strategy this runner implements
    fn strategy(&self) -> Strategy;

    /// Run every task of `batch`, recording one progress event per completion
    fn execute(
        &self,
        batch: &TaskBatch,
        config: &ExecutionConfig,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<(), RunError>;

    /// Completions the run will record; fewer than the batch when a runner
    /// stops awaiting early
    fn tracked_total(&self, batch: &TaskBatch, _config: &ExecutionConfig) -> usize {
        batch.len()
    }

    /// Execute the batch under a stopwatch
    fn run(
        &self,
        batch: &TaskBatch,
        config: &ExecutionConfig,
        progress: Option<&mut dyn ProgressSink>,
    ) -> Result<TimingResult, RunError> {
        let total = self.tracked_total(batch, config);
        let stopwatch = Stopwatch::start();
        {
            let mut tracker = ProgressTracker::new(progress, total);
            self.execute(batch, config, &mut tracker)?;
        }
        let elapsed = stopwatch.stop();

        Ok(TimingResult {
            strategy: self.strategy().name().to_string(),
            task_count: batch.len(),
            elapsed_seconds: elapsed.as_secs_f64(),
        })
    }
}
