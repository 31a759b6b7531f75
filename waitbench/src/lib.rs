#![warn(missing_docs)]
//! # Waitbench
//!
//! Compare concurrency models on idle workloads.
//!
//! Waitbench runs a batch of identical wait tasks under several execution
//! strategies and reports the wall-clock time each one takes:
//! - **Sequential**: one task at a time on the calling thread
//! - **Cooperative**: timer-driven tasks on a single-threaded tokio runtime
//! - **Thread pool**: a bounded rayon pool of OS threads
//! - **Process pool**: worker processes speaking rkyv frames over pipes
//! - **Distributed**: an in-process cluster with a CPU budget and
//!   fire-and-forget submission
//!
//! It also ships a heartbeat demonstration that runs an elapsed-time ticker and
//! an announcer on threads, processes or pool workers until interrupted.
//!
//! ## Quick Start
//!
//! ```ignore
//! use waitbench::{Strategy, run_strategy};
//!
//! let timing = run_strategy(Strategy::Cooperative, 10, 1.0, None)?;
//! assert!(timing.elapsed_seconds < 2.0);
//! ```
//!
//! ## Tracking Progress
//!
//! ```ignore
//! use waitbench::{ExecutionConfig, RecordingSink, Strategy, run_benchmark};
//!
//! let config = ExecutionConfig::new(Strategy::ThreadPool, 8, 0.5).with_workers(4);
//! let mut sink = RecordingSink::default();
//! run_benchmark(&config, Some(&mut sink))?;
//! assert_eq!(sink.last().unwrap().completed, 8);
//! ```

// Re-export core types
pub use waitbench_core::{
    ProgressEvent, ProgressSink, ProgressTracker, RecordingSink, StopFlag, Stopwatch, TaskBatch,
    TaskError, WaitTask, heartbeat,
};

// Re-export wire types
pub use waitbench_ipc::{
    FailureKind, HeartbeatUnit, PROTOCOL_VERSION, RemoteCall, RemoteOutcome, WorkerCapabilities,
};

// Re-export runners, harness and heartbeat launcher
pub use waitbench_cli::{
    BackgroundProcessSet, BenchReport, CooperativeRunner, DistributedPool, DistributedRunner,
    ExecutionConfig, ExecutionContext, FailureCause, FailureMode, HeartbeatConfig, ObjectRef,
    ObjectResult, OutputFormat, ProcessPoolRunner, RunError, SequentialRunner, Strategy,
    StrategyOutcome, StrategyRunner, Supervisor, SupervisorError, TaskFailed, TaskOutcome,
    ThreadPoolRunner, TimingResult, WaitbenchConfig, WorkerHandle, format_result_line,
    parse_strategies, run_all, run_benchmark, run_strategy, runner_for,
};

/// Run the Waitbench CLI.
///
/// Call this from a binary's `main()`:
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     waitbench::run()
/// }
/// ```
pub use waitbench_cli::run;
