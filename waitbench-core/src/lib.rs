#![warn(missing_docs)]
//! Waitbench Core - Tasks and Worker Runtime
//!
//! This crate provides the pieces every execution strategy shares:
//! - `WaitTask` / `TaskBatch`, the idle work being benchmarked
//! - `Stopwatch` for wall-clock measurement
//! - `ProgressSink` / `ProgressTracker` for completion events
//! - Heartbeat units for the background demonstration
//! - `WorkerMain`, the process-pool worker loop

pub mod heartbeat;
mod measure;
mod progress;
mod task;
mod worker;

pub use heartbeat::StopFlag;
pub use measure::Stopwatch;
pub use progress::{ProgressEvent, ProgressSink, ProgressTracker, RecordingSink};
pub use task::{TaskBatch, TaskError, WaitTask};
pub use worker::{WorkerMain, run_task, shutdown_requested};
