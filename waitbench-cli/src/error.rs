//! Run Errors
//!
//! Errors surfaced by strategy runners. Sequential work fails fast; pools
//! collect every task failure and surface them together as [`RunError::Failed`].

use crate::supervisor::SupervisorError;
use std::fmt;
use thiserror::Error;
use waitbench_core::TaskError;
use waitbench_ipc::{FailureKind, FrameError};

/// Why a single task did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Rejected before waiting (negative or non-finite duration)
    InvalidArgument,
    /// The task panicked
    Panic,
    /// The task was stopped before it finished
    Interrupted,
    /// The task or its result could not cross the execution boundary
    Serialization,
    /// The worker running the task died or stopped answering
    WorkerLost,
}

impl From<FailureKind> for FailureCause {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::InvalidArgument => FailureCause::InvalidArgument,
            FailureKind::Panic => FailureCause::Panic,
            FailureKind::Interrupted => FailureCause::Interrupted,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureCause::InvalidArgument => "invalid argument",
            FailureCause::Panic => "panic",
            FailureCause::Interrupted => "interrupted",
            FailureCause::Serialization => "serialization failure",
            FailureCause::WorkerLost => "worker lost",
        };
        f.write_str(label)
    }
}

/// A task that failed, with its position in the batch
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailed {
    /// Index of the task in its batch
    pub task_id: usize,
    /// Failure category
    pub cause: FailureCause,
    /// Human-readable message
    pub message: String,
}

impl TaskFailed {
    /// Failure from a local task error
    pub fn from_task_error(task_id: usize, error: TaskError) -> Self {
        match error {
            TaskError::InvalidArgument(message) => Self {
                task_id,
                cause: FailureCause::InvalidArgument,
                message,
            },
        }
    }

    /// Failure from a frame encode/decode or transport error
    pub fn from_frame_error(task_id: usize, error: &FrameError) -> Self {
        let cause = if error.is_codec() {
            FailureCause::Serialization
        } else {
            FailureCause::WorkerLost
        };
        Self {
            task_id,
            cause,
            message: error.to_string(),
        }
    }

    /// Failure of a task whose worker process misbehaved.
    ///
    /// Only codec errors count as serialization failures; a broken pipe or a
    /// dead worker is a lost worker.
    pub fn from_supervisor_error(task_id: usize, error: &SupervisorError) -> Self {
        match error {
            SupervisorError::IpcError(frame) => Self::from_frame_error(task_id, frame),
            other => Self {
                task_id,
                cause: FailureCause::WorkerLost,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for TaskFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} ({}): {}", self.task_id, self.cause, self.message)
    }
}

/// Errors that end a strategy run
#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration rejected at harness entry
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// First failing task of a fail-fast strategy
    #[error("{0}")]
    TaskFailure(TaskFailed),

    /// A value could not cross an execution boundary outside any task
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// Every failure of a collect-all strategy
    #[error("{count} of {total} tasks failed: {summary}", count = .failures.len(), summary = summarize(.failures))]
    Failed {
        /// Tasks in the run
        total: usize,
        /// Failures in completion order
        failures: Vec<TaskFailed>,
    },

    /// The process pool could not be run
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// A runtime or thread pool could not be built
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl RunError {
    /// Wrap the first failing task of a fail-fast run
    pub fn task(task_id: usize, error: TaskError) -> Self {
        RunError::TaskFailure(TaskFailed::from_task_error(task_id, error))
    }

    /// Ok when nothing failed, otherwise every failure together
    pub fn collect(total: usize, failures: Vec<TaskFailed>) -> Result<(), RunError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RunError::Failed { total, failures })
        }
    }

    /// Whether the run was rejected because of a bad argument, either up front
    /// or by a task refusing its duration
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            RunError::InvalidArgument(_) => true,
            RunError::TaskFailure(failed) => failed.cause == FailureCause::InvalidArgument,
            RunError::Failed { failures, .. } => failures
                .iter()
                .all(|f| f.cause == FailureCause::InvalidArgument),
            _ => false,
        }
    }

    /// Failed tasks carried by this error
    pub fn failures(&self) -> &[TaskFailed] {
        match self {
            RunError::TaskFailure(failed) => std::slice::from_ref(failed),
            RunError::Failed { failures, .. } => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[TaskFailed]) -> String {
    const SHOWN: usize = 3;
    let mut parts: Vec<String> = failures.iter().take(SHOWN).map(|f| f.to_string()).collect();
    if failures.len() > SHOWN {
        parts.push(format!("and {} more", failures.len() - SHOWN));
    }
    parts.join("; ")
}
