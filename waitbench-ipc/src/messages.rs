//! IPC Message Types
//!
//! Everything that crosses a process or distributed-worker boundary. All
//! messages are archived with rkyv and validated on read.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// A non-terminating background unit a worker can be asked to run.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum HeartbeatUnit {
    /// Prints how many whole seconds have passed since the unit started.
    Ticker {
        /// Tick interval in nanoseconds
        interval_nanos: u64,
    },
    /// Prints a fixed message on every interval.
    Announcer {
        /// Announcement interval in nanoseconds
        interval_nanos: u64,
        /// Text to print
        message: String,
    },
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// OS process id of the worker
    pub pid: u32,
    /// Number of logical CPUs visible to the worker
    pub cpu_count: u32,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            cpu_count: num_cpus(),
        }
    }
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Execute one wait task
    Run {
        /// Position of the task in its batch
        task_id: u32,
        /// Wait duration in seconds
        duration_secs: f64,
    },

    /// Run a heartbeat unit until shutdown is requested
    Heartbeat(HeartbeatUnit),

    /// Liveness check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// A task finished waiting
    Completed {
        /// Task the result belongs to
        task_id: u32,
        /// Time spent inside the task, measured by the worker
        elapsed_nanos: u64,
    },

    /// A task could not run
    Failed {
        /// Task the failure belongs to
        task_id: u32,
        /// Failure category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },

    /// Reply to `Ping`
    Pong,
}

/// Categories of task failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Rejected before waiting (negative or non-finite duration)
    InvalidArgument,
    /// The task panicked
    Panic,
    /// The worker was asked to stop while the task was waiting
    Interrupted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::InvalidArgument => "invalid argument",
            FailureKind::Panic => "panic",
            FailureKind::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// A unit of work submitted to the distributed pool.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum RemoteCall {
    /// Execute one wait task
    Wait {
        /// Position of the task in its batch
        task_id: u32,
        /// Wait duration in seconds
        duration_secs: f64,
    },
    /// Run a heartbeat unit until the pool shuts down
    Heartbeat(HeartbeatUnit),
}

/// Result of a [`RemoteCall`], serialized back across the pool boundary.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum RemoteOutcome {
    /// The call finished normally
    Completed {
        /// Task the result belongs to (0 for heartbeat units)
        task_id: u32,
        /// Time spent executing the call
        elapsed_nanos: u64,
    },
    /// The call failed
    Failed {
        /// Task the failure belongs to (0 for heartbeat units)
        task_id: u32,
        /// Failure category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },
}

impl RemoteOutcome {
    /// Task id carried by either variant
    pub fn task_id(&self) -> u32 {
        match self {
            RemoteOutcome::Completed { task_id, .. } | RemoteOutcome::Failed { task_id, .. } => {
                *task_id
            }
        }
    }
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode};

    #[test]
    fn test_worker_capabilities_default() {
        let caps = WorkerCapabilities::default();
        assert_eq!(caps.protocol_version, crate::PROTOCOL_VERSION);
        assert_eq!(caps.pid, std::process::id());
        assert!(caps.cpu_count >= 1);
    }

    #[test]
    fn test_heartbeat_unit_survives_boundary() {
        let unit = HeartbeatUnit::Announcer {
            interval_nanos: 5_000_000_000,
            message: "task is running".to_string(),
        };
        let bytes = encode(&RemoteCall::Heartbeat(unit.clone())).unwrap();
        match decode::<RemoteCall>(&bytes).unwrap() {
            RemoteCall::Heartbeat(decoded) => assert_eq!(decoded, unit),
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[test]
    fn test_remote_outcome_task_id() {
        let failed = RemoteOutcome::Failed {
            task_id: 3,
            kind: FailureKind::InvalidArgument,
            message: "negative".to_string(),
        };
        assert_eq!(failed.task_id(), 3);

        let done = RemoteOutcome::Completed {
            task_id: 9,
            elapsed_nanos: 1,
        };
        assert_eq!(done.task_id(), 9);
    }
}
