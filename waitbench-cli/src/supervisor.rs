//! Supervisor Process
//!
//! Spawns worker processes, hands them wait tasks over IPC and reports each
//! task's outcome as soon as it arrives.

use crate::error::TaskFailed;
use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use waitbench_core::TaskBatch;
use waitbench_ipc::{
    FrameError, FrameReader, FrameWriter, HeartbeatUnit, IPC_FD_ENV, SupervisorCommand,
    WORKER_FLAG, WorkerCapabilities, WorkerMessage,
};

/// Slack on top of a task's own duration before the worker is declared hung
pub const DEFAULT_TASK_GRACE: Duration = Duration::from_secs(30);

/// Lowest fd a parent-side pipe end may occupy; 3 and 4 are the worker's slots
const MIN_PIPE_FD: RawFd = 5;

/// Errors from spawning and talking to worker processes
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// A frame could not be moved or decoded
    #[error("IPC error: {0}")]
    IpcError(#[from] FrameError),

    /// The worker exited or its pipe closed
    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    /// The worker did not answer in time
    #[error("Timeout waiting for worker")]
    Timeout,

    /// The worker sent an unexpected message
    #[error("Worker protocol error: expected {expected}, got {got}")]
    ProtocolError {
        /// What the supervisor was waiting for
        expected: String,
        /// What arrived instead
        got: String,
    },
}

/// What happened to one task of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task waited its full duration
    Completed {
        /// Index of the task in its batch
        task_id: usize,
        /// Wait time measured inside the worker
        waited: Duration,
    },
    /// The task failed; siblings keep running
    Failed(TaskFailed),
}

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: i32, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data first: a closing pipe may still hold the final frame.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a close-on-exec pipe pair at fd 5 or above, returning (read_fd, write_fd).
///
/// The child dup2s its ends onto 3 and 4, which must not hold either pair.
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for i in 0..fds.len() {
        let moved = unsafe { libc::fcntl(fds[i], libc::F_DUPFD_CLOEXEC, MIN_PIPE_FD) };
        if moved < 0 {
            let err = std::io::Error::last_os_error();
            fds.iter().for_each(|&fd| close_fd(fd));
            return Err(err);
        }
        close_fd(fds[i]);
        fds[i] = moved;
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Worker process handle
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    capabilities: Option<WorkerCapabilities>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn a worker from `binary`, using fd 3/4 for IPC.
    pub fn spawn(binary: &Path) -> Result<Self, SupervisorError> {
        // cmd_pipe: supervisor writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: worker writes messages from fd 4 → supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            // Heartbeat units print here
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // In the child: dup cmd_read→3, msg_write→4, close originals.
        // Every pipe end sits at fd 5 or above, so neither dup2 clobbers another.
        // dup2 clears close-on-exec on the new descriptor.
        unsafe {
            command.pre_exec(move || {
                if libc::dup2(cmd_read, 3) < 0 || libc::dup2(msg_write, 4) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                libc::close(cmd_read);
                libc::close(msg_write);
                libc::close(cmd_write);
                libc::close(msg_read);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        // Child-side ends are not ours anymore
        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            capabilities: None,
            msg_read_fd: msg_read,
        };

        handle.wait_for_hello()?;
        debug!(pid = handle.pid(), "worker ready");
        Ok(handle)
    }

    /// Wait for Hello message from worker and validate protocol version
    fn wait_for_hello(&mut self) -> Result<(), SupervisorError> {
        let msg: WorkerMessage = self.reader.read()?;

        match msg {
            WorkerMessage::Hello(caps) => {
                if caps.protocol_version != waitbench_ipc::PROTOCOL_VERSION {
                    return Err(SupervisorError::ProtocolError {
                        expected: format!("protocol version {}", waitbench_ipc::PROTOCOL_VERSION),
                        got: format!("protocol version {}", caps.protocol_version),
                    });
                }
                self.capabilities = Some(caps);
                Ok(())
            }
            other => Err(SupervisorError::ProtocolError {
                expected: "Hello".to_string(),
                got: format!("{:?}", other),
            }),
        }
    }

    /// Get worker capabilities
    pub fn capabilities(&self) -> Option<&WorkerCapabilities> {
        self.capabilities.as_ref()
    }

    /// OS process id of the worker
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Run one wait task on this worker and wait for its reply
    pub fn run_task(
        &mut self,
        task_id: usize,
        duration_secs: f64,
        timeout: Duration,
    ) -> Result<TaskOutcome, SupervisorError> {
        self.writer.write(&SupervisorCommand::Run {
            task_id: task_id as u32,
            duration_secs,
        })?;

        match self.read_reply(timeout)? {
            WorkerMessage::Completed {
                task_id: reply_id,
                elapsed_nanos,
            } => {
                self.check_task_id(task_id, reply_id)?;
                Ok(TaskOutcome::Completed {
                    task_id,
                    waited: Duration::from_nanos(elapsed_nanos),
                })
            }
            WorkerMessage::Failed {
                task_id: reply_id,
                kind,
                message,
            } => {
                self.check_task_id(task_id, reply_id)?;
                Ok(TaskOutcome::Failed(TaskFailed {
                    task_id,
                    cause: kind.into(),
                    message,
                }))
            }
            other => Err(SupervisorError::ProtocolError {
                expected: "Completed/Failed".to_string(),
                got: format!("{:?}", other),
            }),
        }
    }

    fn check_task_id(&self, sent: usize, received: u32) -> Result<(), SupervisorError> {
        if sent as u32 == received {
            Ok(())
        } else {
            Err(SupervisorError::ProtocolError {
                expected: format!("reply for task {sent}"),
                got: format!("reply for task {received}"),
            })
        }
    }

    /// Read the next message, watching for worker death and the deadline.
    fn read_reply(&mut self, timeout: Duration) -> Result<WorkerMessage, SupervisorError> {
        let start = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                // The worker is stuck; it cannot be trusted with more tasks.
                let _ = self.kill();
                return Err(SupervisorError::Timeout);
            }

            // Buffered bytes may be an incomplete frame that never completes,
            // so check liveness either way.
            if self.reader.has_buffered_data() {
                if !self.is_alive() {
                    return Err(SupervisorError::WorkerCrashed(
                        "Worker process crashed with partial data buffered".to_string(),
                    ));
                }
            } else {
                let poll_timeout = remaining.min(Duration::from_millis(100));
                match wait_for_data(self.msg_read_fd, poll_timeout.as_millis() as i32) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Err(SupervisorError::WorkerCrashed(
                                "Worker process exited unexpectedly".to_string(),
                            ));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Err(SupervisorError::WorkerCrashed(
                            "Worker pipe closed unexpectedly".to_string(),
                        ));
                    }
                    PollResult::Error(e) => {
                        return Err(SupervisorError::WorkerCrashed(format!("Pipe error: {}", e)));
                    }
                }
            }

            return match self.reader.read::<WorkerMessage>() {
                Ok(msg) => Ok(msg),
                Err(FrameError::EndOfStream) => Err(SupervisorError::WorkerCrashed(
                    "Worker closed connection unexpectedly".to_string(),
                )),
                Err(e) if !self.is_alive() => Err(SupervisorError::WorkerCrashed(format!(
                    "Worker crashed during read: {}",
                    e
                ))),
                Err(e) => Err(e.into()),
            };
        }
    }

    /// Start a heartbeat unit. The worker runs it until SIGTERM and never replies.
    pub fn start_heartbeat(&mut self, unit: &HeartbeatUnit) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Heartbeat(unit.clone()))?;
        Ok(())
    }

    /// Ping the worker and wait for the reply
    pub fn ping(&mut self, timeout: Duration) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Ping)?;
        match self.read_reply(timeout)? {
            WorkerMessage::Pong => Ok(()),
            other => Err(SupervisorError::ProtocolError {
                expected: "Pong".to_string(),
                got: format!("{:?}", other),
            }),
        }
    }

    /// Shutdown the worker gracefully
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Shutdown)?;
        let _ = self.child.wait();
        Ok(())
    }

    /// Ask the worker to stop with SIGTERM without waiting for it
    pub fn terminate(&mut self) -> Result<(), SupervisorError> {
        if self.is_alive() {
            send_sigterm(self.child.id())?;
        }
        Ok(())
    }

    /// Check if worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the worker process forcefully
    pub fn kill(&mut self) -> Result<(), SupervisorError> {
        self.child.kill().map_err(SupervisorError::SpawnFailed)?;
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            // Graceful: SIGTERM first, brief wait, then SIGKILL
            let _ = send_sigterm(self.child.id());
            let deadline = Instant::now() + Duration::from_millis(200);
            while self.is_alive() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// Supervisor that owns a fixed number of worker processes and feeds them tasks
pub struct Supervisor {
    binary: PathBuf,
    num_workers: usize,
    grace: Duration,
}

impl Supervisor {
    /// Supervisor for `num_workers` workers spawned from `binary`
    pub fn new(binary: PathBuf, num_workers: usize) -> Self {
        Self {
            binary,
            num_workers: num_workers.max(1),
            grace: DEFAULT_TASK_GRACE,
        }
    }

    /// Supervisor whose workers re-execute the current binary
    pub fn for_current_exe(num_workers: usize) -> Result<Self, SupervisorError> {
        let binary = env::current_exe().map_err(SupervisorError::SpawnFailed)?;
        Ok(Self::new(binary, num_workers))
    }

    /// Override the slack allowed on top of each task's duration
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Number of worker processes this supervisor runs at most
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Spawn one worker
    pub fn spawn_worker(&self) -> Result<WorkerHandle, SupervisorError> {
        WorkerHandle::spawn(&self.binary)
    }

    /// Run every task of `batch`, calling `on_outcome` on the calling thread
    /// as each task finishes.
    ///
    /// At most `num_workers` tasks run at once. A failed task never stops its
    /// siblings. Returns the spawn error if no worker could be started at all,
    /// or if lanes died before every task was attempted.
    pub fn run_batch<F>(&self, batch: &TaskBatch, mut on_outcome: F) -> Result<(), SupervisorError>
    where
        F: FnMut(TaskOutcome),
    {
        if batch.is_empty() {
            return Ok(());
        }

        let worker_count = self.num_workers.min(batch.len());
        let next_task = AtomicUsize::new(0);
        let spawned = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<TaskOutcome>();

        let spawn_errors: Vec<SupervisorError> = std::thread::scope(|scope| {
            let lanes: Vec<_> = (0..worker_count)
                .map(|lane| {
                    let tx = tx.clone();
                    let next_task = &next_task;
                    let spawned = &spawned;
                    scope.spawn(move || self.drive_lane(lane, batch, next_task, spawned, tx))
                })
                .collect();
            drop(tx);

            for outcome in rx {
                on_outcome(outcome);
            }

            lanes
                .into_iter()
                .filter_map(|lane| match lane.join() {
                    Ok(result) => result.err(),
                    Err(_) => Some(SupervisorError::WorkerCrashed(
                        "supervisor lane panicked".to_string(),
                    )),
                })
                .collect()
        });

        let attempted = next_task.load(Ordering::SeqCst).min(batch.len());
        if attempted < batch.len() || spawned.load(Ordering::SeqCst) == 0 {
            if let Some(err) = spawn_errors.into_iter().next() {
                return Err(err);
            }
        }
        Ok(())
    }

    /// One lane owns one worker process and pulls tasks until the queue is empty.
    fn drive_lane(
        &self,
        lane: usize,
        batch: &TaskBatch,
        next_task: &AtomicUsize,
        spawned: &AtomicUsize,
        tx: mpsc::Sender<TaskOutcome>,
    ) -> Result<(), SupervisorError> {
        let mut idle: Option<WorkerHandle> = None;
        let mut spawn_error = None;

        loop {
            let task_id = next_task.fetch_add(1, Ordering::SeqCst);
            let Some(task) = batch.tasks().get(task_id) else {
                break;
            };

            let mut worker = match idle.take() {
                Some(worker) => worker,
                None => match self.spawn_worker() {
                    Ok(worker) => {
                        spawned.fetch_add(1, Ordering::SeqCst);
                        worker
                    }
                    Err(e) => {
                        // This lane is done; the claimed task fails and the rest of
                        // the queue goes to the other lanes.
                        warn!(lane, task_id, error = %e, "could not start worker");
                        let _ = tx.send(TaskOutcome::Failed(TaskFailed::from_supervisor_error(
                            task_id, &e,
                        )));
                        spawn_error = Some(e);
                        break;
                    }
                },
            };

            let timeout = timeout_for(task.duration_secs(), self.grace);
            let outcome = match worker.run_task(task_id, task.duration_secs(), timeout) {
                Ok(outcome) => {
                    idle = Some(worker);
                    outcome
                }
                Err(e) => {
                    // The stream may be out of sync; the next task gets a fresh worker.
                    warn!(lane, task_id, pid = worker.pid(), error = %e, "worker lost while running task");
                    drop(worker);
                    TaskOutcome::Failed(TaskFailed::from_supervisor_error(task_id, &e))
                }
            };

            if tx.send(outcome).is_err() {
                break;
            }
        }

        if let Some(worker) = idle {
            if let Err(e) = worker.shutdown() {
                debug!(lane, error = %e, "worker shutdown failed");
            }
        }
        spawn_error.map_or(Ok(()), Err)
    }
}

fn timeout_for(duration_secs: f64, grace: Duration) -> Duration {
    Duration::try_from_secs_f64(duration_secs)
        .unwrap_or(Duration::ZERO)
        .saturating_add(grace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_worker_floor() {
        let supervisor = Supervisor::new(PathBuf::from("/nonexistent"), 0);
        assert_eq!(supervisor.num_workers(), 1);
    }

    #[test]
    fn test_empty_batch_spawns_nothing() {
        let supervisor = Supervisor::new(PathBuf::from("/nonexistent/waitbench"), 4);
        let mut seen = 0;
        supervisor
            .run_batch(&TaskBatch::default(), |_| seen += 1)
            .unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let supervisor = Supervisor::new(PathBuf::from("/nonexistent/waitbench"), 2);
        let batch = TaskBatch::uniform(3, Duration::from_millis(1));
        let mut failed = Vec::new();
        let err = supervisor
            .run_batch(&batch, |outcome| {
                if let TaskOutcome::Failed(f) = outcome {
                    failed.push(f);
                }
            })
            .unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed(_)), "{err:?}");
        // Each lane fails the one task it claimed and stops.
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|f| f.cause == crate::FailureCause::WorkerLost));
    }

    #[test]
    fn test_pipe_ends_stay_clear_of_worker_fds() {
        let pipes = [create_pipe().unwrap(), create_pipe().unwrap()];
        for (read, write) in pipes {
            assert!(read >= MIN_PIPE_FD && write >= MIN_PIPE_FD, "{read}/{write}");
            let flags = unsafe { libc::fcntl(read, libc::F_GETFD) };
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
            close_fd(read);
            close_fd(write);
        }
    }

    #[test]
    fn test_timeout_for_negative_duration_uses_grace() {
        assert_eq!(timeout_for(-1.0, Duration::from_secs(5)), Duration::from_secs(5));
        assert_eq!(
            timeout_for(1.5, Duration::from_secs(1)),
            Duration::from_millis(2_500)
        );
    }
}
