//! Worker Process Entry Point
//!
//! The worker side of the process pool. A worker executes wait tasks and
//! heartbeat units on request from its supervisor.
//!
//! On Unix, uses the fd pair named by `WAITBENCH_IPC_FD` (normally 3/4) and
//! installs a SIGTERM handler for graceful shutdown. Elsewhere, falls back to
//! stdin/stdout and skips signal handling.

use crate::heartbeat::run_unit;
use crate::task::WaitTask;
use std::sync::atomic::{AtomicBool, Ordering};
use waitbench_ipc::{
    FailureKind, FrameReader, FrameWriter, HeartbeatUnit, IPC_FD_ENV, SupervisorCommand,
    WorkerCapabilities, WorkerMessage,
};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler is async-signal-safe (only sets an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        let parts: Vec<&str> = val.split(',').collect();
        if parts.len() == 2 {
            if let (Ok(r), Ok(w)) = (parts[0].parse::<i32>(), parts[1].parse::<i32>()) {
                return IpcTransport::Fds {
                    read_fd: r,
                    write_fd: w,
                };
            }
        }
        tracing::warn!(
            value = %val,
            "invalid {IPC_FD_ENV} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
}

impl WorkerMain {
    /// Create a worker on the inherited fd pair, or stdin/stdout without one.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_io(Box::new(read_file), Box::new(write_file))
            }
            IpcTransport::Stdio => {
                Self::with_io(Box::new(std::io::stdin()), Box::new(std::io::stdout()))
            }
        }
    }

    /// Create a worker over arbitrary streams
    pub fn with_io(reader: Box<dyn std::io::Read>, writer: Box<dyn std::io::Write>) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Run the worker main loop until `Shutdown`, end of stream or SIGTERM.
    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        install_sigterm_handler();

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::default()))?;

        loop {
            if shutdown_requested() {
                break;
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                // Supervisor went away; nothing left to do.
                Err(waitbench_ipc::FrameError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            };

            match command {
                SupervisorCommand::Run {
                    task_id,
                    duration_secs,
                } => {
                    let reply = run_task(task_id, duration_secs);
                    self.writer.write(&reply)?;
                }
                SupervisorCommand::Heartbeat(unit) => {
                    self.run_heartbeat(&unit)?;
                    break;
                }
                SupervisorCommand::Ping => {
                    self.writer.write(&WorkerMessage::Pong)?;
                }
                SupervisorCommand::Shutdown => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Heartbeats write to the inherited stdout, never to the IPC pipe.
    fn run_heartbeat(&mut self, unit: &HeartbeatUnit) -> std::io::Result<()> {
        tracing::debug!(
            unit = crate::heartbeat::unit_name(unit),
            pid = std::process::id(),
            "worker running heartbeat unit"
        );
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        run_unit(unit, &mut out, shutdown_requested)
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute one task and turn the outcome into a reply for the supervisor.
pub fn run_task(task_id: u32, duration_secs: f64) -> WorkerMessage {
    let task = WaitTask::new(duration_secs);
    let result = std::panic::catch_unwind(|| task.execute());

    match result {
        Ok(Ok(waited)) => WorkerMessage::Completed {
            task_id,
            elapsed_nanos: waited.as_nanos() as u64,
        },
        Ok(Err(e)) => WorkerMessage::Failed {
            task_id,
            kind: FailureKind::InvalidArgument,
            message: e.to_string(),
        },
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            WorkerMessage::Failed {
                task_id,
                kind: FailureKind::Panic,
                message,
            }
        }
    }
}
