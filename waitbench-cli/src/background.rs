//! Background Heartbeats
//!
//! Launches the two heartbeat units (elapsed ticker and announcer) on
//! threads, worker processes or distributed pool CPUs, then keeps them running
//! until the process is interrupted.

use crate::distributed::{DistributedPool, ObjectRef};
use crate::error::RunError;
use crate::supervisor::{Supervisor, WorkerHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info, warn};
use waitbench_core::StopFlag;
use waitbench_core::heartbeat::{self, run_unit, unit_name};
use waitbench_ipc::{HeartbeatUnit, RemoteCall};

/// Where heartbeat units run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionContext {
    /// One OS thread per unit
    #[default]
    Thread,
    /// One worker process per unit
    Process,
    /// One remote call per unit on a distributed pool
    Distributed,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionContext::Thread => "thread",
            ExecutionContext::Process => "process",
            ExecutionContext::Distributed => "distributed",
        })
    }
}

impl FromStr for ExecutionContext {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" | "threads" => Ok(ExecutionContext::Thread),
            "process" | "processes" => Ok(ExecutionContext::Process),
            "distributed" => Ok(ExecutionContext::Distributed),
            _ => Err(RunError::InvalidArgument(format!(
                "unknown context '{s}' (expected thread, process or distributed)"
            ))),
        }
    }
}

/// What to launch and where
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Ticker interval
    pub tick: Duration,
    /// Announcer interval
    pub announce: Duration,
    /// Announcer text
    pub message: String,
    /// Execution context for both units
    pub context: ExecutionContext,
    /// CPU budget of the distributed pool
    pub cpus: usize,
    /// Binary spawned for process workers; the current executable when unset
    pub worker_binary: Option<PathBuf>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick: heartbeat::DEFAULT_TICK_INTERVAL,
            announce: heartbeat::DEFAULT_ANNOUNCE_INTERVAL,
            message: heartbeat::DEFAULT_ANNOUNCEMENT.to_string(),
            context: ExecutionContext::default(),
            cpus: 1,
            worker_binary: None,
        }
    }
}

impl HeartbeatConfig {
    /// Ticker first, then announcer
    pub fn units(&self) -> Vec<HeartbeatUnit> {
        vec![
            heartbeat::ticker(self.tick),
            heartbeat::announcer(self.announce, self.message.clone()),
        ]
    }

    fn validate(&self) -> Result<(), RunError> {
        if self.tick.is_zero() || self.announce.is_zero() {
            return Err(RunError::InvalidArgument(
                "heartbeat intervals must be greater than zero".to_string(),
            ));
        }
        if self.context == ExecutionContext::Distributed && self.cpus == 0 {
            return Err(RunError::InvalidArgument(
                "distributed heartbeats need at least one CPU".to_string(),
            ));
        }
        Ok(())
    }
}

enum Running {
    Threads {
        stop: StopFlag,
        handles: Vec<JoinHandle<()>>,
    },
    Processes {
        workers: Vec<WorkerHandle>,
    },
    Distributed {
        pool: DistributedPool,
        refs: Vec<ObjectRef>,
    },
}

/// Heartbeat units running in the background
pub struct BackgroundProcessSet {
    context: ExecutionContext,
    running: Running,
}

impl BackgroundProcessSet {
    /// Start both units in the configured context
    pub fn launch(config: &HeartbeatConfig) -> Result<Self, RunError> {
        config.validate()?;
        let units = config.units();

        let running = match config.context {
            ExecutionContext::Thread => Self::launch_threads(units)?,
            ExecutionContext::Process => Self::launch_processes(config, &units)?,
            ExecutionContext::Distributed => {
                let pool = DistributedPool::init(config.cpus)?;
                let refs = units
                    .into_iter()
                    .map(|unit| pool.submit(&RemoteCall::Heartbeat(unit)))
                    .collect::<Result<Vec<_>, _>>()?;
                if refs.len() > pool.cpus() {
                    info!(
                        units = refs.len(),
                        cpus = pool.cpus(),
                        "not enough CPUs, some units stay queued"
                    );
                }
                Running::Distributed { pool, refs }
            }
        };

        debug!(context = %config.context, "heartbeat units launched");
        Ok(Self {
            context: config.context,
            running,
        })
    }

    fn launch_threads(units: Vec<HeartbeatUnit>) -> Result<Running, RunError> {
        let stop = StopFlag::new();
        let mut handles = Vec::with_capacity(units.len());

        for unit in units {
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("heartbeat-{}", unit_name(&unit)))
                .spawn(move || {
                    let mut out = std::io::stdout();
                    if let Err(e) = run_unit(&unit, &mut out, || stop.is_raised()) {
                        warn!(unit = unit_name(&unit), error = %e, "heartbeat unit stopped");
                    }
                })?;
            handles.push(handle);
        }
        Ok(Running::Threads { stop, handles })
    }

    fn launch_processes(
        config: &HeartbeatConfig,
        units: &[HeartbeatUnit],
    ) -> Result<Running, RunError> {
        let supervisor = match &config.worker_binary {
            Some(binary) => Supervisor::new(binary.clone(), units.len()),
            None => Supervisor::for_current_exe(units.len())?,
        };

        let mut workers = Vec::with_capacity(units.len());
        for unit in units {
            let mut worker = supervisor.spawn_worker()?;
            worker.start_heartbeat(unit)?;
            debug!(unit = unit_name(unit), pid = worker.pid(), "heartbeat worker started");
            workers.push(worker);
        }
        Ok(Running::Processes { workers })
    }

    /// Context the units run in
    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    /// Number of launched units
    pub fn len(&self) -> usize {
        match &self.running {
            Running::Threads { handles, .. } => handles.len(),
            Running::Processes { workers } => workers.len(),
            Running::Distributed { refs, .. } => refs.len(),
        }
    }

    /// Whether nothing was launched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every unit. Does not wait for pending output.
    pub fn shutdown(self) {
        match self.running {
            Running::Threads { stop, handles } => {
                stop.raise();
                for handle in handles {
                    if handle.join().is_err() {
                        warn!("heartbeat thread panicked");
                    }
                }
            }
            Running::Processes { mut workers } => {
                for worker in &mut workers {
                    if let Err(e) = worker.terminate() {
                        warn!(pid = worker.pid(), error = %e, "failed to signal heartbeat worker");
                    }
                }
                // Dropping a handle reaps its process, killing it if SIGTERM was ignored.
                drop(workers);
            }
            Running::Distributed { pool, refs } => {
                drop(refs);
                drop(pool);
            }
        }
        debug!(context = %self.context, "heartbeat units stopped");
    }

    /// Launch the units, block until SIGINT or SIGTERM, then stop them
    pub fn run_until_interrupted(config: &HeartbeatConfig) -> Result<InterruptKind, RunError> {
        // Listen before launching so an early Ctrl-C is not lost.
        let mut interrupt = Interrupt::install()?;
        let set = Self::launch(config)?;
        let kind = interrupt.wait();
        info!(signal = %kind, "stopping heartbeat units");
        set.shutdown();
        Ok(kind)
    }
}

/// Signal that ended a background run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// SIGINT (Ctrl-C)
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InterruptKind::Interrupt => "SIGINT",
            InterruptKind::Terminate => "SIGTERM",
        })
    }
}

/// SIGINT/SIGTERM listener
pub struct Interrupt {
    runtime: Runtime,
    sigint: Signal,
    sigterm: Signal,
}

impl Interrupt {
    /// Start listening. Signals arriving from now on are not lost.
    pub fn install() -> Result<Self, RunError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (sigint, sigterm) = {
            let _guard = runtime.enter();
            (
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            )
        };
        Ok(Self {
            runtime,
            sigint,
            sigterm,
        })
    }

    /// Block until the next SIGINT or SIGTERM
    pub fn wait(&mut self) -> InterruptKind {
        let Self {
            runtime,
            sigint,
            sigterm,
        } = self;
        runtime.block_on(async {
            tokio::select! {
                _ = sigint.recv() => InterruptKind::Interrupt,
                _ = sigterm.recv() => InterruptKind::Terminate,
            }
        })
    }
}
