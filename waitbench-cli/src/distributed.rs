//! Distributed Worker Pool
//!
//! An in-process cluster with a declared CPU budget. Work is submitted as
//! rkyv-encoded [`RemoteCall`]s and admitted by a semaphore holding one permit
//! per CPU; results come back encoded the same way and are handed out through
//! [`ObjectRef`] futures.
//!
//! Submission is fire-and-forget. Dropping the pool abandons whatever is still
//! pending without blocking.

use crate::error::RunError;
use futures_util::future::{join_all, select_all};
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::runtime::Runtime;
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, warn};
use waitbench_core::heartbeat::{run_unit, unit_name};
use waitbench_core::{StopFlag, Stopwatch, WaitTask};
use waitbench_ipc::{FailureKind, RemoteCall, RemoteOutcome, decode, encode};

/// Result delivered for one submitted call
#[derive(Debug)]
pub struct ObjectResult {
    /// Id of the [`ObjectRef`] this result belongs to
    pub id: u64,
    /// Decoded outcome, or why none could be produced
    pub outcome: Result<RemoteOutcome, RunError>,
}

/// Handle to the eventual result of a submitted call
#[derive(Debug)]
pub struct ObjectRef {
    id: u64,
    rx: oneshot::Receiver<Result<RemoteOutcome, RunError>>,
}

impl ObjectRef {
    /// Pool-unique id, assigned in submission order
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for ObjectRef {
    type Output = ObjectResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|received| ObjectResult {
            id,
            outcome: received.unwrap_or_else(|_| {
                Err(RunError::Runtime(std::io::Error::other(
                    "distributed pool shut down before the call finished",
                )))
            }),
        })
    }
}

/// In-process worker pool with a CPU budget
pub struct DistributedPool {
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    cpus: usize,
    stop: StopFlag,
    next_id: AtomicU64,
}

impl fmt::Debug for DistributedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedPool")
            .field("cpus", &self.cpus)
            .field("available", &self.permits.available_permits())
            .field("running", &self.runtime.is_some())
            .finish()
    }
}

impl DistributedPool {
    /// Start a pool that runs at most `cpus` calls at once
    pub fn init(cpus: usize) -> Result<Self, RunError> {
        if cpus == 0 {
            return Err(RunError::InvalidArgument(
                "distributed pool needs at least one CPU".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("waitbench-node")
            .enable_all()
            .build()?;
        debug!(cpus, "distributed pool started");

        Ok(Self {
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(cpus)),
            cpus,
            stop: StopFlag::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// CPU budget of the pool
    pub fn cpus(&self) -> usize {
        self.cpus
    }

    /// Flag raised when the pool shuts down; long-running calls poll it
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    fn runtime(&self) -> Result<&Runtime, RunError> {
        self.runtime.as_ref().ok_or_else(|| {
            RunError::Runtime(std::io::Error::other("distributed pool is shut down"))
        })
    }

    /// Submit a call. It starts as soon as a CPU is free.
    pub fn submit(&self, call: &RemoteCall) -> Result<ObjectRef, RunError> {
        let payload = encode(call)
            .map_err(|e| RunError::SerializationFailure(e.to_string()))?
            .to_vec();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);
        let stop = self.stop.clone();

        self.runtime()?.spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                execute_remote(&payload, &stop)
            })
            .await;

            let result = joined.unwrap_or_else(|e| {
                Err(RunError::Runtime(std::io::Error::other(format!(
                    "remote call {id} did not finish: {e}"
                ))))
            });
            // The caller may have stopped listening.
            let _ = tx.send(result);
        });

        Ok(ObjectRef { id, rx })
    }

    /// Block until every call in `refs` has a result
    pub fn get(&self, refs: Vec<ObjectRef>) -> Result<Vec<ObjectResult>, RunError> {
        Ok(self.runtime()?.block_on(join_all(refs)))
    }

    /// Block until `num_returns` of `refs` are ready.
    ///
    /// Returns the ready results in completion order and the refs still pending.
    pub fn wait(
        &self,
        refs: Vec<ObjectRef>,
        num_returns: usize,
    ) -> Result<(Vec<ObjectResult>, Vec<ObjectRef>), RunError> {
        let wanted = num_returns.min(refs.len());
        let runtime = self.runtime()?;

        let mut ready = Vec::with_capacity(wanted);
        let mut pending = refs;
        while ready.len() < wanted {
            let (result, _index, rest) = runtime.block_on(select_all(pending));
            ready.push(result);
            pending = rest;
        }
        Ok((ready, pending))
    }
}

impl Drop for DistributedPool {
    fn drop(&mut self) {
        self.stop.raise();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Decode a call, run it and encode its outcome, as a remote worker would.
fn execute_remote(payload: &[u8], stop: &StopFlag) -> Result<RemoteOutcome, RunError> {
    let call: RemoteCall =
        decode(payload).map_err(|e| RunError::SerializationFailure(e.to_string()))?;

    let outcome = match call {
        RemoteCall::Wait {
            task_id,
            duration_secs,
        } => run_wait(task_id, duration_secs),
        RemoteCall::Heartbeat(unit) => {
            debug!(unit = unit_name(&unit), "remote heartbeat started");
            let stopwatch = Stopwatch::start();
            // Unlocked handle: units on other CPUs share stdout.
            let mut out = std::io::stdout();
            let run = run_unit(&unit, &mut out, || stop.is_raised());
            let _ = out.flush();
            match run {
                Ok(()) => RemoteOutcome::Completed {
                    task_id: 0,
                    elapsed_nanos: stopwatch.stop().as_nanos() as u64,
                },
                Err(e) => {
                    warn!(error = %e, "remote heartbeat stopped");
                    RemoteOutcome::Failed {
                        task_id: 0,
                        kind: FailureKind::Interrupted,
                        message: e.to_string(),
                    }
                }
            }
        }
    };

    let encoded = encode(&outcome).map_err(|e| RunError::SerializationFailure(e.to_string()))?;
    decode(&encoded).map_err(|e| RunError::SerializationFailure(e.to_string()))
}

fn run_wait(task_id: u32, duration_secs: f64) -> RemoteOutcome {
    let task = WaitTask::new(duration_secs);
    match catch_unwind(AssertUnwindSafe(|| task.execute())) {
        Ok(Ok(waited)) => RemoteOutcome::Completed {
            task_id,
            elapsed_nanos: waited.as_nanos() as u64,
        },
        Ok(Err(e)) => RemoteOutcome::Failed {
            task_id,
            kind: FailureKind::InvalidArgument,
            message: e.to_string(),
        },
        Err(_) => RemoteOutcome::Failed {
            task_id,
            kind: FailureKind::Panic,
            message: format!("remote call for task {task_id} panicked"),
        },
    }
}
