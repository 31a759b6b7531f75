#![warn(missing_docs)]
//! Waitbench IPC Protocol
//!
//! rkyv-archived messages for supervisor-worker communication and for calls
//! submitted to the distributed pool. Framing is a 4-byte little-endian length
//! prefix followed by the archived payload.

mod framing;
mod messages;

pub use framing::{
    FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, decode, encode, read_frame, write_frame,
};
pub use messages::{
    FailureKind, HeartbeatUnit, RemoteCall, RemoteOutcome, SupervisorCommand, WorkerCapabilities,
    WorkerMessage,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the `<read_fd>,<write_fd>` pair for a worker
pub const IPC_FD_ENV: &str = "WAITBENCH_IPC_FD";

/// Command-line flag that puts the binary into worker mode
pub const WORKER_FLAG: &str = "--wait-worker";
