//! Worker pool for parallel range scanning.
//!
//! This module provides:
//! - CPU workers that scan claimed chunks in ascending order
//! - A shared control signal for pause, resume and cancellation
//! - A write-once slot for the first match
//! - Exit notices that survive worker panics
//! - Heartbeats the coordinator uses to spot stalled workers

mod cpu;
mod event;
mod heartbeat;
mod pool;
mod signal;

pub use cpu::CpuWorker;
pub use event::{WorkerEvent, WorkerExit};
pub use heartbeat::Heartbeats;
pub use pool::{MatchResult, MatchSlot, RunContext, WorkerPool};
pub use signal::{ControlSignal, Mode};
