//! Process runner.
//!
//! Every run is its own child process, placed in its own process group on
//! Unix so cancellation reaches anything it spawns. Cancellation is
//! two-phase: SIGTERM, a grace period, then SIGKILL.

mod handle;
mod output;
mod process;
mod slots;
pub(crate) mod supervisor;
pub(crate) mod terminate;

pub use handle::{ExecutionHandle, ExecutionStatus, FailureKind, FailureReason, KillHandle};
pub use output::{Channel, OutputChunk, OutputStream};
pub use process::{Deadline, ExecutionRequest, ProcessRunner, RunnerOptions, StdinPolicy};
pub use slots::RunSlots;

pub(crate) use handle::RunControl;
