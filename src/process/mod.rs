// src/process/mod.rs

//! Process control core.
//!
//! - [`state`] packs running status, killed / wants-input flags and the exit
//!   code into one atomic integer.
//! - [`output`] holds the stdout / stderr sinks.
//! - [`stdin`] holds the callbacks consulted when a process wants input.
//! - [`control`] binds all of the above to one OS process.
//! - [`kill_queue`] is the watchdog behind `ProcessControl::kill_after`.
//!
//! Nothing here spawns processes; see [`crate::exec`] for the tokio-backed
//! driver that produces the lifecycle callbacks.

pub mod control;
pub mod kill_queue;
pub mod output;
pub mod state;
pub mod stdin;

pub use control::{
    ControlledProcess, LAUNCH_FAILED_EXIT_CODE, ProcessControl, ProcessHandle, ProcessResult,
};
pub use kill_queue::{KillQueue, KillToken};
pub use output::{
    LinesOutputHandler, MappedOutputHandler, NullOutputHandler, OutputHandler, OutputHandlerExt,
    StringOutputHandler,
};
pub use state::{
    AtomicProcessState, KILLED_EXIT_CODE, MAX_EXIT_CODE, NOT_EXITED_EXIT_CODE, ProcessState,
    RunningStatus,
};
pub use stdin::{
    AbortOnInput, LoggingStdinHandler, StandardInputHandler, StaticInputHandler, abort_on_input,
};
