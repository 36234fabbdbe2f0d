// src/process/stdin.rs

//! Callbacks consulted when a process wants input on stdin.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::process::control::ControlledProcess;

/// Supplies bytes for a child's stdin.
///
/// Called on the process-I/O runtime whenever the control requested
/// write-readiness. Whatever is left in `buffer` is written to the child.
/// Return `true` to be called again, `false` when there is nothing more to
/// send right now.
pub trait StandardInputHandler: Send + Sync {
    fn on_stdin_ready(&self, control: &dyn ControlledProcess, buffer: &mut Vec<u8>) -> bool;
}

/// Default handler: logs that input was requested and declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStdinHandler;

impl StandardInputHandler for LoggingStdinHandler {
    fn on_stdin_ready(&self, control: &dyn ControlledProcess, _buffer: &mut Vec<u8>) -> bool {
        warn!(
            process = %control.describe(),
            "process wants input on stdin; no input handler configured"
        );
        false
    }
}

/// Kills the process as soon as it asks for input, after invoking a
/// callback. Keeps non-interactive invocations from hanging on a prompt.
pub struct AbortOnInput<F> {
    on_abort: F,
}

impl<F> AbortOnInput<F>
where
    F: Fn(&dyn ControlledProcess) + Send + Sync,
{
    pub fn new(on_abort: F) -> Self {
        Self { on_abort }
    }
}

/// [`AbortOnInput`] with a callback that only logs.
pub fn abort_on_input() -> AbortOnInput<fn(&dyn ControlledProcess)> {
    fn log_abort(control: &dyn ControlledProcess) {
        info!(process = %control.describe(), "aborting process that requested input");
    }
    AbortOnInput::new(log_abort as fn(&dyn ControlledProcess))
}

impl<F> StandardInputHandler for AbortOnInput<F>
where
    F: Fn(&dyn ControlledProcess) + Send + Sync,
{
    fn on_stdin_ready(&self, control: &dyn ControlledProcess, _buffer: &mut Vec<u8>) -> bool {
        (self.on_abort)(control);
        control.kill();
        false
    }
}

/// Writes a fixed payload once, then declines.
#[derive(Debug)]
pub struct StaticInputHandler {
    payload: Mutex<Option<Vec<u8>>>,
}

impl StaticInputHandler {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Mutex::new(Some(payload.into())),
        }
    }
}

impl StandardInputHandler for StaticInputHandler {
    fn on_stdin_ready(&self, _control: &dyn ControlledProcess, buffer: &mut Vec<u8>) -> bool {
        let taken = self
            .payload
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(bytes) = taken {
            buffer.extend_from_slice(&bytes);
        }
        false
    }
}
