// src/process/control.rs

//! Per-process control object.
//!
//! A [`ProcessControl`] exists before its OS process does. The I/O driver
//! feeds it the lifecycle callbacks in order:
//!
//! ```text
//! on_pre_start(handle) -> on_start() -> on_stdout/on_stderr/on_stdin_ready ... -> on_reaped(code) -> on_exit(code)
//! ```
//!
//! and any thread may query, await or kill it meanwhile. All state lives in
//! one [`AtomicProcessState`]; transitions are CAS updates, so a `kill()`
//! racing an `on_exit()` cannot lose either effect.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::{LaunchFailure, ProcessError, Result};
use crate::process::kill_queue::{KillQueue, KillToken};
use crate::process::output::{OutputHandler, StringOutputHandler};
use crate::process::state::{AtomicProcessState, MAX_EXIT_CODE, ProcessState, RunningStatus};
use crate::process::stdin::{LoggingStdinHandler, StandardInputHandler};

/// Exit code recorded for a process that could never be launched.
pub const LAUNCH_FAILED_EXIT_CODE: i32 = 127;

/// The OS side of a running process, as seen by its control.
///
/// None of these may block; they only signal the I/O driver.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Forcibly terminate the process.
    fn destroy(&self);

    /// Ask the driver to call `on_stdin_ready` once stdin is writable.
    fn want_write(&self);

    /// Close the child's stdin.
    fn close_stdin(&self);
}

/// Type-erased view of a control, used by stdin handlers and the kill queue.
pub trait ControlledProcess: Send + Sync {
    fn describe(&self) -> String;

    fn pid(&self) -> Option<u32>;

    fn state(&self) -> ProcessState;

    fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// See [`ProcessControl::kill`].
    fn kill(&self) -> bool;
}

type ExitListener = Box<dyn FnOnce(ProcessState) + Send>;

/// Point-in-time snapshot of a process and its output.
///
/// Taken while the process runs, the output is partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult<O, E> {
    pub state: ProcessState,
    pub stdout: O,
    pub stderr: E,
}

impl<O, E> ProcessResult<O, E> {
    /// Effective exit code, see [`ProcessState::effective_exit_code`].
    pub fn exit_code(&self) -> i32 {
        self.state.effective_exit_code()
    }

    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }

    pub fn was_killed(&self) -> bool {
        self.state.was_killed()
    }
}

#[derive(Default)]
struct ExitLatch {
    done: Mutex<bool>,
    cv: Condvar,
}

impl ExitLatch {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self) {
        *self.lock() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut done = self.lock();
        while !*done {
            done = self
                .cv
                .wait(done)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let done = self.lock();
        let (done, _) = self
            .cv
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *done
    }
}

struct Inner<O, E> {
    description: String,
    state: AtomicProcessState,
    handle: OnceLock<Box<dyn ProcessHandle>>,
    stdout: Arc<dyn OutputHandler<Output = O>>,
    stderr: Arc<dyn OutputHandler<Output = E>>,
    stdin: Arc<dyn StandardInputHandler>,
    listeners: Mutex<Vec<ExitListener>>,
    latch: ExitLatch,
    exited_tx: watch::Sender<bool>,
    kill_token: Mutex<Option<KillToken>>,
    launch_failure: OnceLock<LaunchFailure>,
    completed: AtomicBool,
}

impl<O, E> Inner<O, E> {
    fn new(
        description: String,
        state: ProcessState,
        stdout: Arc<dyn OutputHandler<Output = O>>,
        stderr: Arc<dyn OutputHandler<Output = E>>,
        stdin: Arc<dyn StandardInputHandler>,
        listeners: Vec<ExitListener>,
    ) -> Self {
        let (exited_tx, _) = watch::channel(false);
        Self {
            description,
            state: AtomicProcessState::new(state),
            handle: OnceLock::new(),
            stdout,
            stderr,
            stdin,
            listeners: Mutex::new(listeners),
            latch: ExitLatch::default(),
            exited_tx,
            kill_token: Mutex::new(None),
            launch_failure: OnceLock::new(),
            completed: AtomicBool::new(false),
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<ExitListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wake waiters and run listeners with the terminal state. Only the
    /// first call has an effect.
    fn complete(&self, final_state: ProcessState) {
        if self.completed.swap(true, Ordering::AcqRel) {
            debug!(process = %self.description, "ignoring duplicate exit callback");
            return;
        }
        debug!(process = %self.describe(), state = %final_state, "process exited");

        if let Some(token) = self
            .kill_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            KillQueue::global().cancel(token);
        }

        // Waiters first, so a listener may itself wait on this process.
        self.latch.release();
        self.exited_tx.send_replace(true);

        let listeners: Vec<ExitListener> = std::mem::take(&mut *self.lock_listeners());
        for listener in listeners {
            listener(final_state);
        }
    }
}

impl<O, E> ControlledProcess for Inner<O, E> {
    fn describe(&self) -> String {
        match self.pid() {
            Some(pid) => format!("{} (pid {pid})", self.description),
            None => self.description.clone(),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.handle.get().and_then(|h| h.pid())
    }

    fn state(&self) -> ProcessState {
        self.state.get()
    }

    fn kill(&self) -> bool {
        if self.launch_failure.get().is_some() {
            return true;
        }

        let (old, new) = self.state.update(|s| {
            if s.is_exited() {
                None
            } else {
                Some(s.killed())
            }
        });
        if old.is_exited() {
            return false;
        }

        match self.handle.get() {
            Some(handle) if new.is_running() => {
                debug!(process = %self.describe(), "destroying process");
                handle.destroy();
                true
            }
            // Not started yet: on_start sees the flag and destroys.
            _ => {
                debug!(process = %self.description, status = ?new.status(), "kill deferred until start");
                false
            }
        }
    }
}

/// Shared, cloneable handle bound to one OS process.
pub struct ProcessControl<O, E> {
    inner: Arc<Inner<O, E>>,
}

impl<O, E> Clone for ProcessControl<O, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O, E> fmt::Debug for ProcessControl<O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessControl")
            .field("description", &self.inner.description)
            .field("pid", &self.inner.pid())
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl ProcessControl<String, String> {
    /// Control collecting stdout and stderr as strings.
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_handlers(
            description,
            StringOutputHandler::new(),
            StringOutputHandler::new(),
        )
    }

    /// A control for a launch that never happened. Already exited, its
    /// `kill()` is a no-op returning true.
    pub fn failed(description: impl Into<String>, failure: LaunchFailure) -> Self {
        let control = Self::new(description);
        control.mark_launch_failed(failure);
        control
    }
}

impl<O: 'static, E: 'static> ProcessControl<O, E> {
    pub fn with_handlers<HO, HE>(description: impl Into<String>, stdout: HO, stderr: HE) -> Self
    where
        HO: OutputHandler<Output = O> + 'static,
        HE: OutputHandler<Output = E> + 'static,
    {
        Self {
            inner: Arc::new(Inner::new(
                description.into(),
                ProcessState::new(),
                Arc::new(stdout),
                Arc::new(stderr),
                Arc::new(LoggingStdinHandler),
                Vec::new(),
            )),
        }
    }

    /// Rebuild with different handlers. Only legal on an unstarted,
    /// unshared control.
    fn rebuild<O2, E2>(
        self,
        stdout: impl FnOnce(Arc<dyn OutputHandler<Output = O>>) -> Arc<dyn OutputHandler<Output = O2>>,
        stderr: impl FnOnce(Arc<dyn OutputHandler<Output = E>>) -> Arc<dyn OutputHandler<Output = E2>>,
        stdin: Option<Arc<dyn StandardInputHandler>>,
    ) -> Result<ProcessControl<O2, E2>> {
        let state = self.inner.state.get();
        if state.status() != RunningStatus::Uninitialized {
            return Err(ProcessError::IllegalState(format!(
                "cannot replace handlers of `{}`: process is already {}",
                self.inner.description, state
            )));
        }

        let inner = Arc::try_unwrap(self.inner).map_err(|inner| {
            ProcessError::IllegalState(format!(
                "cannot replace handlers of `{}`: control is shared",
                inner.description
            ))
        })?;

        let listeners = inner
            .listeners
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(ProcessControl {
            inner: Arc::new(Inner::new(
                inner.description,
                state,
                stdout(inner.stdout),
                stderr(inner.stderr),
                stdin.unwrap_or(inner.stdin),
                listeners,
            )),
        })
    }

    /// Replace the stdout handler. Fails once the process left
    /// `UNINITIALIZED`.
    pub fn with_output_handler<O2: 'static, H>(self, handler: H) -> Result<ProcessControl<O2, E>>
    where
        H: OutputHandler<Output = O2> + 'static,
    {
        let handler: Arc<dyn OutputHandler<Output = O2>> = Arc::new(handler);
        self.rebuild(move |_| handler, |e| e, None)
    }

    /// Replace the stderr handler. Fails once the process left
    /// `UNINITIALIZED`.
    pub fn with_error_handler<E2: 'static, H>(self, handler: H) -> Result<ProcessControl<O, E2>>
    where
        H: OutputHandler<Output = E2> + 'static,
    {
        let handler: Arc<dyn OutputHandler<Output = E2>> = Arc::new(handler);
        self.rebuild(|o| o, move |_| handler, None)
    }

    pub fn with_stdin_handler(self, handler: Arc<dyn StandardInputHandler>) -> Result<Self> {
        self.rebuild(|o| o, |e| e, Some(handler))
    }

    /// Register with the global [`KillQueue`]; the process is killed if it
    /// is still running once `timeout` has elapsed.
    pub fn kill_after(&self, timeout: Duration) -> &Self {
        if self.inner.state.get().is_exited() {
            return self;
        }

        let weak: Weak<Inner<O, E>> = Arc::downgrade(&self.inner);
        let token = KillQueue::global().enqueue(weak as Weak<dyn ControlledProcess>, timeout);

        let previous = self
            .inner
            .kill_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token);
        if let Some(previous) = previous {
            KillQueue::global().cancel(previous);
        }

        // Exit may have raced the registration; don't leave it behind.
        if self.inner.state.get().is_exited() {
            KillQueue::global().cancel(token);
        }
        self
    }

    /// Register with a specific queue. The entry is pruned by the queue once
    /// the process exits.
    pub fn kill_after_in(&self, queue: &KillQueue, timeout: Duration) -> KillToken {
        let weak: Weak<Inner<O, E>> = Arc::downgrade(&self.inner);
        queue.enqueue(weak as Weak<dyn ControlledProcess>, timeout)
    }

    /// Type-erased view of this control.
    pub fn as_controlled(&self) -> Arc<dyn ControlledProcess> {
        self.inner.clone()
    }
}

impl<O, E> ProcessControl<O, E> {
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    pub fn state(&self) -> ProcessState {
        self.inner.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Effective exit code: `-1` until exit, `i32::MAX` if killed.
    pub fn exit_value(&self) -> i32 {
        self.state().effective_exit_code()
    }

    /// Set when the process could not be launched at all.
    pub fn launch_failure(&self) -> Option<&LaunchFailure> {
        self.inner.launch_failure.get()
    }

    /// Forcibly terminate the process.
    ///
    /// Returns true if a running process was destroyed. Before start the
    /// kill is recorded and carried out by `on_start`; after exit it does
    /// nothing and returns false. Calling it repeatedly is harmless.
    pub fn kill(&self) -> bool {
        self.inner.kill()
    }

    /// Ask for the stdin handler to be consulted.
    pub fn want_input(&self) {
        let (old, new) = self.inner.state.update(|s| {
            if s.is_exited() {
                None
            } else {
                Some(s.wanting_input())
            }
        });
        if old == new {
            return;
        }
        if new.is_running() {
            if let Some(handle) = self.inner.handle.get() {
                handle.want_write();
            }
        }
    }

    pub fn close_stdin(&self) {
        if let Some(handle) = self.inner.handle.get() {
            handle.close_stdin();
        }
    }

    /// Best-effort snapshot; never blocks on the process.
    pub fn result(&self) -> ProcessResult<O, E> {
        ProcessResult {
            state: self.state(),
            stdout: self.inner.stdout.result(),
            stderr: self.inner.stderr.result(),
        }
    }

    /// Call `listener` with the final state once the process exits. If it
    /// already has, the listener runs immediately on this thread.
    pub fn on_exit_listener<F>(&self, listener: F)
    where
        F: FnOnce(ProcessState) + Send + 'static,
    {
        let mut listeners = self.inner.lock_listeners();
        let state = self.inner.state.get();
        if state.is_exited() {
            drop(listeners);
            listener(state);
        } else {
            listeners.push(Box::new(listener));
        }
    }

    /// Block the calling thread until the process exits.
    ///
    /// Do not call from inside an async task; use [`exited`](Self::exited).
    pub fn await_exit(&self) -> ProcessState {
        self.inner.latch.wait();
        self.state()
    }

    /// Block for at most `timeout`. Returns true if the process exited.
    pub fn await_exit_timeout(&self, timeout: Duration) -> bool {
        self.inner.latch.wait_timeout(timeout)
    }

    /// Resolves with the final state once the process exits.
    pub async fn exited(&self) -> ProcessState {
        let mut rx = self.inner.exited_tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|done| *done).await;
        self.state()
    }

    /// Turn this control into a permanently failed one.
    pub(crate) fn mark_launch_failed(&self, failure: LaunchFailure) {
        warn!(command = %failure.command, attempts = failure.attempts, reason = %failure.reason, "process launch failed");
        if self.inner.launch_failure.set(failure).is_err() {
            return;
        }

        let (old, new) = self.inner.state.update(|s| {
            if s.is_exited() {
                None
            } else {
                s.with_exit_code(LAUNCH_FAILED_EXIT_CODE).ok()
            }
        });
        if old != new {
            self.inner.complete(new);
        }
    }

    // ---- callbacks from the I/O driver ----

    /// The OS process exists; bind its handle.
    pub fn on_pre_start(&self, handle: Box<dyn ProcessHandle>) {
        if self.inner.handle.set(handle).is_err() {
            warn!(process = %self.inner.description, "on_pre_start called twice; keeping first handle");
            return;
        }
        self.inner.state.update(|s| {
            (s.status() == RunningStatus::Uninitialized).then(|| s.to_state(RunningStatus::Starting))
        });
    }

    /// The OS process is running. Carries out a kill or input request that
    /// arrived before this point.
    pub fn on_start(&self) {
        let (_, state) = self.inner.state.update(|s| {
            (s.status() < RunningStatus::Running).then(|| s.to_state(RunningStatus::Running))
        });
        debug!(process = %self.inner.describe(), "process started");

        let Some(handle) = self.inner.handle.get() else {
            warn!(process = %self.inner.description, "on_start without a bound handle");
            return;
        };
        if state.was_killed() {
            debug!(process = %self.inner.describe(), "kill requested before start; destroying");
            handle.destroy();
        }
        if state.wants_input() {
            handle.want_write();
        }
    }

    pub fn on_stdout(&self, chunk: &[u8], last: bool) {
        self.inner.stdout.on_output(chunk, last);
    }

    pub fn on_stderr(&self, chunk: &[u8], last: bool) {
        self.inner.stderr.on_output(chunk, last);
    }

    /// Fill `buffer` with bytes for the child. Returns true if the handler
    /// has more to send.
    pub fn on_stdin_ready(&self, buffer: &mut Vec<u8>) -> bool {
        let more = self.inner.stdin.on_stdin_ready(self.inner.as_ref(), buffer);
        if !more {
            self.inner.state.update(|s| Some(s.not_wanting_input()));
        }
        more
    }

    /// The OS reaped the process with `code`; output may still be in
    /// flight. From here on the process counts as exited, so `kill()` is a
    /// no-op, but waiters and listeners are held until [`on_exit`](Self::on_exit).
    pub fn on_reaped(&self, code: i32) {
        self.publish_exit(code);
    }

    /// The process exited with `code` and its output is complete. Only the
    /// first exit code reported (here or through `on_reaped`) is kept, and
    /// listeners fire once.
    pub fn on_exit(&self, code: i32) {
        let state = self.publish_exit(code);
        self.inner.complete(state);
    }

    /// Apply the exit transition unless already exited; returns the
    /// terminal state either way.
    fn publish_exit(&self, code: i32) -> ProcessState {
        let code = if (0..=MAX_EXIT_CODE).contains(&code) {
            code
        } else {
            MAX_EXIT_CODE
        };
        let (_, state) = self.inner.state.update(|s| {
            if s.is_exited() {
                return None;
            }
            let exited = s.with_exit_code(code).ok()?;
            Some(if s.was_killed() { exited.killed() } else { exited })
        });
        state
    }
}
