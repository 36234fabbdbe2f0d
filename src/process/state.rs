// src/process/state.rs

//! Packed, immutable process state.
//!
//! A [`ProcessState`] is a single `u32`:
//!
//! ```text
//! bits 0-1   running status (UNINITIALIZED / STARTING / RUNNING / EXITED)
//! bit  2     killed
//! bit  3     wants input
//! bits 4-19  exit code, 0..=32768
//! ```
//!
//! Every transition is a pure function returning a new value, which makes
//! them usable from the compare-and-swap loop in [`AtomicProcessState`].

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::errors::{ProcessError, Result};

/// Largest exit code a state can record.
pub const MAX_EXIT_CODE: i32 = 32768;

/// Effective exit code reported for killed processes.
pub const KILLED_EXIT_CODE: i32 = i32::MAX;

/// Effective exit code reported while the process has not exited.
pub const NOT_EXITED_EXIT_CODE: i32 = -1;

const STATUS_MASK: u32 = 0b11;
const KILLED_BIT: u32 = 1 << 2;
const WANTS_INPUT_BIT: u32 = 1 << 3;
const EXIT_CODE_SHIFT: u32 = 4;
const EXIT_CODE_MASK: u32 = 0xFFFF << EXIT_CODE_SHIFT;

/// Lifecycle position of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunningStatus {
    Uninitialized,
    Starting,
    Running,
    Exited,
}

impl RunningStatus {
    fn bits(self) -> u32 {
        match self {
            RunningStatus::Uninitialized => 0,
            RunningStatus::Starting => 1,
            RunningStatus::Running => 2,
            RunningStatus::Exited => 3,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits & STATUS_MASK {
            0 => RunningStatus::Uninitialized,
            1 => RunningStatus::Starting,
            2 => RunningStatus::Running,
            _ => RunningStatus::Exited,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessState(u32);

impl ProcessState {
    /// A fresh, never-started state.
    pub const fn new() -> Self {
        ProcessState(0)
    }

    /// Rebuild a state from its packed representation.
    pub const fn from_bits(bits: u32) -> Self {
        ProcessState(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn status(self) -> RunningStatus {
        RunningStatus::from_bits(self.0)
    }

    pub fn was_killed(self) -> bool {
        self.0 & KILLED_BIT != 0
    }

    pub fn wants_input(self) -> bool {
        self.0 & WANTS_INPUT_BIT != 0
    }

    /// The recorded exit code. Only meaningful once [`is_exited`](Self::is_exited).
    pub fn exit_code(self) -> i32 {
        ((self.0 & EXIT_CODE_MASK) >> EXIT_CODE_SHIFT) as i32
    }

    pub fn is_running(self) -> bool {
        self.status() == RunningStatus::Running
    }

    pub fn is_exited(self) -> bool {
        self.status() == RunningStatus::Exited
    }

    /// True once the process left `UNINITIALIZED`.
    pub fn is_started(self) -> bool {
        self.status() != RunningStatus::Uninitialized
    }

    /// `i32::MAX` if killed, `-1` if not exited, else the real exit code.
    pub fn effective_exit_code(self) -> i32 {
        if self.was_killed() {
            KILLED_EXIT_CODE
        } else if !self.is_exited() {
            NOT_EXITED_EXIT_CODE
        } else {
            self.exit_code()
        }
    }

    /// Exited normally with code zero and was not killed.
    pub fn is_success(self) -> bool {
        self.effective_exit_code() == 0
    }

    /// Terminal state with the given code. Clears the killed and input
    /// flags; callers that need to keep `killed` re-apply it.
    pub fn with_exit_code(self, code: i32) -> Result<Self> {
        if !(0..=MAX_EXIT_CODE).contains(&code) {
            return Err(ProcessError::IllegalArgument(format!(
                "exit code {code} outside 0..={MAX_EXIT_CODE}"
            )));
        }
        Ok(ProcessState(
            RunningStatus::Exited.bits() | ((code as u32) << EXIT_CODE_SHIFT),
        ))
    }

    pub fn killed(self) -> Self {
        ProcessState(self.0 | KILLED_BIT)
    }

    pub fn wanting_input(self) -> Self {
        ProcessState(self.0 | WANTS_INPUT_BIT)
    }

    pub fn not_wanting_input(self) -> Self {
        ProcessState(self.0 & !WANTS_INPUT_BIT)
    }

    pub fn to_state(self, status: RunningStatus) -> Self {
        ProcessState((self.0 & !STATUS_MASK) | status.bits())
    }
}

impl fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessState")
            .field("status", &self.status())
            .field("killed", &self.was_killed())
            .field("wants_input", &self.wants_input())
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            RunningStatus::Exited if self.was_killed() => write!(f, "killed"),
            RunningStatus::Exited => write!(f, "exited({})", self.exit_code()),
            other => {
                write!(f, "{}", format!("{other:?}").to_lowercase())?;
                if self.was_killed() {
                    write!(f, "+killed")?;
                }
                if self.wants_input() {
                    write!(f, "+input")?;
                }
                Ok(())
            }
        }
    }
}

/// Lock-free cell holding a [`ProcessState`].
#[derive(Debug, Default)]
pub struct AtomicProcessState(AtomicU32);

impl AtomicProcessState {
    pub fn new(initial: ProcessState) -> Self {
        AtomicProcessState(AtomicU32::new(initial.bits()))
    }

    pub fn get(&self) -> ProcessState {
        ProcessState(self.0.load(Ordering::Acquire))
    }

    /// Apply `f` with a CAS loop and return `(old, new)`.
    ///
    /// Returning `None` from `f` leaves the cell untouched; so does returning
    /// the old value, which skips a redundant publish.
    pub fn update<F>(&self, mut f: F) -> (ProcessState, ProcessState)
    where
        F: FnMut(ProcessState) -> Option<ProcessState>,
    {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let old = ProcessState(current);
            let new = match f(old) {
                Some(new) if new != old => new,
                _ => return (old, old),
            };
            match self.0.compare_exchange_weak(
                current,
                new.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (old, new),
                Err(actual) => current = actual,
            }
        }
    }
}
