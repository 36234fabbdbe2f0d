// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Low-level spawn / IO errors are wrapped into these variants at the
//! process boundary so callers never see a raw platform error.

use std::fmt;

use thiserror::Error;

/// Details of a launch that could not be completed after all retries.
///
/// Kept separate from [`ProcessError`] so a permanently-failed
/// `ProcessControl` can hold on to it and hand out fresh errors on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchFailure {
    pub command: String,
    pub attempts: u32,
    pub reason: String,
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not launch `{}` after {} attempt(s): {}",
            self.command, self.attempts, self.reason
        )
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Executable not found: {name}")]
    ExecutableNotFound { name: String },

    #[error("Launch failed: {0}")]
    LaunchFailed(LaunchFailure),

    #[error("{description} failed with exit code {exit_code}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    ProcessFailed {
        description: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcessError {
    /// True for failures that happened before any process could run.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            ProcessError::ExecutableNotFound { .. } | ProcessError::LaunchFailed(_)
        )
    }

    /// Effective exit code carried by a process failure, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::ProcessFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
