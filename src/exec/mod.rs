// src/exec/mod.rs

//! Process execution layer.
//!
//! This module actually runs child processes, using
//! `tokio::process::Command`, and reports their lifecycle to a
//! [`ProcessControl`](crate::process::ProcessControl) through its callbacks.
//!
//! - [`runtime`] owns the shared process-I/O tokio runtime.
//! - [`driver`] spawns one child and runs its pump / supervisor tasks.

pub mod driver;
pub mod runtime;

pub use driver::{LaunchSpec, exit_code_of, spawn};
pub use runtime::io_runtime;
