// src/lib.rs

//! Process control for external command-line tools.
//!
//! Launch `git`, `gh` or any executable as a typed, awaitable, killable unit
//! of work:
//!
//! ```no_run
//! use procctl::command::CliCommand;
//!
//! let out = CliCommand::git(".").arg("status").arg("--short").run()?.wait()?;
//! # Ok::<(), procctl::errors::ProcessError>(())
//! ```
//!
//! Layers, bottom up:
//! - [`process`]: packed process state, output / stdin handlers, the
//!   per-process [`ProcessControl`](process::ProcessControl) and the
//!   kill-after-timeout watchdog.
//! - [`exec`]: the tokio runtime and driver that spawn children and feed
//!   their lifecycle into a control.
//! - [`command`]: [`CliCommand`](command::CliCommand), executable
//!   resolution, launch retries and result converters.

pub mod cli;
pub mod command;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod process;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::{CliArgs, OutputMode};
use crate::command::{
    CliCommand, exit_code_is_zero, raw_exit_code, strings,
    trailing_uri_with_trailing_digit_alone_on_line,
};
use crate::config::{default_config_path, load_and_validate, load_or_default};
use crate::errors::ProcessError;
use crate::process::KILLED_EXIT_CODE;

/// OS exit status used by the binary when the child was killed.
pub const KILLED_STATUS: i32 = 137;

/// High-level entry point used by `main.rs`. Returns the status the binary
/// should exit with.
pub fn run(args: CliArgs) -> Result<i32> {
    let settings = match &args.config {
        Some(path) => load_and_validate(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => load_or_default(default_config_path())?,
    };

    let cwd = match &args.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    let Some((program, rest)) = args.command.split_first() else {
        anyhow::bail!("no command given");
    };

    let mut command = CliCommand::new(program.clone(), cwd)
        .args(rest.iter().cloned())
        .with_settings(settings);
    if let Some(timeout) = args.kill_after {
        command = command.kill_after(timeout);
    }
    debug!(command = %command.description(), mode = ?args.mode, "running");

    match args.mode {
        OutputMode::Stdout => report(command.with_converter(strings()).run()?.wait(), |out| {
            print!("{out}");
        }),
        OutputMode::Status => report(command.with_converter(exit_code_is_zero()).run()?.wait(), |ok| {
            println!("{ok}");
        }),
        OutputMode::ExitCode => {
            let code = command.with_converter(raw_exit_code()).run()?.wait()?;
            println!("{code}");
            Ok(os_status(code))
        }
        OutputMode::Uri => report(
            command
                .with_converter(trailing_uri_with_trailing_digit_alone_on_line())
                .run()?
                .wait(),
            |url| println!("{url}"),
        ),
    }
}

fn report<T>(result: crate::errors::Result<T>, print: impl FnOnce(T)) -> Result<i32> {
    match result {
        Ok(value) => {
            print(value);
            Ok(0)
        }
        Err(ProcessError::ProcessFailed {
            exit_code, stderr, ..
        }) => {
            eprint!("{stderr}");
            Ok(os_status(exit_code))
        }
        Err(other) => Err(other.into()),
    }
}

/// Map an effective exit code onto something the OS can carry.
pub fn os_status(effective: i32) -> i32 {
    match effective {
        KILLED_EXIT_CODE => KILLED_STATUS,
        code if code < 0 => 1,
        code => code.min(255),
    }
}
