// src/command/mod.rs

//! Launching named external commands.
//!
//! A [`CliCommand`] is an immutable description of one program invocation:
//! program name, arguments, working directory, environment and how to turn
//! the finished process into a value. It can be run any number of times;
//! each [`run`](CliCommand::run) produces an independent
//! [`ProcessControl`] / [`CommandFuture`] pair.
//!
//! - [`resolve`] finds executables and caches the lookups.
//! - [`converter`] holds the [`ProcessResultConverter`] strategies.
//! - [`future`] holds [`CommandFuture`].

pub mod converter;
pub mod future;
pub mod resolve;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{LaunchFailure, ProcessError, Result};
use crate::exec::{LaunchSpec, io_runtime, spawn};
use crate::process::{ProcessControl, StandardInputHandler};

pub use converter::{
    ConvertFuture, ConverterExt, ProcessResultConverter, exit_code, exit_code_is_zero,
    raw_exit_code, strings, strings_matching, trailing_uri_with_trailing_digit_alone_on_line,
};
pub use future::CommandFuture;
pub use resolve::{clear_resolution_cache, resolve_executable};

/// Suppresses git's interactive credential prompts.
pub const GIT_TERMINAL_PROMPT: &str = "GIT_TERMINAL_PROMPT";

/// Suppresses gh's interactive prompts.
pub const GH_PROMPT_DISABLED: &str = "GH_PROMPT_DISABLED";

pub struct CliCommand<T> {
    program: String,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    kill_after: Option<Duration>,
    stdin: Option<Arc<dyn StandardInputHandler>>,
    settings: Arc<Settings>,
    converter: Arc<dyn ProcessResultConverter<T>>,
}

impl<T> Clone for CliCommand<T> {
    fn clone(&self) -> Self {
        Self {
            program: self.program.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            kill_after: self.kill_after,
            stdin: self.stdin.clone(),
            settings: Arc::clone(&self.settings),
            converter: Arc::clone(&self.converter),
        }
    }
}

impl<T> fmt::Debug for CliCommand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("kill_after", &self.kill_after)
            .finish()
    }
}

impl CliCommand<String> {
    /// A template with no working directory. Bind one with
    /// [`in_dir`](Self::in_dir) before running.
    pub fn template(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            kill_after: None,
            stdin: None,
            settings: Arc::new(Settings::default()),
            converter: Arc::new(strings()),
        }
    }

    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self::template(program).in_dir(working_dir)
    }

    /// `git`, with terminal credential prompts disabled.
    pub fn git(working_dir: impl Into<PathBuf>) -> Self {
        Self::new("git", working_dir).env(GIT_TERMINAL_PROMPT, "0")
    }

    /// `gh`, with interactive prompts disabled.
    pub fn gh(working_dir: impl Into<PathBuf>) -> Self {
        Self::new("gh", working_dir)
            .env(GIT_TERMINAL_PROMPT, "0")
            .env(GH_PROMPT_DISABLED, "1")
    }
}

impl<T: Send + 'static> CliCommand<T> {
    /// A copy of this command bound to `dir`.
    pub fn in_dir(&self, dir: impl Into<PathBuf>) -> Self {
        let mut bound = self.clone();
        bound.working_dir = Some(dir.into());
        bound
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Kill each launched process still running after `timeout`.
    pub fn kill_after(mut self, timeout: Duration) -> Self {
        self.kill_after = Some(timeout);
        self
    }

    /// Keep stdin open and consult `handler` once the process starts, then
    /// whenever input is requested again.
    pub fn with_stdin_handler(mut self, handler: impl StandardInputHandler + 'static) -> Self {
        self.stdin = Some(Arc::new(handler));
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Same invocation, different result type.
    pub fn with_converter<U, C>(self, converter: C) -> CliCommand<U>
    where
        C: ProcessResultConverter<U> + 'static,
    {
        CliCommand {
            program: self.program,
            args: self.args,
            working_dir: self.working_dir,
            env: self.env,
            kill_after: self.kill_after,
            stdin: self.stdin,
            settings: self.settings,
            converter: Arc::new(converter),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// `program arg1 arg2 ...`, for logs and error messages.
    pub fn description(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }

    /// Fail fast if this command cannot be launched as configured.
    pub fn validate(&self) -> Result<()> {
        let Some(dir) = &self.working_dir else {
            return Err(ProcessError::IllegalState(format!(
                "`{}` is a template without a working directory; bind one with in_dir()",
                self.description()
            )));
        };
        if !dir.is_dir() {
            return Err(ProcessError::IllegalArgument(format!(
                "working directory {} of `{}` is not a directory",
                dir.display(),
                self.description()
            )));
        }
        if self.program.trim().is_empty() {
            return Err(ProcessError::IllegalArgument("empty program name".to_string()));
        }
        Ok(())
    }

    /// Launch the command.
    ///
    /// Only misuse (see [`validate`](Self::validate)) fails here; every
    /// launch or process failure is reported through the returned future.
    pub fn run(&self) -> Result<CommandFuture<T>> {
        self.validate()?;

        let description = self.description();
        let mut control = ProcessControl::new(description.clone());
        if let Some(handler) = &self.stdin {
            control = control.with_stdin_handler(Arc::clone(handler))?;
            // Consult the handler as soon as the child starts.
            control.want_input();
        }

        let (tx, rx) = oneshot::channel();
        let future = CommandFuture::new(control.clone(), rx);

        let runtime = match io_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                let failure = LaunchFailure {
                    command: description,
                    attempts: 0,
                    reason: format!("process-io runtime unavailable: {e}"),
                };
                control.mark_launch_failed(failure.clone());
                let _ = tx.send(Err(ProcessError::LaunchFailed(failure)));
                return Ok(future);
            }
        };

        let command = self.clone();
        runtime.spawn(async move {
            let result = command.execute(control).await;
            // The caller may have dropped the future; nothing to do then.
            let _ = tx.send(result);
        });

        Ok(future)
    }

    async fn execute(self, control: ProcessControl<String, String>) -> Result<T> {
        let description = control.description().to_string();

        // validate() passed, so the working directory is set.
        let cwd = self.working_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let program = match resolve_executable(&self.program, &self.settings.search_paths, &cwd) {
            Ok(program) => program,
            Err(e) => {
                control.mark_launch_failed(LaunchFailure {
                    command: description,
                    attempts: 0,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        self.launch_with_retries(&program, &control).await?;

        if let Some(timeout) = self.kill_after {
            control.kill_after(timeout);
        }

        self.converter.convert(&description, control).await
    }

    /// Spawn, retrying a bounded number of times with a fixed pause. Spawn
    /// failures under process-table exhaustion are usually transient.
    async fn launch_with_retries(&self, program: &Path, control: &ProcessControl<String, String>) -> Result<()> {
        let launch = &self.settings.launch;
        let max_attempts = launch.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if let Err(e) = self.validate() {
                control.mark_launch_failed(LaunchFailure {
                    command: control.description().to_string(),
                    attempts: attempt - 1,
                    reason: e.to_string(),
                });
                return Err(e);
            }

            let spec = self.launch_spec(program, attempt);
            debug!(command = %control.description(), attempt, program = %program.display(), "launching process");

            match spawn(&spec, control) {
                Ok(()) => {
                    if attempt > 1 {
                        info!(command = %control.description(), attempt, "process launched after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        command = %control.description(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "process launch failed"
                    );
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(launch.retry_delay).await;
                    }
                }
            }
        }

        // Reported through the control; the converter turns it into the error.
        control.mark_launch_failed(LaunchFailure {
            command: control.description().to_string(),
            attempts: max_attempts,
            reason: last_error,
        });
        Ok(())
    }

    fn launch_spec(&self, program: &Path, attempt: u32) -> LaunchSpec {
        let mut env: BTreeMap<String, String> = self.settings.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if attempt > 1 {
            env.insert(GIT_TERMINAL_PROMPT.to_string(), "0".to_string());
        }

        LaunchSpec {
            program: program.to_path_buf(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: env.into_iter().collect(),
            keep_stdin_open: self.stdin.is_some(),
            drain_timeout: self.settings.launch.drain_timeout,
        }
    }
}
