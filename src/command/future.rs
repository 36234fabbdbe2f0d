// src/command/future.rs

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::errors::{ProcessError, Result};
use crate::process::ProcessControl;

/// Pending result of [`CliCommand::run`](super::CliCommand::run).
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain
/// thread. The underlying [`ProcessControl`] is available immediately for
/// killing or peeking at partial output.
#[derive(Debug)]
pub struct CommandFuture<T> {
    control: ProcessControl<String, String>,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> CommandFuture<T> {
    pub(crate) fn new(control: ProcessControl<String, String>, rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { control, rx }
    }

    pub fn control(&self) -> &ProcessControl<String, String> {
        &self.control
    }

    /// Shorthand for `control().kill()`.
    pub fn kill(&self) -> bool {
        self.control.kill()
    }

    /// Block the current thread until the result is ready.
    ///
    /// Panics if called from within an async context; `.await` instead.
    pub fn wait(self) -> Result<T> {
        let description = self.control.description().to_string();
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(abandoned(&description)))
    }

    /// Like [`wait`](Self::wait), but gives up once the process has not
    /// exited within `timeout` and hands the future back.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Self> {
        if !self.control.await_exit_timeout(timeout) {
            return Err(self);
        }
        Ok(self.wait())
    }
}

fn abandoned(description: &str) -> ProcessError {
    ProcessError::Other(anyhow::anyhow!(
        "process task for `{description}` ended without producing a result"
    ))
}

impl<T> Future for CommandFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(abandoned(self.control.description()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
