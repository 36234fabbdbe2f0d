// src/exec/driver.rs

//! Drives one `tokio::process::Child` and turns its lifecycle into the
//! `ProcessControl` callbacks.
//!
//! Per process this spawns:
//! - one pump task per output stream, delivering chunks in OS order;
//! - one stdin feeder (only if stdin is kept open);
//! - one supervisor that waits for exit, honours kill requests, reports
//!   the exit code at once and completes the control once the pumps drain.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::process::{ProcessControl, ProcessHandle};

/// Read size for stdout / stderr chunks.
const CHUNK_SIZE: usize = 8 * 1024;

/// Everything needed to start the OS process once.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Keep the child's stdin pipe open for a stdin handler.
    pub keep_stdin_open: bool,
    /// How long to wait for the output pumps after the process exited.
    pub drain_timeout: Duration,
}

#[derive(Default)]
struct DriverSignals {
    kill: Notify,
    want_write: Notify,
    close_stdin: Notify,
}

/// [`ProcessHandle`] backed by notifications to the driver tasks.
struct TokioHandle {
    pid: Option<u32>,
    signals: Arc<DriverSignals>,
}

impl ProcessHandle for TokioHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn destroy(&self) {
        self.signals.kill.notify_one();
    }

    fn want_write(&self) {
        self.signals.want_write.notify_one();
    }

    fn close_stdin(&self) {
        self.signals.close_stdin.notify_one();
    }
}

/// Spawn the process described by `spec` and attach it to `control`.
///
/// Must run inside the process-I/O runtime. On error nothing was started and
/// `control` is untouched, so the caller may retry.
pub fn spawn<O, E>(spec: &LaunchSpec, control: &ProcessControl<O, E>) -> std::io::Result<()>
where
    O: Send + 'static,
    E: Send + 'static,
{
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let signals = Arc::new(DriverSignals::default());

    control.on_pre_start(Box::new(TokioHandle {
        pid: child.id(),
        signals: Arc::clone(&signals),
    }));

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        let control = control.clone();
        pumps.push(tokio::spawn(pump(stdout, move |chunk, last| {
            control.on_stdout(chunk, last)
        })));
    }
    if let Some(stderr) = child.stderr.take() {
        let control = control.clone();
        pumps.push(tokio::spawn(pump(stderr, move |chunk, last| {
            control.on_stderr(chunk, last)
        })));
    }

    // Dropping stdin closes it, so a child that reads it sees EOF instead of
    // waiting forever.
    let feeder = match child.stdin.take() {
        Some(stdin) if spec.keep_stdin_open => Some(tokio::spawn(feed_stdin(
            control.clone(),
            stdin,
            Arc::clone(&signals),
        ))),
        _ => None,
    };

    control.on_start();

    tokio::spawn(supervise(
        child,
        control.clone(),
        signals,
        pumps,
        feeder,
        spec.drain_timeout,
    ));

    Ok(())
}

async fn pump<R, F>(mut reader: R, mut sink: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8], bool),
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink(&buf[..n], false),
            Err(e) => {
                debug!(error = %e, "output stream read failed; treating as end of stream");
                break;
            }
        }
    }
    sink(&[], true);
}

async fn feed_stdin<O, E>(control: ProcessControl<O, E>, mut stdin: ChildStdin, signals: Arc<DriverSignals>) {
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            _ = signals.want_write.notified() => {}
            _ = signals.close_stdin.notified() => {
                debug!(process = %control.description(), "closing stdin");
                return;
            }
        }

        loop {
            buf.clear();
            let more = control.on_stdin_ready(&mut buf);
            if !buf.is_empty() {
                if let Err(e) = stdin.write_all(&buf).await {
                    debug!(process = %control.description(), error = %e, "stdin write failed; closing");
                    return;
                }
                if let Err(e) = stdin.flush().await {
                    debug!(process = %control.description(), error = %e, "stdin flush failed; closing");
                    return;
                }
            }
            if !more {
                break;
            }
        }
    }
}

async fn supervise<O, E>(
    mut child: Child,
    control: ProcessControl<O, E>,
    signals: Arc<DriverSignals>,
    mut pumps: Vec<JoinHandle<()>>,
    feeder: Option<JoinHandle<()>>,
    drain_timeout: Duration,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = signals.kill.notified() => {
                if let Err(e) = child.start_kill() {
                    warn!(process = %control.description(), error = %e, "failed to kill child process");
                }
            }
        }
    };

    let code = match status {
        Ok(status) => exit_code_of(status),
        Err(e) => {
            warn!(process = %control.description(), error = %e, "waiting for child process failed");
            1
        }
    };
    control.on_reaped(code);

    // A grandchild may inherit the pipes and keep them open; don't wait on
    // it forever.
    let drained = tokio::time::timeout(drain_timeout, async {
        for pump in pumps.iter_mut() {
            let _ = pump.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!(process = %control.description(), "output not drained after exit; abandoning streams");
        for pump in &pumps {
            pump.abort();
        }
    }
    if let Some(feeder) = feeder {
        feeder.abort();
    }

    control.on_exit(code);
}

/// OS exit status as a plain code; signal deaths map to `128 + signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
