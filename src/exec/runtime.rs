// src/exec/runtime.rs

//! The process-I/O runtime.
//!
//! Child processes are driven by a small dedicated multi-threaded tokio
//! runtime, independent of whatever runtime (if any) the caller uses. This
//! lets blocking callers and async callers share the same code path: the
//! process is always spawned, pumped and reaped here, and callers only ever
//! wait on a channel or latch.

use std::io;

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Worker threads for lifecycle callbacks and stream pumping.
const IO_WORKER_THREADS: usize = 2;

static IO_RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Lazily build (once) and return the shared runtime.
pub fn io_runtime() -> io::Result<&'static Runtime> {
    IO_RUNTIME.get_or_try_init(|| {
        debug!(workers = IO_WORKER_THREADS, "starting process-io runtime");
        Builder::new_multi_thread()
            .worker_threads(IO_WORKER_THREADS)
            .thread_name("process-io")
            .enable_all()
            .build()
    })
}
