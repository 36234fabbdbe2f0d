// src/process/output.rs

//! Push-based sinks for child stdout / stderr.
//!
//! The I/O side calls [`OutputHandler::on_output`] for every chunk as it
//! arrives; any other thread may call [`OutputHandler::result`] at any time
//! and gets a best-effort snapshot. Implementations guard their buffer with a
//! single mutex and only hold it for the append or the copy.

use std::sync::{Arc, Mutex, MutexGuard};

/// Sink for one output stream of a child process.
pub trait OutputHandler: Send + Sync {
    type Output;

    /// Receive a chunk. `last` is true exactly once, on end of stream, and
    /// the chunk passed with it may be empty.
    fn on_output(&self, chunk: &[u8], last: bool);

    /// Snapshot of what has been accumulated so far.
    fn result(&self) -> Self::Output;
}

impl<H: OutputHandler + ?Sized> OutputHandler for Arc<H> {
    type Output = H::Output;

    fn on_output(&self, chunk: &[u8], last: bool) {
        (**self).on_output(chunk, last)
    }

    fn result(&self) -> Self::Output {
        (**self).result()
    }
}

/// Combinators available on every handler.
pub trait OutputHandlerExt: OutputHandler + Sized {
    /// Derive a handler that shares this one's accumulation and converts
    /// its result with `f`.
    fn map<U, F>(self, f: F) -> MappedOutputHandler<Self, F>
    where
        F: Fn(Self::Output) -> U + Send + Sync,
    {
        MappedOutputHandler { inner: self, f }
    }
}

impl<H: OutputHandler + Sized> OutputHandlerExt for H {}

fn lock_buffer(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    // A panic while appending cannot leave the buffer torn; keep serving it.
    buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct Accumulator {
    bytes: Mutex<Vec<u8>>,
    done: std::sync::atomic::AtomicBool,
}

impl Accumulator {
    fn push(&self, chunk: &[u8], last: bool) {
        if !chunk.is_empty() {
            lock_buffer(&self.bytes).extend_from_slice(chunk);
        }
        if last {
            self.done.store(true, std::sync::atomic::Ordering::Release);
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        lock_buffer(&self.bytes).clone()
    }

    fn is_complete(&self) -> bool {
        self.done.load(std::sync::atomic::Ordering::Acquire)
    }
}

/// Collects the stream into a `String` (lossy UTF-8). Clones share the
/// same buffer.
#[derive(Debug, Clone, Default)]
pub struct StringOutputHandler {
    acc: Arc<Accumulator>,
}

impl StringOutputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes received so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.acc.snapshot()
    }

    /// True once the final chunk was delivered.
    pub fn is_complete(&self) -> bool {
        self.acc.is_complete()
    }
}

impl OutputHandler for StringOutputHandler {
    type Output = String;

    fn on_output(&self, chunk: &[u8], last: bool) {
        self.acc.push(chunk, last);
    }

    fn result(&self) -> String {
        String::from_utf8_lossy(&self.acc.snapshot()).into_owned()
    }
}

/// Collects the stream and splits it into lines on demand.
#[derive(Debug, Clone, Default)]
pub struct LinesOutputHandler {
    acc: Arc<Accumulator>,
}

impl LinesOutputHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputHandler for LinesOutputHandler {
    type Output = Vec<String>;

    fn on_output(&self, chunk: &[u8], last: bool) {
        self.acc.push(chunk, last);
    }

    fn result(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.acc.snapshot())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutputHandler;

impl OutputHandler for NullOutputHandler {
    type Output = ();

    fn on_output(&self, _chunk: &[u8], _last: bool) {}

    fn result(&self) {}
}

/// Handler produced by [`OutputHandlerExt::map`].
pub struct MappedOutputHandler<H, F> {
    inner: H,
    f: F,
}

impl<H, F, U> OutputHandler for MappedOutputHandler<H, F>
where
    H: OutputHandler,
    F: Fn(H::Output) -> U + Send + Sync,
{
    type Output = U;

    fn on_output(&self, chunk: &[u8], last: bool) {
        self.inner.on_output(chunk, last);
    }

    fn result(&self) -> U {
        (self.f)(self.inner.result())
    }
}
