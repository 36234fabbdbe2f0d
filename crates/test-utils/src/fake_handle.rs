use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use procctl::process::ProcessHandle;

/// Counters shared between a [`FakeHandle`] and the test that created it.
#[derive(Debug, Default)]
pub struct HandleCalls {
    pub destroy: AtomicUsize,
    pub want_write: AtomicUsize,
    pub close_stdin: AtomicUsize,
}

impl HandleCalls {
    pub fn destroyed(&self) -> usize {
        self.destroy.load(Ordering::SeqCst)
    }

    pub fn write_requests(&self) -> usize {
        self.want_write.load(Ordering::SeqCst)
    }

    pub fn stdin_closes(&self) -> usize {
        self.close_stdin.load(Ordering::SeqCst)
    }
}

/// A `ProcessHandle` that spawns nothing and records what the control asked
/// of it, so tests can drive a `ProcessControl` through its callbacks by
/// hand.
pub struct FakeHandle {
    pid: u32,
    calls: Arc<HandleCalls>,
}

impl FakeHandle {
    pub fn new(pid: u32) -> (Box<dyn ProcessHandle>, Arc<HandleCalls>) {
        let calls = Arc::new(HandleCalls::default());
        let handle = FakeHandle {
            pid,
            calls: Arc::clone(&calls),
        };
        (Box::new(handle), calls)
    }
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn destroy(&self) {
        self.calls.destroy.fetch_add(1, Ordering::SeqCst);
    }

    fn want_write(&self) {
        self.calls.want_write.fetch_add(1, Ordering::SeqCst);
    }

    fn close_stdin(&self) {
        self.calls.close_stdin.fetch_add(1, Ordering::SeqCst);
    }
}
