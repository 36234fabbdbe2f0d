// src/process/kill_queue.rs

//! Watchdog enforcing a maximum run time per process.
//!
//! One background thread per queue, started lazily on the first
//! [`KillQueue::enqueue`]. Entries are keyed by a token and hold only a weak
//! reference to the process, so a finished and dropped `ProcessControl` is
//! never kept alive by the queue.
//!
//! Loop:
//! 1. prune entries whose process exited (or was dropped), and pull out the
//!    ones past their deadline;
//! 2. kill the overdue ones outside the lock, logging any failure;
//! 3. sleep for a quarter of the shortest remaining interval, or until a new
//!    entry wakes the thread.
//!
//! The thread runs at the lowest priority the OS grants it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use thread_priority::{ThreadPriority, set_current_thread_priority};
use tracing::{debug, error, info};

use crate::process::control::ControlledProcess;

/// Floor for the watchdog nap so tiny intervals don't spin.
const MIN_NAP: Duration = Duration::from_millis(1);

/// Handle for one registration; pass it back to [`KillQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KillToken(u64);

struct Entry {
    deadline: Instant,
    target: Weak<dyn ControlledProcess>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<u64, Entry>,
    next_token: u64,
    worker_started: bool,
    shutdown: bool,
}

struct Shared {
    entries: Mutex<Entries>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct KillQueue {
    shared: Arc<Shared>,
}

static GLOBAL: Lazy<KillQueue> = Lazy::new(KillQueue::new);

impl KillQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(Entries::default()),
                wake: Condvar::new(),
            }),
        }
    }

    /// The process-wide queue used by `ProcessControl::kill_after`.
    pub fn global() -> &'static KillQueue {
        &GLOBAL
    }

    /// Schedule `target` to be killed once `after` has elapsed.
    pub fn enqueue(&self, target: Weak<dyn ControlledProcess>, after: Duration) -> KillToken {
        let deadline = Instant::now() + after;
        let mut entries = self.shared.lock();

        let token = entries.next_token;
        entries.next_token += 1;
        entries.map.insert(token, Entry { deadline, target });

        if !entries.worker_started {
            entries.worker_started = self.start_worker();
        }
        drop(entries);

        debug!(token, after_ms = after.as_millis() as u64, "kill deadline registered");
        self.shared.wake.notify_all();
        KillToken(token)
    }

    /// Drop a registration. Returns false if it was already gone.
    pub fn cancel(&self, token: KillToken) -> bool {
        self.shared.lock().map.remove(&token.0).is_some()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.shared.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn start_worker(&self) -> bool {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("kill-queue".to_string())
            .spawn(move || watchdog_loop(shared));

        match spawned {
            Ok(_) => true,
            Err(e) => {
                // Retried on the next enqueue.
                error!(error = %e, "failed to start kill-queue thread");
                false
            }
        }
    }
}

impl Default for KillQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KillQueue {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
    }
}

fn watchdog_loop(shared: Arc<Shared>) {
    // Best effort: stay out of the way of the processes being supervised.
    if let Err(e) = set_current_thread_priority(ThreadPriority::Min) {
        debug!(error = ?e, "could not lower kill-queue thread priority");
    }
    debug!("kill-queue thread started");
    let mut entries = shared.lock();

    loop {
        if entries.shutdown {
            debug!("kill-queue thread stopping");
            return;
        }

        let now = Instant::now();
        let timed_out = sweep(&mut entries.map, now);

        if !timed_out.is_empty() {
            drop(entries);
            for target in timed_out {
                kill_overdue(target.as_ref());
            }
            entries = shared.lock();
            continue;
        }

        entries = match least_interval(&entries.map, now) {
            None => shared
                .wake
                .wait(entries)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            Some(interval) => {
                let nap = (interval / 4).max(MIN_NAP);
                shared
                    .wake
                    .wait_timeout(entries, nap)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
        };
    }
}

/// Remove exited / dropped entries and return the overdue ones (also
/// removed).
fn sweep(map: &mut HashMap<u64, Entry>, now: Instant) -> Vec<Arc<dyn ControlledProcess>> {
    let mut timed_out = Vec::new();

    map.retain(|token, entry| {
        let Some(target) = entry.target.upgrade() else {
            debug!(token, "pruning kill entry for dropped process");
            return false;
        };
        if target.state().is_exited() {
            debug!(token, process = %target.describe(), "pruning kill entry for exited process");
            return false;
        }
        if entry.deadline <= now {
            timed_out.push(target);
            return false;
        }
        true
    });

    timed_out
}

/// Shortest time until any deadline; `None` when nothing is tracked.
fn least_interval(map: &HashMap<u64, Entry>, now: Instant) -> Option<Duration> {
    map.values()
        .map(|entry| entry.deadline.saturating_duration_since(now))
        .min()
}

fn kill_overdue(target: &dyn ControlledProcess) {
    match catch_unwind(AssertUnwindSafe(|| target.kill())) {
        Ok(true) => info!(process = %target.describe(), "killed process after timeout"),
        Ok(false) => debug!(
            process = %target.describe(),
            "timed-out process was not running when kill was attempted"
        ),
        Err(_) => error!(
            process = %target.describe(),
            "panic while killing timed-out process; watchdog continues"
        ),
    }
}
