use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use procctl::process::{
    ControlledProcess, KillQueue, ProcessControl, ProcessState, RunningStatus,
};
use procctl_test_utils::{FakeHandle, HandleCalls, init_tracing};

fn running(description: &str) -> (ProcessControl<String, String>, Arc<HandleCalls>) {
    let control = ProcessControl::new(description);
    let (handle, calls) = FakeHandle::new(100);
    control.on_pre_start(handle);
    control.on_start();
    (control, calls)
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn overdue_process_is_killed_promptly() {
    init_tracing();
    let queue = KillQueue::new();
    let (control, calls) = running("overdue");

    let start = Instant::now();
    control.kill_after_in(&queue, Duration::from_millis(200));

    assert!(wait_until(Duration::from_secs(3), || calls.destroyed() > 0));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "killed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "killed too late: {elapsed:?}");

    control.on_exit(137);
    assert_eq!(control.exit_value(), i32::MAX);
    assert!(queue.is_empty());
}

#[test]
fn new_shorter_deadline_wakes_the_watchdog() {
    let queue = KillQueue::new();
    let (slow, slow_calls) = running("slow");
    let (fast, fast_calls) = running("fast");

    slow.kill_after_in(&queue, Duration::from_secs(60));
    // Let the watchdog go to sleep on the long deadline.
    std::thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    fast.kill_after_in(&queue, Duration::from_millis(100));

    assert!(wait_until(Duration::from_secs(3), || fast_calls.destroyed() > 0));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(slow_calls.destroyed(), 0);
    assert_eq!(queue.len(), 1);
}

#[test]
fn exited_processes_are_pruned_without_unregistering() {
    let queue = KillQueue::new();
    let (done, done_calls) = running("exits-early");
    let (other, _other_calls) = running("keeps-running");

    done.kill_after_in(&queue, Duration::from_secs(60));
    done.on_exit(0);
    // A second, short registration makes the watchdog sweep.
    other.kill_after_in(&queue, Duration::from_millis(40));

    assert!(wait_until(Duration::from_secs(3), || queue.is_empty()));
    assert_eq!(done_calls.destroyed(), 0);
}

#[test]
fn dropped_processes_are_pruned() {
    let queue = KillQueue::new();
    {
        let (gone, _calls) = running("dropped");
        gone.kill_after_in(&queue, Duration::from_secs(60));
    }
    let (other, _calls) = running("sweeper");
    other.kill_after_in(&queue, Duration::from_millis(40));

    assert!(wait_until(Duration::from_secs(3), || queue.is_empty()));
}

#[test]
fn cancelled_entries_are_never_killed() {
    let queue = KillQueue::new();
    let (control, calls) = running("cancelled");

    let token = control.kill_after_in(&queue, Duration::from_millis(50));
    assert!(queue.cancel(token));
    assert!(!queue.cancel(token));

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(calls.destroyed(), 0);
}

struct PanickingKill;

impl ControlledProcess for PanickingKill {
    fn describe(&self) -> String {
        "panics-on-kill".to_string()
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn state(&self) -> ProcessState {
        ProcessState::new().to_state(RunningStatus::Running)
    }

    fn kill(&self) -> bool {
        panic!("kill exploded");
    }
}

struct FlagKill(AtomicBool);

impl ControlledProcess for FlagKill {
    fn describe(&self) -> String {
        "flag".to_string()
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn state(&self) -> ProcessState {
        ProcessState::new().to_state(RunningStatus::Running)
    }

    fn kill(&self) -> bool {
        self.0.store(true, Ordering::SeqCst);
        true
    }
}

#[test]
fn kill_failures_do_not_stop_the_watchdog() {
    let queue = KillQueue::new();

    let bad: Arc<dyn ControlledProcess> = Arc::new(PanickingKill);
    queue.enqueue(Arc::downgrade(&bad), Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(100));

    let good = Arc::new(FlagKill(AtomicBool::new(false)));
    let good_dyn: Arc<dyn ControlledProcess> = good.clone();
    queue.enqueue(Arc::downgrade(&good_dyn), Duration::from_millis(10));

    assert!(wait_until(Duration::from_secs(3), || good.0.load(Ordering::SeqCst)));
}

#[test]
fn global_registration_is_dropped_on_exit() {
    let (control, calls) = running("global");
    control.kill_after(Duration::from_secs(60));
    control.on_exit(0);

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.destroyed(), 0);
    assert_eq!(control.exit_value(), 0);
}
