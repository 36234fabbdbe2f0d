use procctl::errors::ProcessError;
use procctl::process::{
    AtomicProcessState, KILLED_EXIT_CODE, MAX_EXIT_CODE, NOT_EXITED_EXIT_CODE, ProcessState,
    RunningStatus,
};

#[test]
fn fresh_state_is_uninitialized_and_not_exited() {
    let state = ProcessState::new();

    assert_eq!(state.status(), RunningStatus::Uninitialized);
    assert!(!state.was_killed());
    assert!(!state.wants_input());
    assert!(!state.is_started());
    assert_eq!(state.effective_exit_code(), NOT_EXITED_EXIT_CODE);
}

#[test]
fn every_non_exited_status_reports_minus_one() {
    for status in [
        RunningStatus::Uninitialized,
        RunningStatus::Starting,
        RunningStatus::Running,
    ] {
        let state = ProcessState::new().to_state(status);
        assert_eq!(state.effective_exit_code(), -1, "status {status:?}");
    }
}

#[test]
fn exit_code_round_trips_at_the_boundaries() {
    for code in [0, 1, 2, 127, 255, 4096, MAX_EXIT_CODE] {
        let state = ProcessState::new()
            .to_state(RunningStatus::Running)
            .with_exit_code(code)
            .unwrap();
        assert!(state.is_exited());
        assert_eq!(state.exit_code(), code);
        assert_eq!(state.effective_exit_code(), code);
    }
}

#[test]
fn out_of_range_exit_codes_are_rejected() {
    for code in [-1, MAX_EXIT_CODE + 1, i32::MAX, i32::MIN] {
        let err = ProcessState::new().with_exit_code(code).unwrap_err();
        assert!(matches!(err, ProcessError::IllegalArgument(_)), "code {code}: {err}");
    }
}

#[test]
fn killed_takes_precedence_over_everything() {
    let running_killed = ProcessState::new().to_state(RunningStatus::Running).killed();
    assert_eq!(running_killed.effective_exit_code(), KILLED_EXIT_CODE);

    let exited_killed = ProcessState::new().with_exit_code(0).unwrap().killed();
    assert_eq!(exited_killed.effective_exit_code(), i32::MAX);
    assert!(!exited_killed.is_success());

    let uninit_killed = ProcessState::new().killed();
    assert_eq!(uninit_killed.effective_exit_code(), i32::MAX);
}

#[test]
fn with_exit_code_starts_from_a_clean_slate() {
    let state = ProcessState::new()
        .to_state(RunningStatus::Running)
        .killed()
        .wanting_input()
        .with_exit_code(3)
        .unwrap();

    assert!(!state.was_killed());
    assert!(!state.wants_input());
    assert_eq!(state.effective_exit_code(), 3);
}

#[test]
fn transitions_at_target_return_the_same_value() {
    let running = ProcessState::new().to_state(RunningStatus::Running);

    let killed = running.killed();
    assert_eq!(killed.killed(), killed);
    assert_eq!(killed.killed().bits(), killed.bits());

    let wanting = running.wanting_input();
    assert_eq!(wanting.wanting_input(), wanting);
    assert_eq!(running.not_wanting_input(), running);
    assert_eq!(running.to_state(RunningStatus::Running), running);
}

#[test]
fn input_flag_toggles_without_touching_other_fields() {
    let base = ProcessState::new().to_state(RunningStatus::Running).killed();
    let wanting = base.wanting_input();

    assert!(wanting.wants_input());
    assert!(wanting.was_killed());
    assert_eq!(wanting.status(), RunningStatus::Running);
    assert_eq!(wanting.not_wanting_input(), base);
}

#[test]
fn display_is_compact() {
    let running = ProcessState::new().to_state(RunningStatus::Running);
    assert_eq!(running.to_string(), "running");
    assert_eq!(running.killed().wanting_input().to_string(), "running+killed+input");
    assert_eq!(running.with_exit_code(4).unwrap().to_string(), "exited(4)");
    assert_eq!(running.with_exit_code(4).unwrap().killed().to_string(), "killed");
}

#[test]
fn atomic_update_reports_old_and_new() {
    let cell = AtomicProcessState::new(ProcessState::new());

    let (old, new) = cell.update(|s| Some(s.to_state(RunningStatus::Starting)));
    assert_eq!(old.status(), RunningStatus::Uninitialized);
    assert_eq!(new.status(), RunningStatus::Starting);
    assert_eq!(cell.get(), new);

    // Declining leaves the cell alone.
    let (old, new) = cell.update(|_| None);
    assert_eq!(old, new);
    assert_eq!(cell.get().status(), RunningStatus::Starting);
}

#[test]
fn concurrent_flag_updates_are_not_lost() {
    use std::sync::Arc;
    use std::thread;

    let cell = Arc::new(AtomicProcessState::new(
        ProcessState::new().to_state(RunningStatus::Running),
    ));

    let killers: Vec<_> = (0..4)
        .map(|_| {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..1000 {
                    cell.update(|s| Some(s.killed()));
                }
            })
        })
        .collect();
    let togglers: Vec<_> = (0..4)
        .map(|i| {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..1000 {
                    if i % 2 == 0 {
                        cell.update(|s| Some(s.wanting_input()));
                    } else {
                        cell.update(|s| Some(s.not_wanting_input()));
                    }
                }
            })
        })
        .collect();

    for t in killers.into_iter().chain(togglers) {
        t.join().unwrap();
    }

    let state = cell.get();
    assert!(state.was_killed());
    assert_eq!(state.status(), RunningStatus::Running);
}
