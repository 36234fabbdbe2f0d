#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use procctl::command::{
    CliCommand, ConverterExt, exit_code, exit_code_is_zero, raw_exit_code, strings,
    strings_matching,
};
use procctl::errors::ProcessError;
use procctl::process::{StaticInputHandler, abort_on_input};
use procctl_test_utils::builders::SettingsBuilder;
use procctl_test_utils::{init_tracing, with_timeout};
use tempfile::TempDir;

fn sh(dir: &TempDir, script: &str) -> CliCommand<String> {
    CliCommand::new("sh", dir.path()).arg("-c").arg(script)
}

#[tokio::test]
async fn echo_output_is_collected() {
    init_tracing();
    let dir = TempDir::new().unwrap();

    let future = CliCommand::new("echo", dir.path()).arg("hello").run().unwrap();
    let control = future.control().clone();
    let out = with_timeout(future).await.unwrap();

    assert_eq!(out.trim(), "hello");
    let result = control.result();
    assert_eq!(result.exit_code(), 0);
    assert!(result.is_success());
    assert!(!result.was_killed());
    assert!(control.pid().is_some());
}

#[test]
fn blocking_wait_from_a_plain_thread() {
    let dir = TempDir::new().unwrap();
    let out = sh(&dir, "printf 'a\\nb\\n'; printf 'oops' >&2")
        .run()
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(out, "a\nb\n");
}

#[tokio::test]
async fn stderr_is_kept_apart_from_stdout() {
    let dir = TempDir::new().unwrap();
    let future = sh(&dir, "echo out; echo err >&2; exit 0").run().unwrap();
    let control = future.control().clone();
    with_timeout(future).await.unwrap();

    let result = control.result();
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
}

#[tokio::test]
async fn exit_code_predicates() {
    let dir = TempDir::new().unwrap();

    let two = sh(&dir, "exit 2").with_converter(exit_code(|code| code == 2));
    assert!(with_timeout(two.run().unwrap()).await.unwrap());

    let zero_is_not_two = sh(&dir, "exit 0").with_converter(exit_code(|code| code == 2));
    assert!(!with_timeout(zero_is_not_two.run().unwrap()).await.unwrap());

    let failed = sh(&dir, "exit 2").with_converter(exit_code_is_zero());
    assert!(!with_timeout(failed.run().unwrap()).await.unwrap());

    let raw = sh(&dir, "exit 2").with_converter(raw_exit_code());
    assert_eq!(with_timeout(raw.run().unwrap()).await.unwrap(), 2);
}

#[tokio::test]
async fn strings_converter_reports_rejected_exit_codes() {
    let dir = TempDir::new().unwrap();

    let err = with_timeout(sh(&dir, "echo partial; echo bad >&2; exit 2").run().unwrap())
        .await
        .unwrap_err();
    match err {
        ProcessError::ProcessFailed {
            exit_code,
            stdout,
            stderr,
            description,
        } => {
            assert_eq!(exit_code, 2);
            assert_eq!(stdout, "partial\n");
            assert_eq!(stderr, "bad\n");
            assert!(description.starts_with("sh -c"), "{description}");
        }
        other => panic!("expected ProcessFailed, got {other:?}"),
    }

    let tolerant = sh(&dir, "echo fine; exit 1").with_converter(strings_matching(|code| code <= 1));
    assert_eq!(with_timeout(tolerant.run().unwrap()).await.unwrap(), "fine\n");
}

#[tokio::test]
async fn missing_executable_surfaces_through_the_future() {
    let dir = TempDir::new().unwrap();
    let future = CliCommand::new("definitely-not-a-real-binary-xyz", dir.path())
        .run()
        .expect("run() only fails on misuse");

    let control = future.control().clone();
    let err = with_timeout(future).await.unwrap_err();
    assert!(
        matches!(&err, ProcessError::ExecutableNotFound { name } if name == "definitely-not-a-real-binary-xyz"),
        "{err:?}"
    );
    assert!(!control.is_running());
    assert!(control.launch_failure().is_some());
}

#[tokio::test]
async fn kill_after_stops_a_long_running_process() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let start = Instant::now();

    let future = CliCommand::new("sleep", dir.path())
        .arg("10")
        .kill_after(Duration::from_millis(200))
        .with_converter(raw_exit_code())
        .run()
        .unwrap();
    let control = future.control().clone();

    let code = with_timeout(future).await.unwrap();
    assert_eq!(code, i32::MAX);
    assert!(control.state().was_killed());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn explicit_kill_through_the_future() {
    let dir = TempDir::new().unwrap();
    let future = CliCommand::new("sleep", dir.path())
        .arg("10")
        .with_converter(exit_code_is_zero())
        .run()
        .unwrap();
    let control = future.control().clone();

    // Wait for the launch so the kill hits a running process.
    with_timeout(async {
        while !control.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(future.kill());

    assert!(!with_timeout(future).await.unwrap());
    assert_eq!(control.exit_value(), i32::MAX);
}

#[tokio::test]
async fn stdin_handler_feeds_the_child() {
    let dir = TempDir::new().unwrap();
    let future = CliCommand::new("head", dir.path())
        .args(["-n", "1"])
        .with_stdin_handler(StaticInputHandler::new("fed line\nignored\n"))
        .run()
        .unwrap();

    let out = with_timeout(future).await.unwrap();
    assert_eq!(out, "fed line\n");
}

#[tokio::test]
async fn stdin_is_closed_without_a_handler() {
    let dir = TempDir::new().unwrap();
    let out = with_timeout(CliCommand::new("cat", dir.path()).run().unwrap())
        .await
        .unwrap();
    assert_eq!(out, "");
}

#[tokio::test]
async fn command_and_settings_env_reach_the_child() {
    let dir = TempDir::new().unwrap();
    let settings = SettingsBuilder::new()
        .env("PROCCTL_FROM_SETTINGS", "s")
        .env("PROCCTL_SHARED", "settings")
        .build();

    let out = sh(&dir, "printf '%s %s' \"$PROCCTL_FROM_SETTINGS\" \"$PROCCTL_SHARED\"")
        .with_settings(settings)
        .env("PROCCTL_SHARED", "command")
        .run()
        .unwrap();
    assert_eq!(with_timeout(out).await.unwrap(), "s command");
}

#[tokio::test]
async fn git_disables_terminal_prompts() {
    let dir = TempDir::new().unwrap();
    let command = CliCommand::git(dir.path());
    assert_eq!(command.program(), "git");
    assert!(format!("{command:?}").contains("GIT_TERMINAL_PROMPT"));

    let gh = CliCommand::gh(dir.path());
    let debug = format!("{gh:?}");
    assert!(debug.contains("GH_PROMPT_DISABLED"));
    assert!(debug.contains("GIT_TERMINAL_PROMPT"));
}

#[test]
fn templates_must_be_bound_before_running() {
    let template = CliCommand::template("echo").arg("hi");
    let err = template.run().unwrap_err();
    assert!(matches!(err, ProcessError::IllegalState(_)), "{err}");

    let dir = TempDir::new().unwrap();
    let bound = template.in_dir(dir.path());
    assert_eq!(bound.working_dir(), Some(dir.path()));
    assert_eq!(bound.run().unwrap().wait().unwrap().trim(), "hi");

    // The template itself is unchanged.
    assert!(template.working_dir().is_none());
}

#[test]
fn missing_working_directory_is_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let gone = dir.path().join("gone");
    let err = CliCommand::new("echo", &gone).run().unwrap_err();
    assert!(matches!(err, ProcessError::IllegalArgument(_)), "{err}");
}

#[tokio::test]
async fn unlaunchable_program_is_retried_then_reported() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    // Executable bit set, but the interpreter does not exist: every spawn fails.
    let script = dir.path().join("broken-tool");
    fs::write(&script, "#!/nonexistent/interpreter\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let settings = SettingsBuilder::new().max_attempts(2).retry_delay_ms(10).build();
    let future = CliCommand::new(script.to_string_lossy(), dir.path())
        .with_settings(settings)
        .run()
        .unwrap();
    let control = future.control().clone();

    let err = with_timeout(future).await.unwrap_err();
    match &err {
        ProcessError::LaunchFailed(failure) => assert_eq!(failure.attempts, 2),
        other => panic!("expected LaunchFailed, got {other:?}"),
    }
    assert!(err.is_launch_failure());
    assert!(!control.is_running());
    assert!(control.kill());
    assert!(!control.state().was_killed());
}

#[tokio::test]
async fn raw_exit_code_of_unlaunchable_program_is_minus_one() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("broken-tool");
    fs::write(&script, "#!/nonexistent/interpreter\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let settings = SettingsBuilder::new().max_attempts(1).build();
    let code = CliCommand::new(script.to_string_lossy(), dir.path())
        .with_settings(settings)
        .with_converter(raw_exit_code())
        .run()
        .unwrap();
    assert_eq!(with_timeout(code).await.unwrap(), -1);
}

#[tokio::test]
async fn commands_can_be_run_repeatedly() {
    let dir = TempDir::new().unwrap();
    let command = sh(&dir, "echo again").with_converter(strings().map(|s| s.trim().to_string()));

    let first = with_timeout(command.run().unwrap()).await.unwrap();
    let second = with_timeout(command.run().unwrap()).await.unwrap();
    assert_eq!(first, "again");
    assert_eq!(second, "again");
}

#[test]
fn wait_timeout_hands_the_future_back() {
    let dir = TempDir::new().unwrap();
    let future = CliCommand::new("sleep", dir.path())
        .arg("10")
        .with_converter(raw_exit_code())
        .run()
        .unwrap();

    let future = match future.wait_timeout(Duration::from_millis(50)) {
        Ok(result) => panic!("sleep finished early: {result:?}"),
        Err(future) => future,
    };
    // A kill before launch is deferred, so this always lands.
    future.kill();
    assert_eq!(future.wait().unwrap(), i32::MAX);
}

#[tokio::test]
async fn abort_on_input_stops_a_prompting_child() {
    let dir = TempDir::new().unwrap();
    let start = Instant::now();

    let future = sh(&dir, "read answer; echo got $answer")
        .with_stdin_handler(abort_on_input())
        .with_converter(raw_exit_code())
        .run()
        .unwrap();
    let control = future.control().clone();

    let code = with_timeout(future).await.unwrap();
    assert_eq!(code, i32::MAX);
    assert!(control.state().was_killed());
    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
}

#[tokio::test]
async fn exit_is_final_while_a_grandchild_holds_the_pipes() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let settings = SettingsBuilder::new().drain_timeout_ms(1000).build();

    let future = sh(&dir, "(sleep 3) & exit 0")
        .with_settings(settings)
        .kill_after(Duration::from_millis(200))
        .with_converter(raw_exit_code())
        .run()
        .unwrap();
    let control = future.control().clone();

    // The shell is reaped long before the inherited pipes close.
    with_timeout(async {
        while !control.state().is_exited() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(!control.is_running());
    assert!(!control.kill());

    assert_eq!(with_timeout(future).await.unwrap(), 0);
    assert!(!control.state().was_killed());
}
