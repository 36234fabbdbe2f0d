use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use procctl::config::{load_and_validate, load_from_path, load_or_default, Settings};
use procctl::errors::ProcessError;
use procctl_test_utils::builders::SettingsBuilder;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("procctl.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn empty_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let settings = load_and_validate(&path).unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.launch.max_attempts, 7);
    assert_eq!(settings.launch.retry_delay, Duration::from_millis(500));
    assert_eq!(settings.launch.drain_timeout, Duration::from_millis(2000));
}

#[test]
fn full_file_is_parsed() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[launch]
max_attempts = 3
retry_delay_ms = 50
drain_timeout_ms = 250

[search]
extra_paths = ["/opt/tools/bin", "bin"]

[env]
LC_ALL = "C"
"#,
    );

    let settings = load_and_validate(&path).unwrap();
    assert_eq!(settings.launch.max_attempts, 3);
    assert_eq!(settings.launch.retry_delay, Duration::from_millis(50));
    assert_eq!(settings.launch.drain_timeout, Duration::from_millis(250));
    assert_eq!(
        settings.search_paths,
        vec![PathBuf::from("/opt/tools/bin"), PathBuf::from("bin")]
    );
    assert_eq!(settings.env.get("LC_ALL").map(String::as_str), Some("C"));
}

#[test]
fn attempts_out_of_range_are_rejected() {
    let dir = TempDir::new().unwrap();
    for attempts in [0, 101] {
        let path = write_config(&dir, &format!("[launch]\nmax_attempts = {attempts}\n"));
        let err = load_and_validate(&path).unwrap_err();
        assert!(matches!(err, ProcessError::ConfigError(_)), "{err}");
    }
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[launch]\nmax_attempt = 3\n");
    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, ProcessError::TomlError(_)), "{err}");
}

#[test]
fn bad_env_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[env]\n\"A=B\" = \"x\"\n");
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, ProcessError::ConfigError(_)), "{err}");
}

#[test]
fn empty_search_path_is_rejected() {
    let raw = SettingsBuilder::new().extra_path("").raw();
    let err = Settings::try_from(raw).unwrap_err();
    assert!(matches!(err, ProcessError::ConfigError(_)), "{err}");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = load_or_default(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, Settings::default());

    let err = load_and_validate(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ProcessError::IoError(_)), "{err}");
}

#[test]
fn builder_produces_validated_settings() {
    let settings = SettingsBuilder::new()
        .max_attempts(2)
        .retry_delay_ms(5)
        .env("GIT_TERMINAL_PROMPT", "0")
        .build();
    assert_eq!(settings.launch.max_attempts, 2);
    assert_eq!(settings.launch.retry_delay, Duration::from_millis(5));
    assert_eq!(settings.env.len(), 1);
}
