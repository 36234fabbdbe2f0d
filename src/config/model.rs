// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Launch attempts before a process is declared unlaunchable.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 7;

/// Pause between launch attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// How long to wait for output streams to close after exit.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2000;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [launch]
/// max_attempts = 7
/// retry_delay_ms = 500
/// drain_timeout_ms = 2000
///
/// [search]
/// extra_paths = ["/opt/tools/bin"]
///
/// [env]
/// LC_ALL = "C"
/// ```
///
/// All sections are optional; an empty file yields [`Settings::default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub launch: LaunchSection,

    #[serde(default)]
    pub search: SearchSection,

    /// Environment overrides applied to every launch.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[launch]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

impl Default for LaunchSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchSection {
    /// Directories searched, in order, before `PATH`.
    #[serde(default)]
    pub extra_paths: Vec<PathBuf>,
}

/// Validated launch behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub drain_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
        }
    }
}

/// Validated settings used by `CliCommand`.
///
/// Obtain one from [`crate::config::load_and_validate`] or
/// `Settings::try_from(raw)`; `Settings::default()` matches an empty file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub launch: LaunchSettings,
    pub search_paths: Vec<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl Settings {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            launch: LaunchSettings {
                max_attempts: raw.launch.max_attempts,
                retry_delay: Duration::from_millis(raw.launch.retry_delay_ms),
                drain_timeout: Duration::from_millis(raw.launch.drain_timeout_ms),
            },
            search_paths: raw.search.extra_paths,
            env: raw.env,
        }
    }
}
