#![allow(dead_code)]

use std::path::PathBuf;

use procctl::config::{RawConfigFile, Settings};

/// Builder for `Settings` to simplify test setup.
pub struct SettingsBuilder {
    config: RawConfigFile,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.launch.max_attempts = attempts;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.launch.retry_delay_ms = ms;
        self
    }

    pub fn drain_timeout_ms(mut self, ms: u64) -> Self {
        self.config.launch.drain_timeout_ms = ms;
        self
    }

    pub fn extra_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.search.extra_paths.push(path.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> Settings {
        Settings::try_from(self.config).expect("Failed to build valid settings from builder")
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
