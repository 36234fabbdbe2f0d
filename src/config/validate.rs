// src/config/validate.rs

use crate::config::model::{RawConfigFile, Settings};
use crate::errors::{ProcessError, Result};

/// Upper bound for `[launch].max_attempts`.
pub const MAX_LAUNCH_ATTEMPTS: u32 = 100;

impl TryFrom<RawConfigFile> for Settings {
    type Error = ProcessError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(Settings::new_unchecked(raw))
    }
}

/// Check semantic invariants that serde cannot express.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_launch(cfg)?;
    validate_search_paths(cfg)?;
    validate_env(cfg)?;
    Ok(())
}

fn validate_launch(cfg: &RawConfigFile) -> Result<()> {
    let attempts = cfg.launch.max_attempts;
    if attempts == 0 || attempts > MAX_LAUNCH_ATTEMPTS {
        return Err(ProcessError::ConfigError(format!(
            "[launch].max_attempts must be within 1..={MAX_LAUNCH_ATTEMPTS} (got {attempts})"
        )));
    }
    Ok(())
}

fn validate_search_paths(cfg: &RawConfigFile) -> Result<()> {
    for (idx, path) in cfg.search.extra_paths.iter().enumerate() {
        if path.as_os_str().is_empty() {
            return Err(ProcessError::ConfigError(format!(
                "[search].extra_paths[{idx}] is empty"
            )));
        }
    }
    Ok(())
}

fn validate_env(cfg: &RawConfigFile) -> Result<()> {
    for key in cfg.env.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(ProcessError::ConfigError(format!(
                "[env] has invalid variable name {key:?}"
            )));
        }
    }
    Ok(())
}
