// src/command/resolve.rs

//! Executable lookup with a process-wide cache.
//!
//! Bare command names (`git`, `gh`) are resolved once per process and the
//! result reused; entries are never invalidated. Names containing a path
//! separator are resolved against the working directory every time.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::errors::{ProcessError, Result};

static RESOLVED: Lazy<Mutex<HashMap<String, PathBuf>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn is_bare_name(name: &str) -> bool {
    !name.contains('/') && !name.contains(std::path::MAIN_SEPARATOR)
}

/// Resolve `name` to an executable path.
///
/// `extra_paths` are searched before `PATH`. Fails with
/// [`ProcessError::ExecutableNotFound`].
pub fn resolve_executable(name: &str, extra_paths: &[PathBuf], cwd: &Path) -> Result<PathBuf> {
    let cacheable = is_bare_name(name);

    if cacheable {
        let cache = RESOLVED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(path) = cache.get(name) {
            return Ok(path.clone());
        }
    }

    let mut search: Vec<PathBuf> = extra_paths.to_vec();
    if let Some(path_var) = env::var_os("PATH") {
        search.extend(env::split_paths(&path_var));
    }
    let joined = env::join_paths(search).map_err(|e| {
        ProcessError::IllegalArgument(format!("search path cannot be joined: {e}"))
    })?;

    let resolved = which::which_in(name, Some(joined), cwd).map_err(|e| {
        debug!(name, error = %e, "executable lookup failed");
        ProcessError::ExecutableNotFound {
            name: name.to_string(),
        }
    })?;

    debug!(name, path = %resolved.display(), "resolved executable");
    if cacheable {
        RESOLVED
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), resolved.clone());
    }
    Ok(resolved)
}

/// Forget every cached resolution.
pub fn clear_resolution_cache() {
    RESOLVED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
}
