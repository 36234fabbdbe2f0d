// src/command/converter.rs

//! Turning a process into a typed value.
//!
//! A [`ProcessResultConverter`] receives the control of a freshly launched
//! (or never-launched) process and produces a future of the caller's type.
//! The stock converters all wait for exit first; launch failures surface as
//! [`ProcessError::LaunchFailed`], exit codes rejected by the predicate as
//! [`ProcessError::ProcessFailed`].

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::errors::{ProcessError, Result};
use crate::process::{ProcessControl, ProcessResult};

pub type ConvertFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Predicate over the effective exit code.
pub type ExitCodePredicate = Arc<dyn Fn(i32) -> bool + Send + Sync>;

pub trait ProcessResultConverter<T>: Send + Sync {
    fn convert(&self, description: &str, control: ProcessControl<String, String>) -> ConvertFuture<T>;
}

/// Wait for exit and return the final snapshot, or the launch failure.
pub async fn finished(control: &ProcessControl<String, String>) -> Result<ProcessResult<String, String>> {
    control.exited().await;
    if let Some(failure) = control.launch_failure() {
        return Err(ProcessError::LaunchFailed(failure.clone()));
    }
    Ok(control.result())
}

fn require_exit(
    description: &str,
    result: ProcessResult<String, String>,
    predicate: &ExitCodePredicate,
) -> Result<ProcessResult<String, String>> {
    let code = result.exit_code();
    if predicate(code) {
        Ok(result)
    } else {
        Err(ProcessError::ProcessFailed {
            description: description.to_string(),
            exit_code: code,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }
}

fn zero() -> ExitCodePredicate {
    Arc::new(|code| code == 0)
}

/// Stdout as a string when the exit code satisfies the predicate.
#[derive(Clone)]
pub struct StringsConverter {
    predicate: ExitCodePredicate,
}

impl ProcessResultConverter<String> for StringsConverter {
    fn convert(&self, description: &str, control: ProcessControl<String, String>) -> ConvertFuture<String> {
        let description = description.to_string();
        let predicate = Arc::clone(&self.predicate);
        Box::pin(async move {
            let result = finished(&control).await?;
            Ok(require_exit(&description, result, &predicate)?.stdout)
        })
    }
}

/// Whether the exit code satisfies the predicate.
#[derive(Clone)]
pub struct ExitCodeConverter {
    predicate: ExitCodePredicate,
}

impl ProcessResultConverter<bool> for ExitCodeConverter {
    fn convert(&self, _description: &str, control: ProcessControl<String, String>) -> ConvertFuture<bool> {
        let predicate = Arc::clone(&self.predicate);
        Box::pin(async move {
            let result = finished(&control).await?;
            Ok(predicate(result.exit_code()))
        })
    }
}

/// The effective exit code itself; `-1` if the process never launched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawExitCodeConverter;

impl ProcessResultConverter<i32> for RawExitCodeConverter {
    fn convert(&self, _description: &str, control: ProcessControl<String, String>) -> ConvertFuture<i32> {
        Box::pin(async move {
            match finished(&control).await {
                Ok(result) => Ok(result.exit_code()),
                Err(_) => Ok(-1),
            }
        })
    }
}

static TRAILING_URI: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*([a-zA-Z][a-zA-Z0-9+.-]*://\S*\d)\s*$").ok());

/// Find the last line consisting solely of a URL ending in a digit, e.g.
/// the pull-request link printed by `gh pr create`.
pub fn find_trailing_uri(output: &str) -> Option<Url> {
    let pattern = TRAILING_URI.as_ref()?;
    output.lines().rev().find_map(|line| {
        pattern
            .captures(line)
            .and_then(|caps| Url::parse(&caps[1]).ok())
    })
}

/// URL on a line of its own at the end of successful output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingUriConverter;

impl ProcessResultConverter<Url> for TrailingUriConverter {
    fn convert(&self, description: &str, control: ProcessControl<String, String>) -> ConvertFuture<Url> {
        let description = description.to_string();
        Box::pin(async move {
            let result = require_exit(&description, finished(&control).await?, &zero())?;
            find_trailing_uri(&result.stdout)
                .or_else(|| find_trailing_uri(&result.stderr))
                .ok_or_else(|| {
                    ProcessError::IllegalArgument(format!(
                        "no line containing only a URL ending in a digit in output of {description}:\n{}",
                        result.stdout
                    ))
                })
        })
    }
}

/// Converter produced by [`ConverterExt::map`].
pub struct MappedConverter<C, F, T> {
    inner: C,
    f: Arc<F>,
    _from: PhantomData<fn() -> T>,
}

impl<C, F, T, U> ProcessResultConverter<U> for MappedConverter<C, F, T>
where
    C: ProcessResultConverter<T>,
    F: Fn(T) -> U + Send + Sync + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    fn convert(&self, description: &str, control: ProcessControl<String, String>) -> ConvertFuture<U> {
        let inner = self.inner.convert(description, control);
        let f = Arc::clone(&self.f);
        Box::pin(async move { inner.await.map(|value| f(value)) })
    }
}

pub trait ConverterExt<T>: ProcessResultConverter<T> + Sized {
    /// Transform a successful value; failures pass through untouched.
    fn map<U, F>(self, f: F) -> MappedConverter<Self, F, T>
    where
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        MappedConverter {
            inner: self,
            f: Arc::new(f),
            _from: PhantomData,
        }
    }
}

impl<T, C: ProcessResultConverter<T> + Sized> ConverterExt<T> for C {}

/// Stdout, failing unless the exit code is zero.
pub fn strings() -> StringsConverter {
    StringsConverter { predicate: zero() }
}

/// Stdout, failing unless `predicate` accepts the exit code.
pub fn strings_matching<P>(predicate: P) -> StringsConverter
where
    P: Fn(i32) -> bool + Send + Sync + 'static,
{
    StringsConverter {
        predicate: Arc::new(predicate),
    }
}

/// `predicate(exit code)`.
pub fn exit_code<P>(predicate: P) -> ExitCodeConverter
where
    P: Fn(i32) -> bool + Send + Sync + 'static,
{
    ExitCodeConverter {
        predicate: Arc::new(predicate),
    }
}

pub fn exit_code_is_zero() -> ExitCodeConverter {
    ExitCodeConverter { predicate: zero() }
}

pub fn raw_exit_code() -> RawExitCodeConverter {
    RawExitCodeConverter
}

pub fn trailing_uri_with_trailing_digit_alone_on_line() -> TrailingUriConverter {
    TrailingUriConverter
}
