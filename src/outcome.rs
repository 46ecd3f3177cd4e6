//! Operation result contract.
//!
//! Operations never signal a retry through an error. They return
//! [`Outcome::Retry`] normally, and the trampoline folds the whole
//! `Result<Outcome<T>>` into an [`OperationResult`].

use serde::Serialize;
use std::fmt;

use crate::error::{DEFAULT_RETRY_SECS, LifecycleError, Result};

/// What an operation step concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation reached its goal.
    Done(T),
    /// Re-invoke the whole operation after `after_secs`.
    Retry {
        /// Human-readable reason.
        message: String,
        /// Delay before the next invocation.
        after_secs: u64,
    },
}

impl<T> Outcome<T> {
    /// Creates a retry request.
    #[must_use]
    pub fn retry(message: impl Into<String>, after_secs: u64) -> Self {
        Self::Retry {
            message: message.into(),
            after_secs,
        }
    }

    /// Returns true for [`Outcome::Done`].
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Maps the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Done(value) => Outcome::Done(f(value)),
            Self::Retry {
                message,
                after_secs,
            } => Outcome::Retry {
                message,
                after_secs,
            },
        }
    }

    /// Drops the success value.
    pub fn discard(self) -> Outcome<()> {
        self.map(|_| ())
    }
}

impl Outcome<()> {
    /// Success with no value.
    #[must_use]
    pub const fn done() -> Self {
        Self::Done(())
    }
}

/// Returns early from the enclosing function with a retry outcome.
///
/// `proceed!(expr)` evaluates an `Outcome<T>` and yields `T`, or returns the
/// retry wrapped in `Ok`.
#[macro_export]
macro_rules! proceed {
    ($outcome:expr) => {
        match $outcome {
            $crate::outcome::Outcome::Done(value) => value,
            $crate::outcome::Outcome::Retry {
                message,
                after_secs,
            } => {
                return Ok($crate::outcome::Outcome::Retry {
                    message,
                    after_secs,
                })
            }
        }
    };
}

/// The tag the external trampoline inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationResult {
    /// The operation completed.
    Success,
    /// Re-invoke the operation after `secs`.
    RetryAfter {
        /// Delay before the next invocation.
        secs: u64,
        /// Human-readable reason.
        message: String,
    },
    /// The operation failed.
    Fail {
        /// Human-readable reason.
        message: String,
        /// Whether a later re-invocation could still succeed. Set when a
        /// followed run exhausts its attempts while the operation is pending.
        recoverable: bool,
    },
}

impl OperationResult {
    /// Folds an operation's return value into a trampoline decision.
    ///
    /// Recoverable errors become [`OperationResult::RetryAfter`] with the
    /// error's delay hint, defaulting to [`DEFAULT_RETRY_SECS`].
    #[must_use]
    pub fn from_result<T>(result: Result<Outcome<T>>) -> Self {
        match result {
            Ok(Outcome::Done(_)) => Self::Success,
            Ok(Outcome::Retry {
                message,
                after_secs,
            }) => Self::RetryAfter {
                secs: after_secs,
                message,
            },
            Err(e) => Self::from_error(&e),
        }
    }

    /// Classifies an error.
    #[must_use]
    pub fn from_error(error: &LifecycleError) -> Self {
        if error.is_recoverable() {
            Self::RetryAfter {
                secs: error.retry_delay_secs().unwrap_or(DEFAULT_RETRY_SECS),
                message: error.to_string(),
            }
        } else {
            Self::Fail {
                message: error.to_string(),
                recoverable: false,
            }
        }
    }

    /// Returns true once no further invocation is needed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::RetryAfter { .. })
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RetryAfter { secs, message } => write!(f, "retry in {secs}s: {message}"),
            Self::Fail {
                message,
                recoverable,
            } => {
                if *recoverable {
                    write!(f, "failed (recoverable): {message}")
                } else {
                    write!(f, "failed: {message}")
                }
            }
        }
    }
}
