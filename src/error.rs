// error.rs - Error types for program writing and matching.

use std::fmt;
use std::time::Duration;

/// Error type for the writer and the matcher.
///
/// A failed search is not an error; it is reported as an empty result.
/// Everything here is either a caller-imposed limit or an engine bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The search deadline expired before a verdict was reached.
    RuntimeLimit {
        /// The budget that was exhausted.
        limit: Duration,
    },
    /// A writer or runner invariant was violated. Indicates a bug in the
    /// engine, never bad user input. Always fatal for the current search.
    Internal {
        message: String,
    },
}

impl Error {
    pub(crate) fn internal(message: impl Into<String>) -> Error {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is the cooperative-timeout signal.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::RuntimeLimit { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RuntimeLimit { limit } => {
                write!(f, "match time limit of {:?} exceeded", limit)
            }
            Error::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for Error {}
