//! Error types for the command lifecycle.
//!
//! Two kinds of failure leave a lifecycle: expected, user-correctable
//! [`ValidationError`]s and everything else. Callers classify them with
//! [`CommandError::is_validation`], never by inspecting messages.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type CommandResult<T> = Result<T, CommandError>;

/// An expected, user-facing failure.
///
/// Raised for malformed definitions, missing lifecycle overrides and failed
/// precondition checks. It is never logged with a trace by the lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    /// Name of the command (or component) the failure originated from
    pub prefix: String,
    /// Human-readable description
    pub message: String,
}

impl ValidationError {
    /// Tag reported by [`CommandError::name`] for validation failures.
    pub const NAME: &'static str = "ValidationError";

    pub fn new(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            message: message.into(),
        }
    }
}

/// Errors that can settle a command invocation.
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0:#}")]
    Unexpected(Arc<anyhow::Error>),

    #[error("Command runtime error: {0}")]
    Runtime(String),
}

impl CommandError {
    /// Wrap any error as an unexpected failure.
    pub fn unexpected(err: impl Into<anyhow::Error>) -> Self {
        let err: anyhow::Error = err.into();
        Self::from(err)
    }

    pub fn validation(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(prefix, message))
    }

    /// Tag used to tell the failure kinds apart.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation(_) => ValidationError::NAME,
            Self::Unexpected(_) | Self::Runtime(_) => "Error",
        }
    }

    pub fn is_validation(&self) -> bool {
        self.name() == ValidationError::NAME
    }

    /// The validation payload, if this is a validation failure.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(v) => Some(v),
            _ => None,
        }
    }

    /// Captured backtrace of an unexpected failure.
    ///
    /// Returns `None` when the failure carries no trace data, including when
    /// backtrace capture was disabled for the process.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Self::Unexpected(err) => {
                let bt = err.backtrace();
                (bt.status() == BacktraceStatus::Captured).then_some(bt)
            }
            _ => None,
        }
    }

    /// Full trace text: the error chain followed by the captured frames.
    pub fn trace(&self) -> Option<String> {
        self.backtrace().map(|bt| format!("{self}\n{bt}"))
    }
}

impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ValidationError>() {
            Ok(validation) => Self::Validation(validation),
            Err(err) => Self::Unexpected(Arc::new(err)),
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::unexpected(err)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        Self::unexpected(err)
    }
}
