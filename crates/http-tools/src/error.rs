//! Error types for `apigate-http-tools`.

use crate::safety::sanitize_reqwest_error;
use std::fmt;
use thiserror::Error;

/// Transport-level failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Could not establish a connection.
    Connect,
    /// The request (or reading its response) exceeded the per-call timeout.
    Timeout,
    /// Anything else reqwest reports (builder, body, decode, redirect).
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Other => "transport",
        })
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Required path/query arguments were absent (or null). Never retried.
    #[error("missing required arguments: {}", .missing.join(", "))]
    InvalidArguments { missing: Vec<String> },

    /// The API answered with a non-2xx status.
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{kind} error: {message}")]
    Transport { kind: TransportKind, message: String },

    /// Every attempt failed with a retryable error; `last` is the final one.
    #[error("giving up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ExecutorError>,
    },

    /// The outbound safety policy rejected the destination.
    #[error("outbound request blocked: {0}")]
    Blocked(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

impl From<reqwest::Error> for ExecutorError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportKind::Timeout
        } else if e.is_connect() {
            TransportKind::Connect
        } else {
            TransportKind::Other
        };
        Self::Transport {
            kind,
            message: sanitize_reqwest_error(&e),
        }
    }
}

impl ExecutorError {
    /// HTTP status of the (last) response, if one was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// The error that ended the call, looking through [`ExecutorError::RetriesExhausted`].
    #[must_use]
    pub fn last(&self) -> &ExecutorError {
        match self {
            Self::RetriesExhausted { last, .. } => last.last(),
            other => other,
        }
    }
}
