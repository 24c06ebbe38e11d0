//! Model failure codes and the swappable table that classifies them.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Backend-neutral failure category reported by a model adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    DeadlineExceeded,
    ServiceUnavailable,
    Internal,
    Aborted,
    Connection,
    Timeout,
    RateLimited,
    ResourceExhausted,
    PermissionDenied,
    Unauthenticated,
    InvalidArgument,
    Credentials,
    /// Anything a backend could not map; never listed in a table by default.
    Other(String),
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultCode::DeadlineExceeded => "deadline_exceeded",
            FaultCode::ServiceUnavailable => "service_unavailable",
            FaultCode::Internal => "internal",
            FaultCode::Aborted => "aborted",
            FaultCode::Connection => "connection",
            FaultCode::Timeout => "timeout",
            FaultCode::RateLimited => "rate_limited",
            FaultCode::ResourceExhausted => "resource_exhausted",
            FaultCode::PermissionDenied => "permission_denied",
            FaultCode::Unauthenticated => "unauthenticated",
            FaultCode::InvalidArgument => "invalid_argument",
            FaultCode::Credentials => "credentials",
            FaultCode::Other(other) => return write!(f, "other({})", other),
        };
        f.write_str(name)
    }
}

/// A failed model call: what kind of failure, plus backend detail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct ModelFault {
    pub code: FaultCode,
    pub message: String,
}

impl ModelFault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// How the resilient invoker treats a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Transient; retried with backoff.
    Retryable,
    /// Retrying cannot help; surfaced on first occurrence.
    Fatal,
    /// Not in either set; surfaced immediately as a bug signal.
    Unexpected,
}

/// Declared retryable and fatal code sets for one backend.
///
/// A code listed in both sets is treated as fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationTable {
    retryable: HashSet<FaultCode>,
    fatal: HashSet<FaultCode>,
}

impl ClassificationTable {
    pub fn new(
        retryable: impl IntoIterator<Item = FaultCode>,
        fatal: impl IntoIterator<Item = FaultCode>,
    ) -> Self {
        Self {
            retryable: retryable.into_iter().collect(),
            fatal: fatal.into_iter().collect(),
        }
    }

    /// Table for the Gemini generative language API.
    pub fn gemini() -> Self {
        Self::new(
            [
                FaultCode::DeadlineExceeded,
                FaultCode::ServiceUnavailable,
                FaultCode::Internal,
                FaultCode::Aborted,
                FaultCode::Connection,
                FaultCode::Timeout,
            ],
            [
                FaultCode::ResourceExhausted,
                FaultCode::PermissionDenied,
                FaultCode::Unauthenticated,
                FaultCode::InvalidArgument,
                FaultCode::Credentials,
            ],
        )
    }

    /// Table for OpenAI-style APIs, where rate limits are transient.
    pub fn openai() -> Self {
        Self::new(
            [
                FaultCode::RateLimited,
                FaultCode::Connection,
                FaultCode::Timeout,
            ],
            [
                FaultCode::Unauthenticated,
                FaultCode::PermissionDenied,
                FaultCode::InvalidArgument,
            ],
        )
    }

    pub fn with_retryable(mut self, code: FaultCode) -> Self {
        self.retryable.insert(code);
        self
    }

    pub fn with_fatal(mut self, code: FaultCode) -> Self {
        self.fatal.insert(code);
        self
    }

    pub fn classify(&self, code: &FaultCode) -> FaultClass {
        if self.fatal.contains(code) {
            FaultClass::Fatal
        } else if self.retryable.contains(code) {
            FaultClass::Retryable
        } else {
            FaultClass::Unexpected
        }
    }
}
