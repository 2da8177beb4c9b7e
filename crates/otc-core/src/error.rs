//! error taxonomy shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// classification of a failure, independent of its concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ClientInitFailed,
    AuthFailed,
    NotFound,
    Conflict,
    ValidationFailed,
    RateLimited,
    RemoteInternal,
    TransientNet,
    PollTimeout,
    UnexpectedState,
    QuotaTimeout,
    QuotaExceedsCapacity,
    Cancelled,
    Unknown,
}

/// lifecycle phase an error is being judged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ClientInitFailed => "CLIENT_INIT_FAILED",
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::RemoteInternal => "REMOTE_INTERNAL",
            ErrorKind::TransientNet => "TRANSIENT_NET",
            ErrorKind::PollTimeout => "POLL_TIMEOUT",
            ErrorKind::UnexpectedState => "UNEXPECTED_STATE",
            ErrorKind::QuotaTimeout => "QUOTA_TIMEOUT",
            ErrorKind::QuotaExceedsCapacity => "QUOTA_EXCEEDS_CAPACITY",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// whether an error of this kind is worth retrying during `operation`.
    ///
    /// conflicts only settle while something is being applied; a conflict
    /// seen by a read is reported as-is.
    pub fn is_retryable(&self, operation: Operation) -> bool {
        match self {
            ErrorKind::RateLimited | ErrorKind::TransientNet | ErrorKind::RemoteInternal => true,
            ErrorKind::Conflict => matches!(
                operation,
                Operation::Create | Operation::Update | Operation::Delete
            ),
            _ => false,
        }
    }

    /// whether `operation` treats this kind as the resource being gone.
    pub fn is_soft_delete(&self, operation: Operation) -> bool {
        *self == ErrorKind::NotFound && matches!(operation, Operation::Read | Operation::Delete)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
