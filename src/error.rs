//! Error types
//!
//! [`RpcError`] is what the transport returns; [`ProviderError`] is what every
//! core call returns to the host. Local input errors, remote failures and
//! local wait failures are kept apart so callers can tell "the remote said no"
//! from "we stopped waiting".

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

/// gRPC-style status codes carried by API errors and failed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Map a numeric gRPC code as found in error bodies and operation errors
    pub fn from_grpc(code: i64) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Map an HTTP status when the body carries no gRPC code
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=299 => Self::Ok,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::Aborted,
            412 => Self::FailedPrecondition,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            501 => Self::Unimplemented,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }

    pub fn as_grpc(&self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::Cancelled => 1,
            Self::Unknown => 2,
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::PermissionDenied => 7,
            Self::ResourceExhausted => 8,
            Self::FailedPrecondition => 9,
            Self::Aborted => 10,
            Self::OutOfRange => 11,
            Self::Unimplemented => 12,
            Self::Internal => 13,
            Self::Unavailable => 14,
            Self::DataLoss => 15,
            Self::Unauthenticated => 16,
        }
    }

    /// Codes worth another poll while a deadline still allows it
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::DeadlineExceeded | Self::ResourceExhausted
        )
    }

    /// Codes the API uses when a concurrent writer got there first
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Aborted | Self::FailedPrecondition)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error returned by the RPC transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: StatusCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }
}

/// Error returned by every core operation
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("schema mismatch at '{path}': expected {expected}, found {found}")]
    SchemaMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("conflicting fields: use one of '{first}' or '{second}', not both")]
    ConflictingFields { first: String, second: String },

    #[error("missing required field '{path}'")]
    MissingField { path: String },

    #[error("set '{path}' has distinct members sharing key {key}")]
    SetCollision { path: String, key: String },

    #[error("invalid member '{value}': expected 'type:id'")]
    InvalidMember { value: String },

    #[error("invalid schema at '{path}': {reason}")]
    InvalidSchema { path: String, reason: String },

    #[error("unknown resource kind '{0}'")]
    UnknownResource(String),

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("name '{name}' matches {count} {kind} objects in {scope}")]
    AmbiguousName {
        kind: String,
        name: String,
        scope: String,
        count: usize,
    },

    #[error("operation {operation_id} ({description}) failed: {code}: {message}")]
    RemoteOperationFailed {
        operation_id: String,
        description: String,
        code: StatusCode,
        message: String,
    },

    #[error("{action} timed out after {after:?}{}", operation_suffix(.operation_id))]
    Timeout {
        action: String,
        operation_id: Option<String>,
        after: Duration,
    },

    #[error("{action} cancelled{}", operation_suffix(.operation_id))]
    Cancelled {
        action: String,
        operation_id: Option<String>,
    },

    #[error("access policy of {resource} kept changing, gave up after {attempts} attempts")]
    ConcurrentModification { resource: String, attempts: u32 },

    #[error("{action}: {source}")]
    Rpc {
        action: String,
        #[source]
        source: RpcError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

fn operation_suffix(operation_id: &Option<String>) -> String {
    match operation_id {
        Some(id) => format!(" (operation {} may still be running)", id),
        None => String::new(),
    }
}

impl ProviderError {
    pub fn rpc(action: impl Into<String>, source: RpcError) -> Self {
        Self::Rpc {
            action: action.into(),
            source,
        }
    }

    pub fn mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Status code behind this error, if it came from the remote side
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Rpc { source, .. } => Some(source.code),
            Self::RemoteOperationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the remote side reported the object as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. }) || self.status_code() == Some(StatusCode::NotFound)
    }

    /// True when a read-modify-write should start over from a fresh read
    pub fn is_conflict(&self) -> bool {
        self.status_code().map(|c| c.is_conflict()).unwrap_or(false)
    }
}
