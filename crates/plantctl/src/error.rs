//! Closed error taxonomy shared by every core component.
//!
//! Mirrors the kind table in the supervisory controller's error-handling
//! design: each variant is returned verbatim to the caller, nothing here is
//! retried internally.

use thiserror::Error;

/// Result alias used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("capacity full: {0}")]
    CapacityFull(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl CoreError {
    /// Stable short name, used as the `command_result` code on the IPC bridge.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CoreError::InvalidParam(_) => "INVALID_PARAM",
            CoreError::NotInitialized(_) => "NOT_INITIALIZED",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Duplicate(_) => "DUPLICATE",
            CoreError::CapacityFull(_) => "CAPACITY_FULL",
            CoreError::TypeMismatch(_) => "TYPE_MISMATCH",
            CoreError::Permission(_) => "PERMISSION",
            CoreError::Busy(_) => "BUSY",
            CoreError::Protocol(_) => "PROTOCOL",
            CoreError::Corrupt(_) => "CORRUPT",
            CoreError::Io(_) => "IO",
            CoreError::Timeout(_) => "TIMEOUT",
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}
