//! Error types for keystream-core

use thiserror::Error;

/// Boxed cause carried by backend failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by streams and adapters
///
/// "Nothing to do" conditions (no handle, closed handle) are not errors:
/// stream operations report them as `Ok(false)` or `Ok(None)`.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The mode specification could not be parsed
    #[error("Invalid mode: {0:?}")]
    InvalidMode(String),

    /// The backend cannot serve this capability combination on one handle
    #[error("Mode conflict on \"{key}\": {reason}")]
    ModeConflict {
        /// Key the stream was opened for
        key: String,
        /// Why the combination is refused
        reason: String,
    },

    /// The handle's mode forbids the attempted operation
    #[error("The stream for \"{key}\" does not allow {operation}")]
    AccessDenied {
        /// Key the stream was opened for
        key: String,
        /// Operation that was refused (`read` or `write`)
        operation: &'static str,
    },

    /// The backend refused or failed to open a native transport
    #[error("File \"{key}\" cannot be opened: {source}")]
    BackendOpen {
        /// Key the transport was requested for
        key: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// A backend call on an open stream failed
    #[error("Backend error on \"{key}\": {source}")]
    Backend {
        /// Key the stream was opened for
        key: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// Local I/O failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration-related error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Wraps a transport-open failure for `key`
    pub fn backend_open(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StreamError::BackendOpen {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Wraps a failure of an already-open backend resource for `key`
    pub fn backend(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StreamError::Backend {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Builds the error for an operation the mode does not allow
    pub fn access_denied(key: impl Into<String>, operation: &'static str) -> Self {
        StreamError::AccessDenied {
            key: key.into(),
            operation,
        }
    }

    /// True for caller contract violations, as opposed to backend trouble
    pub fn is_logic_violation(&self) -> bool {
        matches!(
            self,
            StreamError::InvalidMode(_)
                | StreamError::ModeConflict { .. }
                | StreamError::AccessDenied { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            StreamError::AccessDenied { .. } => ErrorKind::PermissionDenied,
            StreamError::InvalidMode(_) | StreamError::ModeConflict { .. } => {
                ErrorKind::InvalidInput
            }
            _ => ErrorKind::Other,
        };
        match err {
            StreamError::Io(io_err) => io_err,
            other => std::io::Error::new(kind, other),
        }
    }
}
