use thiserror::Error;

/// Errors raised by backend collaborators
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cloud path: {0}")]
    InvalidPath(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl BackendError {
    /// Translate an object store failure for `key`, keeping not-found distinct
    pub(crate) fn from_store(key: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => BackendError::NotFound(key.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                BackendError::AlreadyExists(key.to_string())
            }
            other => BackendError::ObjectStore(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for std::io::Error {
    fn from(err: BackendError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            BackendError::NotFound(_) => ErrorKind::NotFound,
            BackendError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            _ => ErrorKind::Other,
        };
        match err {
            BackendError::Io(io_err) => io_err,
            other => std::io::Error::new(kind, other),
        }
    }
}

impl From<url::ParseError> for BackendError {
    fn from(err: url::ParseError) -> Self {
        BackendError::InvalidPath(format!("Invalid URL: {}", err))
    }
}
