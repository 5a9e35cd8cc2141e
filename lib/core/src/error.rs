use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by `exists` / `unique` / `not_exists`.
///
/// Cloneable so a single failed flush can be handed to every waiter
/// enrolled in it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Database not configured: {0}")]
    Configuration(String),

    #[error("Invalid condition at {path}: {reason}")]
    Shape { path: String, reason: String },

    #[error("Database error during exists check: {0}")]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn shape(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Shape {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("store call failed: {0}")]
    Store(#[source] Arc<StoreError>),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("batch flush ended without producing a result")]
    Abandoned,

    #[error("unexpected store response: {0}")]
    Malformed(String),
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        BackendError::Store(Arc::new(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Backend(err.into())
    }
}

/// Opaque driver failure returned by store implementations.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StoreError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
