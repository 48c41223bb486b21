use std::fmt;

use cmme_store::StoreError;

#[derive(Debug)]
pub enum BackendError {
    /// The child could not be launched or never announced readiness.
    NotReady(String),
    /// The child reported an error or exited mid-job.
    Failed(String),
    /// The session was replaced while this submission was in flight.
    Restarted,
    Store(StoreError),
    Io(std::io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotReady(msg) => write!(f, "backend not ready: {msg}"),
            BackendError::Failed(msg) => write!(f, "backend failed: {msg}"),
            BackendError::Restarted => write!(f, "backend restarted during submission"),
            BackendError::Store(e) => write!(f, "{e}"),
            BackendError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Store(e) => Some(e),
            BackendError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BackendError {
    fn from(e: StoreError) -> Self {
        BackendError::Store(e)
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
