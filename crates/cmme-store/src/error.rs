use std::fmt;
use std::path::PathBuf;

use cmme_core::ModelError;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Json(serde_json::Error),
    Toml(toml::de::Error),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Malformed instruction or result file.
    Parse {
        path: PathBuf,
        field: String,
        message: String,
    },
    /// A referenced file exists neither where recorded nor next to its meta file.
    MissingFile(PathBuf),
    Model(ModelError),
}

impl StoreError {
    pub fn parse(path: impl Into<PathBuf>, field: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Parse {
            path: path.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::Json(e) => write!(f, "JSON error: {e}"),
            StoreError::Toml(e) => write!(f, "config error: {e}"),
            StoreError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            StoreError::Parse {
                path,
                field,
                message,
            } => write!(f, "{}: field {field}: {message}", path.display()),
            StoreError::MissingFile(path) => write!(f, "missing file: {}", path.display()),
            StoreError::Model(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Json(e) => Some(e),
            StoreError::Toml(e) => Some(e),
            StoreError::Io { source, .. } => Some(source),
            StoreError::Model(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        StoreError::Toml(e)
    }
}

impl From<ModelError> for StoreError {
    fn from(e: ModelError) -> Self {
        StoreError::Model(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
