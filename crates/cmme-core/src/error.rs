use std::fmt;

/// Errors raised by the model layer. None of them leave process state changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Malformed sequence, dimension mismatch or empty argument.
    InvalidInput(String),
    /// A builder or prior invariant was violated.
    InvalidParameters(String),
    /// PPM and DREX observed series could not be matched.
    Unaligned(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            ModelError::InvalidParameters(msg) => write!(f, "invalid parameters: {msg}"),
            ModelError::Unaligned(msg) => write!(f, "unaligned results: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

impl ModelError {
    pub fn input(msg: impl Into<String>) -> Self {
        ModelError::InvalidInput(msg.into())
    }

    pub fn params(msg: impl Into<String>) -> Self {
        ModelError::InvalidParameters(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
