//! Error types for zquant

use thiserror::Error;

/// Result type alias for zquant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zquant
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (init-time: bad bit depth, scaling-list mismatch)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Codec error (per-call: bad transform size, buffer shape mismatch)
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a codec error
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        Error::Codec(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::codec("bad block size");
        assert_eq!(err.to_string(), "Codec error: bad block size");
    }

    #[test]
    fn test_config_helper() {
        let err = Error::config("scaling list bit depth mismatch");
        assert!(matches!(err, Error::Config(_)));
    }
}
