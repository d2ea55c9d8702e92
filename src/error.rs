//! Error types for EmberKV

use thiserror::Error;

/// Main error type for EmberKV
#[derive(Error, Debug)]
pub enum EmberError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EmberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_and_display() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: EmberError = io.into();
        assert!(matches!(err, EmberError::Io(_)));
        assert_eq!(err.to_string(), "IO error: port taken");

        let err = crate::Config::from_toml("[server]\nbind = \"nowhere\"").unwrap_err();
        assert!(matches!(err, EmberError::Config(_)));
    }
}
