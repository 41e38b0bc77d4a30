//! Centralized error types for the todosync application.
//!
//! Setup failures (config, local storage, remote client) are mapped onto this
//! hierarchy by the binary. Use `user_message()` for anything shown to a user
//! and the `Display` form for logs.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Storage(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed. Please try again.",
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

/// Remote client setup errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::InvalidEndpoint(_) => "The server address is invalid. Check your settings.",
        }
    }
}

/// Local storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to open task storage: {0}")]
    OpenFailed(String),
}

impl StorageError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::OpenFailed(_) => "Unable to access local data. Try restarting the app.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_conversion() {
        let err: AppError = ConfigError::Invalid("retry.factor".into()).into();
        assert!(matches!(err, AppError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_user_message_propagation() {
        let err = AppError::Storage(StorageError::OpenFailed("locked".into()));
        assert_eq!(
            err.user_message(),
            "Unable to access local data. Try restarting the app."
        );

        let err = AppError::Network(NetworkError::InvalidEndpoint("ftp://x".into()));
        assert!(err.user_message().contains("server address"));
    }

    #[test]
    fn test_display_keeps_detail() {
        let err = AppError::Config(ConfigError::ParseError("line 3".into()));
        assert_eq!(err.to_string(), "Configuration error: Configuration parse error: line 3");
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.user_message(), "An unexpected error occurred. Please try again.");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "tasks.csv");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Io(_)));
        assert_eq!(err.user_message(), "A file operation failed. Please try again.");
    }
}
