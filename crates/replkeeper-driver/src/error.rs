//! Driver error types.

use thiserror::Error;

/// A specialized `Result` type for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Represents errors that can occur while talking to a cluster.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DriverError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The operation did not complete within the driver's own timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The server executed the command and answered with an error.
    #[error("Command failed with code {code}: {message}")]
    Command {
        /// Numeric server error code
        code: i32,
        /// Symbolic server error name, when the server sent one
        code_name: Option<String>,
        /// Server error message
        message: String,
    },

    /// Failed to serialize a command or deserialize a reply.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The driver was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Authentication with the cluster failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Create a server command error without a symbolic name
    pub fn command(code: i32, message: impl Into<String>) -> Self {
        Self::Command {
            code,
            code_name: None,
            message: message.into(),
        }
    }

    /// Create a server command error with its symbolic name
    pub fn command_named(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            code,
            code_name: Some(code_name.into()),
            message: message.into(),
        }
    }

    /// Server error code, if this is a command error
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Command { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the failure happened below the command layer (link, timeout)
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ConnectionLost(_) | Self::Timeout
        )
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = DriverError::command_named(94, "NotYetInitialized", "no replset config");
        assert_eq!(
            err.to_string(),
            "Command failed with code 94: no replset config"
        );

        let err = DriverError::command(76, "not running with --replSet");
        assert_eq!(
            err.to_string(),
            "Command failed with code 76: not running with --replSet"
        );
    }

    #[test]
    fn test_code_only_for_command_errors() {
        assert_eq!(DriverError::command(23, "already").code(), Some(23));
        assert_eq!(DriverError::Timeout.code(), None);
    }

    #[test]
    fn test_connection_classification() {
        assert!(DriverError::ConnectionFailed("refused".into()).is_connection_error());
        assert!(DriverError::Timeout.is_connection_error());
        assert!(!DriverError::command(2, "bad value").is_connection_error());
    }
}
