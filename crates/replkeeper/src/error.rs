//! Error types for the reconciliation engine
//!
//! Every failure is classified at the point of detection as either transient (the retry
//! executor may attempt the operation again) or unrecoverable (remaining attempts are
//! skipped). See [`EngineError::is_unrecoverable`].

use std::fmt;
use std::time::Duration;

use replkeeper_driver::DriverError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Server code for a replica-set command issued before `replSetInitiate`.
pub const CODE_NOT_YET_INITIALIZED: i32 = 94;
/// Server code for replica-set commands sent to a node started without `--replSet`.
pub const CODE_NO_REPLICATION_ENABLED: i32 = 76;
/// Server code for `replSetInitiate` against an already initiated set.
pub const CODE_ALREADY_INITIALIZED: i32 = 23;

/// Command failure codes that retrying can never fix.
const UNRECOVERABLE_CODES: &[i32] = &[
    2,   // BadValue
    13,  // Unauthorized
    18,  // AuthenticationFailed
    CODE_ALREADY_INITIALIZED,
    93,  // InvalidReplicaSetConfig
    103, // NewReplicaSetConfigurationIncompatible
];

/// The kind of object an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A replica-set topology
    ReplicaSet,
    /// A database
    Database,
    /// A user account
    User,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplicaSet => write!(f, "replica set"),
            Self::Database => write!(f, "database"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Main error type for the engine
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// The cluster could not be reached. Transient.
    #[error("Connection error: {message}")]
    Connection {
        /// What failed
        message: String,
    },

    /// Client configuration is unusable.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
    },

    /// The server runs a build this engine has no adapter for.
    #[error("Unsupported server version {observed}: version {required}.x is required")]
    UnsupportedVersion {
        /// Version reported by the server
        observed: String,
        /// Required major version
        required: String,
    },

    /// The node runs with replication enabled but no set has been initiated yet.
    #[error(
        "Replica set not initiated: create the replica set first, then retry this operation"
    )]
    NotYetInitiated,

    /// The node was started without a replica-set name.
    #[error(
        "Replication not enabled: set replication.replSetName in mongod.conf (or start mongod with --replSet), then create the replica set"
    )]
    ReplicationDisabled,

    /// The object to create is already present.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Object kind
        kind: ResourceKind,
        /// Object name
        name: String,
    },

    /// The object to read, change or delete is absent.
    #[error("{kind} '{name}' does not exist")]
    DoesNotExist {
        /// Object kind
        kind: ResourceKind,
        /// Object name
        name: String,
    },

    /// A listing came back empty once system defaults were excluded.
    #[error("no {kind}s found")]
    NoneFound {
        /// Object kind
        kind: ResourceKind,
    },

    /// The object is a system default that must not be managed.
    #[error("{kind} '{name}' is a system default and cannot be {action}")]
    Protected {
        /// Object kind
        kind: ResourceKind,
        /// Object name
        name: String,
        /// Refused action, in past participle form ("created", "deleted", ...)
        action: &'static str,
    },

    /// The replica set does not satisfy the stable predicate.
    #[error("Replica set '{name}' not ready or corrupted: {detail}")]
    NotReady {
        /// Replica-set name
        name: String,
        /// Observed condition
        detail: String,
    },

    /// The operation deadline elapsed.
    #[error("Operation '{operation}' timed out after {after:?}{}", observation_suffix(.last_observation))]
    Timeout {
        /// Operation name
        operation: String,
        /// Budget that elapsed
        after: Duration,
        /// Last state seen before giving up
        last_observation: Option<String>,
    },

    /// The caller cancelled the operation.
    #[error("Operation '{operation}' was cancelled")]
    Cancelled {
        /// Operation name
        operation: String,
    },

    /// A command failed on the server or in the driver.
    #[error("{operation} failed: {source}")]
    Driver {
        /// Command or step that failed
        operation: String,
        /// Underlying driver error
        #[source]
        source: DriverError,
    },

    /// The server answered with a document of an unexpected shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// What was unexpected
        message: String,
    },

    /// Desired state is malformed.
    #[error("Validation error: {message}")]
    Validation {
        /// What is wrong
        message: String,
    },
}

fn observation_suffix(last: &Option<String>) -> String {
    last.as_ref()
        .map(|observed| format!(" (last observed: {observed})"))
        .unwrap_or_default()
}

impl EngineError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-ready error
    pub fn not_ready(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NotReady {
            name: name.into(),
            detail: detail.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Create a does-not-exist error
    pub fn does_not_exist(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::DoesNotExist {
            kind,
            name: name.into(),
        }
    }

    /// Create a protected-object error
    pub fn protected(kind: ResourceKind, name: impl Into<String>, action: &'static str) -> Self {
        Self::Protected {
            kind,
            name: name.into(),
            action,
        }
    }

    /// Create an empty-listing error
    pub fn none_found(kind: ResourceKind) -> Self {
        Self::NoneFound { kind }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Classify a driver failure raised while running `operation`.
    ///
    /// Link failures become [`EngineError::Connection`]; the replica-set bootstrap codes become
    /// [`EngineError::NotYetInitiated`] and [`EngineError::ReplicationDisabled`].
    pub fn from_driver(operation: impl Into<String>, err: DriverError) -> Self {
        let operation = operation.into();
        if err.is_connection_error() {
            return Self::connection(format!("{operation}: {err}"));
        }
        match err.code() {
            Some(CODE_NOT_YET_INITIALIZED) => Self::NotYetInitiated,
            Some(CODE_NO_REPLICATION_ENABLED) => Self::ReplicationDisabled,
            _ => Self::Driver {
                operation,
                source: err,
            },
        }
    }

    /// Whether retrying can never succeed
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            Self::Connection { .. } => false,
            Self::Driver { source, .. } => match source {
                DriverError::Command { code, .. } => UNRECOVERABLE_CODES.contains(code),
                DriverError::SerializationFailed(_)
                | DriverError::ConfigurationError(_)
                | DriverError::AuthenticationFailed(_) => true,
                _ => false,
            },
            _ => true,
        }
    }

    /// Whether the retry executor may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        !self.is_unrecoverable()
    }

    /// Server command code carried by this error, if any
    pub fn server_code(&self) -> Option<i32> {
        match self {
            Self::Driver { source, .. } => source.code(),
            Self::NotYetInitiated => Some(CODE_NOT_YET_INITIALIZED),
            Self::ReplicationDisabled => Some(CODE_NO_REPLICATION_ENABLED),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EngineError::already_exists(ResourceKind::Database, "app");
        assert_eq!(err.to_string(), "database 'app' already exists");

        let err = EngineError::protected(ResourceKind::User, "admin", "deleted");
        assert_eq!(
            err.to_string(),
            "user 'admin' is a system default and cannot be deleted"
        );

        assert_eq!(
            EngineError::none_found(ResourceKind::Database).to_string(),
            "no databases found"
        );
        assert_eq!(
            EngineError::none_found(ResourceKind::User).to_string(),
            "no users found"
        );

        let err = EngineError::not_ready("rs0", "2 primaries");
        assert_eq!(
            err.to_string(),
            "Replica set 'rs0' not ready or corrupted: 2 primaries"
        );
    }

    #[test]
    fn test_timeout_reports_last_observation() {
        let err = EngineError::Timeout {
            operation: "ready".into(),
            after: Duration::from_secs(30),
            last_observation: Some("no primary".into()),
        };
        assert_eq!(
            err.to_string(),
            "Operation 'ready' timed out after 30s (last observed: no primary)"
        );

        let err = EngineError::Timeout {
            operation: "ready".into(),
            after: Duration::from_secs(1),
            last_observation: None,
        };
        assert_eq!(err.to_string(), "Operation 'ready' timed out after 1s");
    }

    #[test]
    fn test_driver_translation() {
        let err = EngineError::from_driver(
            "replSetGetConfig",
            DriverError::command_named(94, "NotYetInitialized", "no replset config"),
        );
        assert!(matches!(err, EngineError::NotYetInitiated));

        let err = EngineError::from_driver("replSetGetConfig", DriverError::command(76, "no"));
        assert!(matches!(err, EngineError::ReplicationDisabled));
        assert_ne!(
            EngineError::NotYetInitiated.to_string(),
            EngineError::ReplicationDisabled.to_string()
        );

        let err = EngineError::from_driver("ping", DriverError::ConnectionFailed("refused".into()));
        assert!(matches!(err, EngineError::Connection { .. }));
    }

    #[test]
    fn test_classification() {
        assert!(EngineError::connection("refused").is_retryable());
        assert!(EngineError::from_driver("x", DriverError::command(11600, "shutdown")).is_retryable());
        assert!(EngineError::from_driver("x", DriverError::command(103, "bad version")).is_unrecoverable());
        assert!(EngineError::from_driver("x", DriverError::AuthenticationFailed("no".into())).is_unrecoverable());

        assert!(EngineError::NotYetInitiated.is_unrecoverable());
        assert!(EngineError::ReplicationDisabled.is_unrecoverable());
        assert!(EngineError::not_ready("rs0", "").is_unrecoverable());
        assert!(EngineError::cancelled("create").is_unrecoverable());
        assert!(
            EngineError::UnsupportedVersion {
                observed: "5.0.3".into(),
                required: "6".into(),
            }
            .is_unrecoverable()
        );
    }

    #[test]
    fn test_server_code() {
        assert_eq!(EngineError::NotYetInitiated.server_code(), Some(94));
        assert_eq!(
            EngineError::from_driver("x", DriverError::command(23, "already")).server_code(),
            Some(23)
        );
        assert_eq!(EngineError::connection("x").server_code(), None);
    }
}
