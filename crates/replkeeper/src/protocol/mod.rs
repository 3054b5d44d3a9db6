//! Version-specific protocol adapters
//!
//! Each supported server line gets one variant of [`ProtocolAdapter`]. The variants expose the
//! same operation set; command names, reply field names and quirks stay private to the variant.

mod v6;

use std::fmt;

use replkeeper_driver::{ClusterDriver, Command, DriverError};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::types::{ADMIN_DATABASE, ClusterStatus, Topology, User};

pub use v6::V6Protocol;

/// A server release line with its own adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerLine {
    /// 6.x
    V6,
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V6 => write!(f, "6"),
        }
    }
}

/// The adapter selected for a connected cluster.
#[derive(Debug, Clone)]
pub enum ProtocolAdapter {
    /// 6.x servers
    V6(V6Protocol),
}

impl ProtocolAdapter {
    /// The adapter for `line`
    pub fn for_line(line: ServerLine) -> Self {
        match line {
            ServerLine::V6 => Self::V6(V6Protocol),
        }
    }

    /// Server line this adapter speaks
    pub fn line(&self) -> ServerLine {
        match self {
            Self::V6(_) => ServerLine::V6,
        }
    }

    /// Bootstrap a new replica set from `topology`.
    pub async fn initiate(
        &self,
        driver: &dyn ClusterDriver,
        topology: &Topology,
    ) -> EngineResult<()> {
        match self {
            Self::V6(p) => p.initiate(driver, topology).await,
        }
    }

    /// Replace the running configuration with `topology`.
    pub async fn reconfigure(
        &self,
        driver: &dyn ClusterDriver,
        topology: &Topology,
    ) -> EngineResult<()> {
        match self {
            Self::V6(p) => p.reconfigure(driver, topology).await,
        }
    }

    /// Read the running configuration, version included.
    pub async fn get_config(&self, driver: &dyn ClusterDriver) -> EngineResult<Topology> {
        match self {
            Self::V6(p) => p.get_config(driver).await,
        }
    }

    /// Read current member health.
    pub async fn get_status(&self, driver: &dyn ClusterDriver) -> EngineResult<ClusterStatus> {
        match self {
            Self::V6(p) => p.get_status(driver).await,
        }
    }

    /// Database names, optionally restricted to one exact name.
    pub async fn list_database_names(
        &self,
        driver: &dyn ClusterDriver,
        name: Option<&str>,
    ) -> EngineResult<Vec<String>> {
        match self {
            Self::V6(p) => p.list_database_names(driver, name).await,
        }
    }

    /// Materialize database `name`.
    pub async fn create_database(&self, driver: &dyn ClusterDriver, name: &str) -> EngineResult<()> {
        match self {
            Self::V6(p) => p.create_database(driver, name).await,
        }
    }

    /// Drop database `name`.
    pub async fn drop_database(&self, driver: &dyn ClusterDriver, name: &str) -> EngineResult<()> {
        match self {
            Self::V6(p) => p.drop_database(driver, name).await,
        }
    }

    /// Users defined in the admin database, without credentials.
    pub async fn users_info(&self, driver: &dyn ClusterDriver) -> EngineResult<Vec<User>> {
        match self {
            Self::V6(p) => p.users_info(driver).await,
        }
    }

    /// Create `user`.
    pub async fn create_user(&self, driver: &dyn ClusterDriver, user: &User) -> EngineResult<()> {
        match self {
            Self::V6(p) => p.create_user(driver, user).await,
        }
    }

    /// Change password and roles of `user`.
    pub async fn update_user(&self, driver: &dyn ClusterDriver, user: &User) -> EngineResult<()> {
        match self {
            Self::V6(p) => p.update_user(driver, user).await,
        }
    }

    /// Drop `username`.
    pub async fn drop_user(&self, driver: &dyn ClusterDriver, username: &str) -> EngineResult<()> {
        match self {
            Self::V6(p) => p.drop_user(driver, username).await,
        }
    }
}

/// Ask the server for its version string. The reply shape is common to every line.
pub async fn server_version(driver: &dyn ClusterDriver) -> EngineResult<String> {
    let reply = run(driver, ADMIN_DATABASE, Command::new("buildInfo", 1)).await?;
    reply
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::protocol("buildInfo reply carries no version string"))
}

/// Run a command, classifying driver failures.
pub(crate) async fn run(
    driver: &dyn ClusterDriver,
    database: &str,
    command: Command,
) -> EngineResult<Value> {
    let name = command.name().to_string();
    driver
        .run_command(database, command)
        .await
        .map_err(|err| EngineError::from_driver(name, err))
}

/// Decode `field` of a reply document.
pub(crate) fn decode_field<T: DeserializeOwned>(
    reply: &Value,
    command: &str,
    field: &str,
) -> EngineResult<T> {
    let value = reply.get(field).cloned().ok_or_else(|| {
        EngineError::protocol(format!("{command} reply has no '{field}' field"))
    })?;
    serde_json::from_value(value).map_err(|e| {
        EngineError::protocol(format!("{command} reply field '{field}' is malformed: {e}"))
    })
}

/// Serialize a payload into a command.
pub(crate) fn payload_command<T: serde::Serialize>(name: &str, payload: &T) -> EngineResult<Command> {
    Command::with_payload(name, payload).map_err(|err: DriverError| EngineError::Driver {
        operation: name.to_string(),
        source: err,
    })
}
