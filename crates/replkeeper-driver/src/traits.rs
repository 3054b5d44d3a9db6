//! Driver traits.

use std::fmt::Debug;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::command::Command;
use crate::endpoint::{ConnectMode, Endpoint};
use crate::error::DriverResult;

/// An open link to a cluster, able to execute database commands.
///
/// Implementations must be safe to share between tasks; the engine holds one link per
/// operation and releases it with [`ClusterDriver::disconnect`] when the operation ends.
pub trait ClusterDriver: Send + Sync + Debug {
    /// Check that the link is alive.
    fn ping(&self) -> BoxFuture<'_, DriverResult<()>>;

    /// Run `command` against `database` and return the server's reply document.
    ///
    /// A reply carrying `ok: 0` must be surfaced as [`crate::DriverError::Command`] rather than
    /// returned as a value.
    fn run_command<'a>(
        &'a self,
        database: &'a str,
        command: Command,
    ) -> BoxFuture<'a, DriverResult<Value>>;

    /// Close the link. Further calls on this driver may fail.
    fn disconnect(&self) -> BoxFuture<'_, DriverResult<()>>;
}

/// Opens [`ClusterDriver`] links to an endpoint.
pub trait DriverFactory: Send + Sync + Debug {
    /// Open a link to `endpoint` in `mode`.
    ///
    /// In [`ConnectMode::Direct`] the link must talk only to the first host and must not require
    /// the replica set to exist.
    fn open<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        mode: ConnectMode,
    ) -> BoxFuture<'a, DriverResult<Box<dyn ClusterDriver>>>;
}
