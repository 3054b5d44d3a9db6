//! Test utilities for replkeeper
//!
//! [`FakeCluster`] is an in-memory stand-in for a MongoDB deployment. It implements both
//! [`DriverFactory`] and [`ClusterDriver`], answers the commands the engine sends, and records
//! enough to assert on afterwards: a command log, open/release counters and the modes links were
//! opened in. Like the helpers in tokio and axum it is public so downstream crates can use it in
//! their own tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replkeeper::test_helpers::{FakeCluster, status_with_roles, three_member_topology};
//! use replkeeper::{ClusterClient, MemberRole};
//!
//! let cluster = FakeCluster::new().with_status_script([
//!     status_with_roles("rs0", &[MemberRole::Secondary, MemberRole::Secondary, MemberRole::Secondary]),
//!     status_with_roles("rs0", &[MemberRole::Primary, MemberRole::Secondary, MemberRole::Secondary]),
//! ]);
//! let client = ClusterClient::builder("mongodb://db0:27017/?replicaSet=rs0")
//!     .with_factory(cluster.clone())
//!     .build()?;
//! client.replica_set().create(&ctx, &three_member_topology("rs0")).await?;
//! assert_eq!(cluster.command_count("replSetInitiate"), 1);
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use replkeeper_driver::{
    ClusterDriver, Command, ConnectMode, DriverError, DriverFactory, DriverResult, Endpoint,
};
use serde_json::{Value, json};

use crate::normalize::ServerDefaults;
use crate::types::{
    ClusterStatus, DEFAULT_DATABASES, Member, MemberRole, MemberStatus, Role, Topology, User,
};

/// Version reported by [`FakeCluster::new`]
pub const FAKE_SERVER_VERSION: &str = "6.0.14";

// ========== Fixtures ==========

/// `rs0`-style topology with members `db0:27017` .. `db2:27017`
pub fn three_member_topology(name: &str) -> Topology {
    (0..3).fold(Topology::new(name), |topology, i| {
        topology.with_member(Member::new(i, format!("db{i}:27017")))
    })
}

/// Healthy status with the given roles, members named `db{i}:27017`
pub fn status_with_roles(name: &str, roles: &[MemberRole]) -> ClusterStatus {
    ClusterStatus {
        ok: true,
        set: name.to_string(),
        members: roles
            .iter()
            .enumerate()
            .map(|(i, role)| MemberStatus::new(format!("db{i}:27017"), role.clone(), true))
            .collect(),
    }
}

/// Status of a settled set: the first data-bearing member is primary
pub fn stable_status(topology: &Topology) -> ClusterStatus {
    let mut primary_assigned = false;
    let members = topology
        .members
        .iter()
        .map(|member| {
            let role = if member.arbiter_only == Some(true) {
                MemberRole::Arbiter
            } else if !primary_assigned {
                primary_assigned = true;
                MemberRole::Primary
            } else {
                MemberRole::Secondary
            };
            MemberStatus::new(member.host.clone(), role, true)
        })
        .collect();

    ClusterStatus {
        ok: true,
        set: topology.name.clone(),
        members,
    }
}

// ========== Fake cluster ==========

#[derive(Debug)]
struct State {
    version: String,
    replication_enabled: bool,
    config: Option<Topology>,
    status_script: VecDeque<ClusterStatus>,
    databases: BTreeSet<String>,
    users: Vec<User>,
    log: Vec<(String, Command)>,
    failures: HashMap<String, VecDeque<DriverError>>,
    open_failures: VecDeque<DriverError>,
    ping_failures: VecDeque<DriverError>,
    ping_latency: Duration,
    open_modes: Vec<ConnectMode>,
    opened: usize,
    released: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: FAKE_SERVER_VERSION.to_string(),
            replication_enabled: true,
            config: None,
            status_script: VecDeque::new(),
            databases: DEFAULT_DATABASES.iter().map(|d| d.to_string()).collect(),
            users: Vec::new(),
            log: Vec::new(),
            failures: HashMap::new(),
            open_failures: VecDeque::new(),
            ping_failures: VecDeque::new(),
            ping_latency: Duration::ZERO,
            open_modes: Vec::new(),
            opened: 0,
            released: 0,
        }
    }
}

/// In-memory cluster implementing the driver traits.
///
/// Clones share state: hand one clone to the client as its factory and keep another for
/// assertions.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    /// A 6.x node with replication enabled and no replica set initiated
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `version` from `buildInfo`.
    #[must_use]
    pub fn with_version(self, version: impl Into<String>) -> Self {
        self.state.lock().version = version.into();
        self
    }

    /// Behave like a node started without `--replSet`.
    #[must_use]
    pub fn with_replication_disabled(self) -> Self {
        self.state.lock().replication_enabled = false;
        self
    }

    /// Start with `topology` already initiated (version 1 unless set).
    #[must_use]
    pub fn with_config(self, mut topology: Topology) -> Self {
        topology.version = topology.version.or(Some(1));
        self.state.lock().config = Some(topology);
        self
    }

    /// Answer `replSetGetStatus` from `script`, one entry per call. The last entry repeats.
    #[must_use]
    pub fn with_status_script(self, script: impl IntoIterator<Item = ClusterStatus>) -> Self {
        self.set_status_script(script);
        self
    }

    /// Add user databases.
    #[must_use]
    pub fn with_databases<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .databases
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Add user accounts.
    #[must_use]
    pub fn with_users(self, users: impl IntoIterator<Item = User>) -> Self {
        self.state.lock().users.extend(users);
        self
    }

    /// Replace the status script.
    pub fn set_status_script(&self, script: impl IntoIterator<Item = ClusterStatus>) {
        self.state.lock().status_script = script.into_iter().collect();
    }

    /// Fail the next `command` with `err`. Repeated calls queue further failures.
    pub fn fail_next(&self, command: &str, err: DriverError) {
        self.state
            .lock()
            .failures
            .entry(command.to_string())
            .or_default()
            .push_back(err);
    }

    /// Fail the next link establishment.
    pub fn fail_next_open(&self, err: DriverError) {
        self.state.lock().open_failures.push_back(err);
    }

    /// Fail the next liveness probe.
    pub fn fail_next_ping(&self, err: DriverError) {
        self.state.lock().ping_failures.push_back(err);
    }

    /// Delay every liveness probe by `latency`.
    pub fn set_ping_latency(&self, latency: Duration) {
        self.state.lock().ping_latency = latency;
    }

    /// Names of every command received, in order
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .map(|(_, command)| command.name().to_string())
            .collect()
    }

    /// How many times `name` was received
    pub fn command_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(_, command)| command.name() == name)
            .count()
    }

    /// Every `name` command received, with the database it targeted
    pub fn sent(&self, name: &str) -> Vec<(String, Command)> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(_, command)| command.name() == name)
            .cloned()
            .collect()
    }

    /// Links opened successfully
    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Links released
    pub fn released(&self) -> usize {
        self.state.lock().released
    }

    /// Mode of every open attempt, in order
    pub fn open_modes(&self) -> Vec<ConnectMode> {
        self.state.lock().open_modes.clone()
    }

    /// The stored configuration, as last accepted
    pub fn config(&self) -> Option<Topology> {
        self.state.lock().config.clone()
    }

    /// Every database name, system defaults included
    pub fn databases(&self) -> Vec<String> {
        self.state.lock().databases.iter().cloned().collect()
    }

    /// Every user account, passwords included
    pub fn users(&self) -> Vec<User> {
        self.state.lock().users.clone()
    }
}

impl DriverFactory for FakeCluster {
    fn open<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
        mode: ConnectMode,
    ) -> BoxFuture<'a, DriverResult<Box<dyn ClusterDriver>>> {
        async move {
            let mut state = self.state.lock();
            state.open_modes.push(mode);
            if let Some(err) = state.open_failures.pop_front() {
                return Err(err);
            }
            state.opened += 1;
            drop(state);
            Ok(Box::new(self.clone()) as Box<dyn ClusterDriver>)
        }
        .boxed()
    }
}

impl ClusterDriver for FakeCluster {
    fn ping(&self) -> BoxFuture<'_, DriverResult<()>> {
        async move {
            let (latency, failure) = {
                let mut state = self.state.lock();
                (state.ping_latency, state.ping_failures.pop_front())
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            failure.map_or(Ok(()), Err)
        }
        .boxed()
    }

    fn run_command<'a>(
        &'a self,
        database: &'a str,
        command: Command,
    ) -> BoxFuture<'a, DriverResult<Value>> {
        async move { self.state.lock().execute(database, command) }.boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, DriverResult<()>> {
        async move {
            self.state.lock().released += 1;
            Ok(())
        }
        .boxed()
    }
}

fn ok(mut reply: Value) -> DriverResult<Value> {
    if let Value::Object(map) = &mut reply {
        map.entry("ok").or_insert(json!(1.0));
    }
    Ok(reply)
}

fn invalid_config(message: impl Into<String>) -> DriverError {
    DriverError::command_named(93, "InvalidReplicaSetConfig", message)
}

impl State {
    fn execute(&mut self, database: &str, command: Command) -> DriverResult<Value> {
        self.log.push((database.to_string(), command.clone()));
        let name = command.name().to_string();
        if let Some(err) = self.failures.get_mut(&name).and_then(VecDeque::pop_front) {
            return Err(err);
        }

        match name.as_str() {
            "buildInfo" => ok(json!({ "version": self.version })),
            "replSetInitiate" => self.initiate(&command),
            "replSetReconfig" => self.reconfigure(&command),
            "replSetGetConfig" => {
                let config = ServerDefaults::BUILTIN.fill(self.require_config()?);
                ok(json!({ "config": serde_json::to_value(&config)? }))
            }
            "replSetGetStatus" => {
                let derived = stable_status(self.require_config()?);
                let status = match self.status_script.len() {
                    0 => derived,
                    1 => self.status_script[0].clone(),
                    _ => self.status_script.pop_front().unwrap_or(derived),
                };
                ok(serde_json::to_value(&status)?)
            }
            "listDatabases" => {
                let filter = command
                    .get("filter")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str);
                let databases: Vec<Value> = self
                    .databases
                    .iter()
                    .filter(|d| filter.is_none_or(|f| f == d.as_str()))
                    .map(|d| json!({ "name": d }))
                    .collect();
                ok(json!({ "databases": databases }))
            }
            "insert" => {
                self.databases.insert(database.to_string());
                ok(json!({ "n": 1 }))
            }
            "dropDatabase" => {
                self.databases.remove(database);
                ok(json!({}))
            }
            "usersInfo" => {
                let users: Vec<User> = self.users.iter().map(User::without_password).collect();
                ok(json!({ "users": serde_json::to_value(&users)? }))
            }
            "createUser" => {
                let username = command.value().as_str().unwrap_or_default().to_string();
                if self.users.iter().any(|u| u.username == username) {
                    return Err(DriverError::command_named(
                        51003,
                        "Location51003",
                        format!("User \"{username}@admin\" already exists"),
                    ));
                }
                self.users.push(User {
                    username,
                    password: command.get("pwd").and_then(Value::as_str).map(str::to_string),
                    roles: roles_arg(&command)?,
                });
                ok(json!({}))
            }
            "updateUser" => {
                let roles = roles_arg(&command)?;
                let user = self.user_mut(&command)?;
                if let Some(pwd) = command.get("pwd").and_then(Value::as_str) {
                    user.password = Some(pwd.to_string());
                }
                user.roles = roles;
                ok(json!({}))
            }
            "dropUser" => {
                let username = self.user_mut(&command)?.username.clone();
                self.users.retain(|u| u.username != username);
                ok(json!({}))
            }
            other => Err(DriverError::command_named(
                59,
                "CommandNotFound",
                format!("no such command: '{other}'"),
            )),
        }
    }

    fn require_replication(&self) -> DriverResult<()> {
        if self.replication_enabled {
            Ok(())
        } else {
            Err(DriverError::command_named(
                76,
                "NoReplicationEnabled",
                "not running with --replSet",
            ))
        }
    }

    fn require_config(&self) -> DriverResult<&Topology> {
        self.require_replication()?;
        self.config.as_ref().ok_or_else(|| {
            DriverError::command_named(
                94,
                "NotYetInitialized",
                "no replset config has been received",
            )
        })
    }

    fn initiate(&mut self, command: &Command) -> DriverResult<Value> {
        self.require_replication()?;
        if self.config.is_some() {
            return Err(DriverError::command_named(
                23,
                "AlreadyInitialized",
                "already initialized",
            ));
        }
        let mut topology: Topology = serde_json::from_value(command.value().clone())
            .map_err(|e| invalid_config(e.to_string()))?;
        topology.version = Some(1);
        self.config = Some(topology);
        ok(json!({}))
    }

    fn reconfigure(&mut self, command: &Command) -> DriverResult<Value> {
        let current = self.require_config()?;
        let next: Topology = serde_json::from_value(command.value().clone())
            .map_err(|e| invalid_config(e.to_string()))?;

        if next.name != current.name {
            return Err(invalid_config(format!(
                "Rejecting reconfig where the new config set name ({}) differs from the old config set name ({})",
                next.name, current.name
            )));
        }
        let current_version = current.version.unwrap_or_default();
        match next.version {
            Some(version) if version > current_version => {}
            Some(version) => {
                return Err(DriverError::command_named(
                    103,
                    "NewReplicaSetConfigurationIncompatible",
                    format!("New config version {version} must be greater than {current_version}"),
                ));
            }
            None => return Err(invalid_config("version field missing")),
        }

        self.config = Some(next);
        ok(json!({}))
    }

    fn user_mut(&mut self, command: &Command) -> DriverResult<&mut User> {
        let username = command.value().as_str().unwrap_or_default();
        self.users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| {
                DriverError::command_named(
                    11,
                    "UserNotFound",
                    format!("Could not find user \"{username}\" for db \"admin\""),
                )
            })
    }
}

fn roles_arg(command: &Command) -> DriverResult<Vec<Role>> {
    match command.get("roles") {
        Some(roles) => Ok(serde_json::from_value(roles.clone())?),
        None => Ok(Vec::new()),
    }
}
