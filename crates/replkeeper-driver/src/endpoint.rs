//! Connection endpoints and connection modes.

use std::fmt;

use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

/// Port assumed for hosts listed without one.
pub const DEFAULT_PORT: u16 = 27017;

const SCHEME: &str = "mongodb://";
const DIRECT_CONNECTION: &str = "directConnection";

/// How a link to the cluster is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectMode {
    /// Talk to exactly the first configured host, with topology discovery disabled.
    ///
    /// Used to bootstrap a replica set that does not exist yet.
    Direct,
    /// Discover and follow the replica set named by the endpoint.
    SetAware,
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::SetAware => write!(f, "set-aware"),
        }
    }
}

/// A parsed `mongodb://` connection string.
///
/// Credentials are kept percent-decoded; the `Debug` and `Display` renderings never show the
/// password.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    hosts: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
    replica_set: Option<String>,
    options: Vec<(String, String)>,
}

impl Endpoint {
    /// Parse a connection string of the form
    /// `mongodb://[user[:password]@]host[:port][,host[:port]...][/database][?options]`.
    pub fn parse(uri: &str) -> DriverResult<Self> {
        let rest = uri.trim().strip_prefix(SCHEME).ok_or_else(|| {
            DriverError::ConfigurationError(format!("connection string must start with {SCHEME}"))
        })?;

        let (authority, tail) = match rest.find(|c| c == '/' || c == '?') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };

        let (userinfo, host_list) = match authority.rsplit_once('@') {
            Some((userinfo, hosts)) => (Some(userinfo), hosts),
            None => (None, authority),
        };

        let (username, password) = match userinfo {
            Some(userinfo) => {
                let (user, pass) = match userinfo.split_once(':') {
                    Some((user, pass)) => (user, Some(pass)),
                    None => (userinfo, None),
                };
                if user.is_empty() {
                    return Err(DriverError::ConfigurationError(
                        "connection string has credentials without a username".to_string(),
                    ));
                }
                (Some(decode(user)?), pass.map(decode).transpose()?)
            }
            None => (None, None),
        };

        let hosts = host_list
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(normalize_host)
            .collect::<DriverResult<Vec<_>>>()?;

        if hosts.is_empty() {
            return Err(DriverError::ConfigurationError(
                "connection string does not name any host".to_string(),
            ));
        }

        let (path, query) = match tail.split_once('?') {
            Some((path, query)) => (path, query),
            None => (tail, ""),
        };

        let database = path
            .strip_prefix('/')
            .filter(|db| !db.is_empty())
            .map(decode)
            .transpose()?;

        let mut replica_set = None;
        let mut options = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DriverError::ConfigurationError(format!("malformed connection option '{pair}'"))
            })?;
            let value = decode(value)?;
            if key == "replicaSet" {
                if !value.is_empty() {
                    replica_set = Some(value);
                }
            } else {
                options.push((key.to_string(), value));
            }
        }

        Ok(Self {
            hosts,
            username,
            password,
            database,
            replica_set,
            options,
        })
    }

    /// Configured hosts in `host:port` form
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Username, if credentials were supplied
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password, if credentials were supplied
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Default database from the connection string path
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Replica-set name declared with the `replicaSet` option
    pub fn replica_set(&self) -> Option<&str> {
        self.replica_set.as_deref()
    }

    /// Look up any other connection option by key.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Builder-style override of the replica-set name.
    #[must_use]
    pub fn with_replica_set(mut self, name: impl Into<String>) -> Self {
        self.replica_set = Some(name.into());
        self
    }

    /// The endpoint restricted to its first host, with the replica-set name dropped and
    /// topology discovery disabled.
    #[must_use]
    pub fn direct(&self) -> Self {
        let mut options: Vec<(String, String)> = self
            .options
            .iter()
            .filter(|(k, _)| k != DIRECT_CONNECTION)
            .cloned()
            .collect();
        options.push((DIRECT_CONNECTION.to_string(), "true".to_string()));

        Self {
            hosts: self.hosts.iter().take(1).cloned().collect(),
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            replica_set: None,
            options,
        }
    }

    /// The endpoint a link in `mode` should use.
    #[must_use]
    pub fn for_mode(&self, mode: ConnectMode) -> Self {
        match mode {
            ConnectMode::Direct => self.direct(),
            ConnectMode::SetAware => self.clone(),
        }
    }

    /// Render back into a connection string, credentials included.
    pub fn to_uri(&self) -> String {
        self.render(false)
    }

    fn render(&self, redact: bool) -> String {
        let mut uri = String::from(SCHEME);

        if let Some(user) = &self.username {
            uri.push_str(&utf8_percent_encode(user, NON_ALPHANUMERIC).to_string());
            if let Some(password) = &self.password {
                uri.push(':');
                if redact {
                    uri.push_str("***");
                } else {
                    uri.push_str(&utf8_percent_encode(password, NON_ALPHANUMERIC).to_string());
                }
            }
            uri.push('@');
        }

        uri.push_str(&self.hosts.join(","));
        uri.push('/');
        if let Some(database) = &self.database {
            uri.push_str(&utf8_percent_encode(database, NON_ALPHANUMERIC).to_string());
        }

        let mut query = Vec::new();
        if let Some(name) = &self.replica_set {
            query.push(format!(
                "replicaSet={}",
                utf8_percent_encode(name, NON_ALPHANUMERIC)
            ));
        }
        for (key, value) in &self.options {
            query.push(format!(
                "{key}={}",
                utf8_percent_encode(value, NON_ALPHANUMERIC)
            ));
        }
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query.join("&"));
        }

        uri
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("replica_set", &self.replica_set)
            .field("options", &self.options)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

impl std::str::FromStr for Endpoint {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn decode(raw: &str) -> DriverResult<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| DriverError::ConfigurationError(format!("invalid percent-encoding: {e}")))
}

fn normalize_host(host: &str) -> DriverResult<String> {
    // IPv6 literals carry colons inside the brackets
    let port = if host.starts_with('[') {
        match host.rsplit_once("]:") {
            Some((_, port)) => Some(port),
            None if host.ends_with(']') => None,
            None => {
                return Err(DriverError::ConfigurationError(format!(
                    "invalid host '{host}'"
                )));
            }
        }
    } else {
        host.rsplit_once(':').map(|(_, port)| port)
    };

    match port {
        Some(port) => {
            port.parse::<u16>().map_err(|_| {
                DriverError::ConfigurationError(format!("invalid port in host '{host}'"))
            })?;
            Ok(host.to_string())
        }
        None => Ok(format!("{host}:{DEFAULT_PORT}")),
    }
}
