//! Replica-set topology: the desired or observed configuration document.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::lenient;
use crate::error::{EngineError, EngineResult};

/// A replica-set configuration.
///
/// Serializes to the document accepted by `replSetInitiate` / `replSetReconfig`. Optional fields
/// left unset are omitted so the server applies its own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Replica-set name, immutable once created
    #[serde(rename = "_id")]
    pub name: String,
    /// Server-assigned configuration version
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub version: Option<i64>,
    /// Members in declaration order
    #[serde(default)]
    pub members: Vec<Member>,
    /// Election protocol version
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub protocol_version: Option<i64>,
    /// Whether majority write concern waits for the journal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern_majority_journal_default: Option<bool>,
    /// Cluster-wide tunables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

/// One replica-set member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Member id, unique within the topology
    #[serde(rename = "_id", deserialize_with = "lenient::int")]
    pub id: i64,
    /// `host:port`
    pub host: String,
    /// Votes in elections but holds no data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbiter_only: Option<bool>,
    /// Whether the member builds indexes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_indexes: Option<bool>,
    /// Invisible to client applications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    /// Election priority; 0 never becomes primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    /// Replication lag imposed on this member
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub secondary_delay_secs: Option<i64>,
    /// Election votes, 0 or 1
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub votes: Option<i64>,
}

/// Cluster-wide replication settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Whether secondaries may replicate from other secondaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaining_allowed: Option<bool>,
    /// Heartbeat frequency
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub heartbeat_interval_millis: Option<i64>,
    /// Time before an unanswered heartbeat marks a member down
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub heartbeat_timeout_secs: Option<i64>,
    /// Time before an unreachable primary triggers an election
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub election_timeout_millis: Option<i64>,
    /// Catch-up window for a new primary; -1 is unbounded
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub catch_up_timeout_millis: Option<i64>,
    /// Delay before a caught-up node takes over from a lagging primary
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub catch_up_takeover_delay_millis: Option<i64>,
    /// Default write concern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_last_error_defaults: Option<LastErrorDefaults>,
}

/// Default write concern applied when a client specifies none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastErrorDefaults {
    /// Acknowledgement requirement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<WriteConcernW>,
    /// Acknowledgement timeout in milliseconds, 0 waits forever
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::option_int"
    )]
    pub wtimeout: Option<i64>,
}

/// The `w` component of a write concern: a node count or a tag such as `"majority"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteConcernW {
    /// Acknowledge from this many nodes
    Nodes(i64),
    /// Acknowledge according to a named mode
    Tag(String),
}

impl Topology {
    /// An empty topology named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            members: Vec::new(),
            protocol_version: None,
            write_concern_majority_journal_default: None,
            settings: None,
        }
    }

    /// Append a member.
    #[must_use]
    pub fn with_member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    /// Replace the settings block.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// A copy without the server-assigned version
    #[must_use]
    pub fn without_version(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }

    /// Reject malformed topologies before any command is sent.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("replica set name must not be empty"));
        }
        if self.members.is_empty() {
            return Err(EngineError::validation(format!(
                "replica set '{}' must declare at least one member",
                self.name
            )));
        }

        let mut seen = HashSet::with_capacity(self.members.len());
        for member in &self.members {
            if !seen.insert(member.id) {
                return Err(EngineError::validation(format!(
                    "duplicate member id {} in replica set '{}'",
                    member.id, self.name
                )));
            }
            if !is_host_port(&member.host) {
                return Err(EngineError::validation(format!(
                    "member {} host '{}' is not in host:port form",
                    member.id, member.host
                )));
            }
        }
        Ok(())
    }

    /// Look up a member by id
    pub fn member(&self, id: i64) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }
}

impl Member {
    /// A member with server defaults for every optional attribute
    pub fn new(id: i64, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            arbiter_only: None,
            build_indexes: None,
            hidden: None,
            priority: None,
            secondary_delay_secs: None,
            votes: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_votes(mut self, votes: i64) -> Self {
        self.votes = Some(votes);
        self
    }

    /// Mark as hidden. Hidden members must have priority 0.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = Some(true);
        self.priority = Some(0.0);
        self
    }

    #[must_use]
    pub fn arbiter(mut self) -> Self {
        self.arbiter_only = Some(true);
        self
    }

    #[must_use]
    pub fn with_secondary_delay(mut self, secs: i64) -> Self {
        self.secondary_delay_secs = Some(secs);
        self
    }
}

fn is_host_port(host: &str) -> bool {
    let Some((name, port)) = host.rsplit_once(':') else {
        return false;
    };
    if name.is_empty() || port.parse::<u16>().is_err() {
        return false;
    }
    // bare IPv6 literals must be bracketed
    !name.contains(':') || (name.starts_with('[') && name.ends_with(']'))
}
