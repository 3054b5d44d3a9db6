//! Observed replica-set health.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::lenient;

/// Reply of `replSetGetStatus`, reduced to what the stable predicate needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Overall health flag
    #[serde(default, deserialize_with = "lenient::flag")]
    pub ok: bool,
    /// Replica-set name as seen by the server
    #[serde(default)]
    pub set: String,
    /// Per-member observations
    #[serde(default)]
    pub members: Vec<MemberStatus>,
}

/// One member as seen by the node that answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    /// `host:port`
    pub name: String,
    /// Current role
    #[serde(rename = "stateStr")]
    pub role: MemberRole,
    /// Whether the member is reachable and healthy
    #[serde(default, deserialize_with = "lenient::flag")]
    pub health: bool,
}

/// Replication role label reported as `stateStr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemberRole {
    /// Accepts writes
    Primary,
    /// Replicates from the primary
    Secondary,
    /// Votes only
    Arbiter,
    /// Has not loaded its configuration yet
    Startup,
    /// Performing initial sync
    Startup2,
    /// Not yet able to serve reads
    Recovering,
    /// Rolling back writes after a failover
    Rollback,
    /// Unreachable from the reporting node
    Down,
    /// No longer part of the set
    Removed,
    /// State not yet known to the reporting node
    Unknown,
    /// Any label this engine does not model
    Other(String),
}

impl From<String> for MemberRole {
    fn from(label: String) -> Self {
        match label.as_str() {
            "PRIMARY" => Self::Primary,
            "SECONDARY" => Self::Secondary,
            "ARBITER" => Self::Arbiter,
            "STARTUP" => Self::Startup,
            "STARTUP2" => Self::Startup2,
            "RECOVERING" => Self::Recovering,
            "ROLLBACK" => Self::Rollback,
            "DOWN" => Self::Down,
            "REMOVED" => Self::Removed,
            "UNKNOWN" => Self::Unknown,
            _ => Self::Other(label),
        }
    }
}

impl From<MemberRole> for String {
    fn from(role: MemberRole) -> Self {
        role.to_string()
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::Arbiter => "ARBITER",
            Self::Startup => "STARTUP",
            Self::Startup2 => "STARTUP2",
            Self::Recovering => "RECOVERING",
            Self::Rollback => "ROLLBACK",
            Self::Down => "DOWN",
            Self::Removed => "REMOVED",
            Self::Unknown => "UNKNOWN",
            Self::Other(label) => label.as_str(),
        };
        f.write_str(label)
    }
}

impl MemberStatus {
    /// A member observation
    pub fn new(name: impl Into<String>, role: MemberRole, health: bool) -> Self {
        Self {
            name: name.into(),
            role,
            health,
        }
    }
}

impl ClusterStatus {
    /// Number of members currently reporting the primary role
    pub fn primary_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.role == MemberRole::Primary)
            .count()
    }

    /// Check the stable predicate for `name`, describing the first violation found.
    ///
    /// Stable means: health flag set, set name equal to `name`, every member healthy, and exactly
    /// one primary.
    pub fn stability(&self, name: &str) -> Result<(), String> {
        if !self.ok {
            return Err("status reply is not ok".to_string());
        }
        if self.set != name {
            return Err(format!("server reports set '{}', expected '{name}'", self.set));
        }
        let unhealthy: Vec<&str> = self
            .members
            .iter()
            .filter(|m| !m.health)
            .map(|m| m.name.as_str())
            .collect();
        if !unhealthy.is_empty() {
            return Err(format!("unhealthy members: {}", unhealthy.join(", ")));
        }
        match self.primary_count() {
            1 => Ok(()),
            0 => Err("no primary".to_string()),
            n => Err(format!("{n} primaries")),
        }
    }

    /// Whether the stable predicate holds for `name`
    pub fn is_stable(&self, name: &str) -> bool {
        self.stability(name).is_ok()
    }

    /// Classify into a [`ReplicaSetState`] for `name`.
    pub fn state(&self, name: &str) -> ReplicaSetState {
        if self.is_stable(name) {
            ReplicaSetState::Stable
        } else {
            ReplicaSetState::Degraded
        }
    }

    /// One-line description used in logs and timeout errors
    pub fn summary(&self) -> String {
        let roles: Vec<String> = self
            .members
            .iter()
            .map(|m| {
                let health = if m.health { "" } else { " unhealthy" };
                format!("{}={}{}", m.name, m.role, health)
            })
            .collect();
        format!("set={} ok={} [{}]", self.set, self.ok, roles.join(", "))
    }
}

/// Lifecycle state of one named replica set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSetState {
    /// No replica set has been initiated on the target
    Absent,
    /// Inside create, before the initiate command returned
    Initiating,
    /// Polling for the stable predicate
    Converging,
    /// Quorum with exactly one primary and every member healthy
    Stable,
    /// Reachable but not stable
    Degraded,
}

impl fmt::Display for ReplicaSetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Initiating => write!(f, "initiating"),
            Self::Converging => write!(f, "converging"),
            Self::Stable => write!(f, "stable"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}
