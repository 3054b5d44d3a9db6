//! Config normalizer
//!
//! The server echoes back every configuration field it fills in, whether or not the caller asked
//! for it. [`normalize`] strips those values again so that comparing a freshly read topology
//! against the previously declared one only reports real drift.
//!
//! Rules:
//! - the server-assigned version is always cleared;
//! - `settings` collapses to unset when every sub-field is either absent or equal to its
//!   built-in default;
//! - `protocolVersion` and `writeConcernMajorityJournalDefault` collapse individually;
//! - each member attribute collapses individually.

use crate::types::{LastErrorDefaults, Member, Settings, Topology, WriteConcernW};

/// Built-in per-member defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberDefaults {
    /// `arbiterOnly`
    pub arbiter_only: bool,
    /// `buildIndexes`
    pub build_indexes: bool,
    /// `hidden`
    pub hidden: bool,
    /// `priority`
    pub priority: f64,
    /// `secondaryDelaySecs`
    pub secondary_delay_secs: i64,
    /// `votes`
    pub votes: i64,
}

/// Values the server assigns to configuration fields the caller leaves out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerDefaults {
    /// `settings.chainingAllowed`
    pub chaining_allowed: bool,
    /// `settings.heartbeatIntervalMillis`
    pub heartbeat_interval_millis: i64,
    /// `settings.heartbeatTimeoutSecs`
    pub heartbeat_timeout_secs: i64,
    /// `settings.electionTimeoutMillis`
    pub election_timeout_millis: i64,
    /// `settings.catchUpTimeoutMillis`
    pub catch_up_timeout_millis: i64,
    /// `settings.catchUpTakeoverDelayMillis`
    pub catch_up_takeover_delay_millis: i64,
    /// `settings.getLastErrorDefaults.w`
    pub write_concern_w: i64,
    /// `settings.getLastErrorDefaults.wtimeout`
    pub write_concern_wtimeout: i64,
    /// `protocolVersion`
    pub protocol_version: i64,
    /// `writeConcernMajorityJournalDefault`
    pub write_concern_majority_journal_default: bool,
    /// Member attributes
    pub member: MemberDefaults,
}

impl ServerDefaults {
    /// Defaults of the supported server line
    pub const BUILTIN: Self = Self {
        chaining_allowed: true,
        heartbeat_interval_millis: 2000,
        heartbeat_timeout_secs: 10,
        election_timeout_millis: 10_000,
        catch_up_timeout_millis: -1,
        catch_up_takeover_delay_millis: 30_000,
        write_concern_w: 1,
        write_concern_wtimeout: 0,
        protocol_version: 1,
        write_concern_majority_journal_default: true,
        member: MemberDefaults {
            arbiter_only: false,
            build_indexes: true,
            hidden: false,
            priority: 1.0,
            secondary_delay_secs: 0,
            votes: 1,
        },
    };

    /// The settings block the server reports when none was requested
    pub fn settings(&self) -> Settings {
        Settings {
            chaining_allowed: Some(self.chaining_allowed),
            heartbeat_interval_millis: Some(self.heartbeat_interval_millis),
            heartbeat_timeout_secs: Some(self.heartbeat_timeout_secs),
            election_timeout_millis: Some(self.election_timeout_millis),
            catch_up_timeout_millis: Some(self.catch_up_timeout_millis),
            catch_up_takeover_delay_millis: Some(self.catch_up_takeover_delay_millis),
            get_last_error_defaults: Some(LastErrorDefaults {
                w: Some(WriteConcernW::Nodes(self.write_concern_w)),
                wtimeout: Some(self.write_concern_wtimeout),
            }),
        }
    }

    /// Fill every unset field the way the server does on read-back.
    pub fn fill(&self, topology: &Topology) -> Topology {
        let defaults = self.settings();
        let settings = match &topology.settings {
            None => defaults,
            Some(s) => Settings {
                chaining_allowed: s.chaining_allowed.or(defaults.chaining_allowed),
                heartbeat_interval_millis: s
                    .heartbeat_interval_millis
                    .or(defaults.heartbeat_interval_millis),
                heartbeat_timeout_secs: s
                    .heartbeat_timeout_secs
                    .or(defaults.heartbeat_timeout_secs),
                election_timeout_millis: s
                    .election_timeout_millis
                    .or(defaults.election_timeout_millis),
                catch_up_timeout_millis: s
                    .catch_up_timeout_millis
                    .or(defaults.catch_up_timeout_millis),
                catch_up_takeover_delay_millis: s
                    .catch_up_takeover_delay_millis
                    .or(defaults.catch_up_takeover_delay_millis),
                get_last_error_defaults: Some(LastErrorDefaults {
                    w: s
                        .get_last_error_defaults
                        .as_ref()
                        .and_then(|d| d.w.clone())
                        .or(Some(WriteConcernW::Nodes(self.write_concern_w))),
                    wtimeout: s
                        .get_last_error_defaults
                        .as_ref()
                        .and_then(|d| d.wtimeout)
                        .or(Some(self.write_concern_wtimeout)),
                }),
            },
        };

        let m = &self.member;
        Topology {
            name: topology.name.clone(),
            version: topology.version,
            members: topology
                .members
                .iter()
                .map(|member| Member {
                    id: member.id,
                    host: member.host.clone(),
                    arbiter_only: member.arbiter_only.or(Some(m.arbiter_only)),
                    build_indexes: member.build_indexes.or(Some(m.build_indexes)),
                    hidden: member.hidden.or(Some(m.hidden)),
                    priority: member.priority.or(Some(m.priority)),
                    secondary_delay_secs: member
                        .secondary_delay_secs
                        .or(Some(m.secondary_delay_secs)),
                    votes: member.votes.or(Some(m.votes)),
                })
                .collect(),
            protocol_version: topology.protocol_version.or(Some(self.protocol_version)),
            write_concern_majority_journal_default: topology
                .write_concern_majority_journal_default
                .or(Some(self.write_concern_majority_journal_default)),
            settings: Some(settings),
        }
    }

    fn settings_are_default(&self, settings: &Settings) -> bool {
        fn matches<T: PartialEq>(value: Option<&T>, default: &T) -> bool {
            value.is_none_or(|v| v == default)
        }

        let write_concern = settings.get_last_error_defaults.as_ref();
        matches(settings.chaining_allowed.as_ref(), &self.chaining_allowed)
            && matches(
                settings.heartbeat_interval_millis.as_ref(),
                &self.heartbeat_interval_millis,
            )
            && matches(
                settings.heartbeat_timeout_secs.as_ref(),
                &self.heartbeat_timeout_secs,
            )
            && matches(
                settings.election_timeout_millis.as_ref(),
                &self.election_timeout_millis,
            )
            && matches(
                settings.catch_up_timeout_millis.as_ref(),
                &self.catch_up_timeout_millis,
            )
            && matches(
                settings.catch_up_takeover_delay_millis.as_ref(),
                &self.catch_up_takeover_delay_millis,
            )
            && matches(
                write_concern.and_then(|d| d.w.as_ref()),
                &WriteConcernW::Nodes(self.write_concern_w),
            )
            && matches(
                write_concern.and_then(|d| d.wtimeout.as_ref()),
                &self.write_concern_wtimeout,
            )
    }
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self::BUILTIN
    }
}

/// Strip server-filled defaults using [`ServerDefaults::BUILTIN`].
pub fn normalize(topology: &Topology) -> Topology {
    normalize_with(topology, &ServerDefaults::BUILTIN)
}

/// Strip server-filled defaults using `defaults`.
pub fn normalize_with(topology: &Topology, defaults: &ServerDefaults) -> Topology {
    fn unless<T: PartialEq>(value: Option<T>, default: T) -> Option<T> {
        value.filter(|v| *v != default)
    }

    let m = &defaults.member;
    Topology {
        name: topology.name.clone(),
        version: None,
        members: topology
            .members
            .iter()
            .map(|member| Member {
                id: member.id,
                host: member.host.clone(),
                arbiter_only: unless(member.arbiter_only, m.arbiter_only),
                build_indexes: unless(member.build_indexes, m.build_indexes),
                hidden: unless(member.hidden, m.hidden),
                priority: unless(member.priority, m.priority),
                secondary_delay_secs: unless(member.secondary_delay_secs, m.secondary_delay_secs),
                votes: unless(member.votes, m.votes),
            })
            .collect(),
        protocol_version: unless(topology.protocol_version, defaults.protocol_version),
        write_concern_majority_journal_default: unless(
            topology.write_concern_majority_journal_default,
            defaults.write_concern_majority_journal_default,
        ),
        settings: topology
            .settings
            .clone()
            .filter(|s| !defaults.settings_are_default(s)),
    }
}
