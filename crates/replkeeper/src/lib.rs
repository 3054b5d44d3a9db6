//! # replkeeper
//!
//! A reconciliation engine for MongoDB replica sets. Callers declare the desired state of a
//! replica set (its name, members and settings), of databases and of users; the engine
//! converges the running cluster to it, verifies the result and imports existing state.
//!
//! ## Architecture
//!
//! ```text
//! ClusterClient ──▶ ReplicaSetReconciler / DatabaseResource / UserResource
//!        │                     │
//!        │                     ├── RetryPolicy       bounded attempts, backoff
//!        │                     ├── ReadinessPoller   waits for the stable predicate
//!        │                     └── ConnectionManager scoped links, version dispatch
//!        │                                   │
//!        └───────────────────────────────────┴──▶ replkeeper_driver::ClusterDriver
//! ```
//!
//! Every operation runs under an [`OperationContext`] carrying a cancellation token and a
//! deadline, and every failure is an [`EngineError`] classified as transient or unrecoverable.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use replkeeper::{ClusterClient, Member, OperationKind, Topology};
//!
//! let client = ClusterClient::builder("mongodb://db0:27017,db1:27017,db2:27017/?replicaSet=rs0")
//!     .with_retry_attempts(5)
//!     .build()?;
//!
//! let desired = Topology::new("rs0")
//!     .with_member(Member::new(0, "db0:27017"))
//!     .with_member(Member::new(1, "db1:27017"))
//!     .with_member(Member::new(2, "db2:27017"));
//!
//! let ctx = client.context(OperationKind::Create);
//! client.replica_set().create(&ctx, &desired).await?;
//! ```
//!
//! ## Features
//!
//! - `mongodb` - connect through the official MongoDB driver; without it a
//!   [`replkeeper_driver::DriverFactory`] must be supplied to the builder

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_panics_doc
)]

mod client;
mod config;
mod connection;
mod context;
mod error;
mod logging;
mod normalize;
mod poller;
mod reconciler;
mod resources;
mod retry;
mod version;

pub mod protocol;
pub mod types;

/// In-memory cluster and fixtures for tests
pub mod test_helpers;

pub use client::{
    ClusterClient, ClusterClientBuilder, DEFAULT_OPERATION_TIMEOUT,
    DEFAULT_READINESS_GATE_OBSERVATIONS, OperationKind, OperationTimeouts,
};
pub use config::{ConfigError, ENV_PREFIX, EngineConfig};
pub use connection::{ClusterHandle, ConnectionManager, DEFAULT_CONNECT_TIMEOUT, Session};
pub use context::{Interrupt, OperationContext};
pub use error::{
    CODE_ALREADY_INITIALIZED, CODE_NO_REPLICATION_ENABLED, CODE_NOT_YET_INITIALIZED, EngineError,
    EngineResult, ResourceKind,
};
pub use logging::{LogOutput, LogRotation, LoggingConfig, LoggingGuard};
pub use normalize::{MemberDefaults, ServerDefaults, normalize, normalize_with};
pub use poller::{DEFAULT_POLL_INTERVAL, ReadinessPoller};
pub use protocol::{ProtocolAdapter, ServerLine};
pub use reconciler::ReplicaSetReconciler;
pub use resources::{DatabaseResource, UserResource};
pub use retry::{DEFAULT_MAX_DELAY, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryPolicy};
pub use types::{
    ClusterStatus, Database, LastErrorDefaults, Member, MemberRole, MemberStatus, ReplicaSetState,
    Role, Settings, Topology, User, WriteConcernW,
};
pub use version::{REQUIRED_VERSION, VersionDispatcher, VersionRegistry};

pub use replkeeper_driver;
pub use replkeeper_driver::{ConnectMode, Endpoint};
