//! Single-document resources
//!
//! Databases and users have no state machine: each operation is one retried, scoped command
//! sequence over the connection mode preferred by the endpoint. System defaults are never
//! managed.

mod database;
mod user;

pub use database::DatabaseResource;
pub use user::UserResource;
