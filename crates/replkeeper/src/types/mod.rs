//! Data model shared by the engine components

mod database;
mod status;
mod topology;
mod user;

pub use database::{ADMIN_DATABASE, DEFAULT_DATABASES, Database, MARKER_COLLECTION, is_protected_database};
pub use status::{ClusterStatus, MemberRole, MemberStatus, ReplicaSetState};
pub use topology::{LastErrorDefaults, Member, Settings, Topology, WriteConcernW};
pub use user::{DEFAULT_USERS, Role, User, is_protected_user};

/// Deserializers tolerant of the numeric shapes servers emit (`1`, `1.0`, `true`).
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer, de::Error};
    use serde_json::Value;

    fn to_i64<E: Error>(value: &Value) -> Result<i64, E> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| f as i64)
                })
                .ok_or_else(|| E::custom(format!("expected an integer, got {n}"))),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(E::custom(format!("expected an integer, got {other}"))),
        }
    }

    pub(crate) fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        to_i64(&Value::deserialize(deserializer)?)
    }

    pub(crate) fn option_int<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            value => to_i64(&value).map(Some),
        }
    }

    /// `1`/`1.0`/`true` are set; `0`/`false` are clear.
    pub(crate) fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            value => to_i64(&value).map(|n| n == 1),
        }
    }
}
