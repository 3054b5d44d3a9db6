use serde::{Deserialize, Serialize};

/// System databases that are never created, deleted or listed
pub const DEFAULT_DATABASES: &[&str] = &["admin", "config", "local"];

/// Database that receives administrative commands
pub const ADMIN_DATABASE: &str = "admin";

/// Collection holding the marker document that materializes a new database
pub const MARKER_COLLECTION: &str = "created_by_replkeeper";

/// A managed database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Database {
    /// Database name
    pub name: String,
}

impl Database {
    /// A database named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Whether `name` is one of [`DEFAULT_DATABASES`]
pub fn is_protected_database(name: &str) -> bool {
    DEFAULT_DATABASES.contains(&name)
}
