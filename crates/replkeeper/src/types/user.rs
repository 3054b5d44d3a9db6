use std::fmt;

use serde::{Deserialize, Serialize};

/// Users that are never created, changed, deleted or listed
pub const DEFAULT_USERS: &[&str] = &["admin"];

/// A user account managed in the admin database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login name
    #[serde(rename = "user")]
    pub username: String,
    /// Clear-text password, only present on the way in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Granted roles
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// A role grant scoped to a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    /// Role name, e.g. `readWrite`
    pub role: String,
    /// Database the role applies to
    #[serde(rename = "db")]
    pub database: String,
}

impl User {
    /// A user without roles
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            roles: Vec::new(),
        }
    }

    /// Grant a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>, database: impl Into<String>) -> Self {
        self.roles.push(Role::new(role, database));
        self
    }

    /// The same account with the password stripped
    #[must_use]
    pub fn without_password(&self) -> Self {
        Self {
            password: None,
            ..self.clone()
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("roles", &self.roles)
            .finish()
    }
}

impl Role {
    /// A role grant
    pub fn new(role: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            database: database.into(),
        }
    }
}

/// Whether `username` is one of [`DEFAULT_USERS`]
pub fn is_protected_user(username: &str) -> bool {
    DEFAULT_USERS.contains(&username)
}
