//! Opaque command documents.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DriverResult;

/// A database command: the command name with its primary value, followed by named arguments.
///
/// The server identifies a command by the *first* key of the document, so the name is stored
/// apart from the arguments and drivers must emit it first.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    value: Value,
    args: Vec<(String, Value)>,
}

impl Command {
    /// Create a command with its primary value, e.g. `Command::new("replSetGetStatus", 1)`.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            args: Vec::new(),
        }
    }

    /// Create a command whose primary value is a serializable payload.
    pub fn with_payload<T: Serialize>(name: impl Into<String>, payload: &T) -> DriverResult<Self> {
        Ok(Self::new(name, serde_json::to_value(payload)?))
    }

    /// Append a named argument.
    #[must_use]
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Command name (the first key of the document)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary value stored under the command name
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Named arguments in insertion order
    pub fn args(&self) -> &[(String, Value)] {
        &self.args
    }

    /// Look up a named argument.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.args.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Flatten into a JSON object. Key order is only preserved when `serde_json` keeps
    /// insertion order, so drivers that care about order should walk [`Command::args`].
    pub fn to_document(&self) -> Map<String, Value> {
        let mut document = Map::with_capacity(self.args.len() + 1);
        document.insert(self.name.clone(), self.value.clone());
        for (key, value) in &self.args {
            document.insert(key.clone(), value.clone());
        }
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_name_and_args() {
        let command = Command::new("createUser", "alice")
            .arg("pwd", "secret")
            .arg("roles", json!([{"role": "read", "db": "app"}]));

        assert_eq!(command.name(), "createUser");
        assert_eq!(command.value(), &json!("alice"));
        assert_eq!(command.get("pwd"), Some(&json!("secret")));
        assert_eq!(command.get("missing"), None);
        assert_eq!(command.args().len(), 2);
    }

    #[test]
    fn test_payload_command() {
        #[derive(Serialize)]
        struct Payload {
            #[serde(rename = "_id")]
            id: &'static str,
        }

        let command = Command::with_payload("replSetInitiate", &Payload { id: "rs0" }).unwrap();
        assert_eq!(command.value(), &json!({"_id": "rs0"}));

        let document = command.to_document();
        assert_eq!(document.get("replSetInitiate"), Some(&json!({"_id": "rs0"})));
    }
}
