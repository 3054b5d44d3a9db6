use chrono::Utc;
use replkeeper_driver::{ClusterDriver, Command};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{decode_field, payload_command, run};
use crate::error::{EngineError, EngineResult};
use crate::types::{ADMIN_DATABASE, ClusterStatus, MARKER_COLLECTION, Role, Topology, User};

/// Key of the configuration document in a `replSetGetConfig` reply
const CONFIG_KEY: &str = "config";

/// Commands and reply shapes of the 6.x server line.
#[derive(Debug, Clone, Copy, Default)]
pub struct V6Protocol;

#[derive(Deserialize)]
struct DatabaseName {
    name: String,
}

impl V6Protocol {
    pub(crate) async fn initiate(
        &self,
        driver: &dyn ClusterDriver,
        topology: &Topology,
    ) -> EngineResult<()> {
        let command = payload_command("replSetInitiate", topology)?;
        run(driver, ADMIN_DATABASE, command).await.map(drop)
    }

    pub(crate) async fn reconfigure(
        &self,
        driver: &dyn ClusterDriver,
        topology: &Topology,
    ) -> EngineResult<()> {
        let command = payload_command("replSetReconfig", topology)?;
        run(driver, ADMIN_DATABASE, command).await.map(drop)
    }

    pub(crate) async fn get_config(&self, driver: &dyn ClusterDriver) -> EngineResult<Topology> {
        let reply = run(driver, ADMIN_DATABASE, Command::new("replSetGetConfig", 1)).await?;
        decode_field(&reply, "replSetGetConfig", CONFIG_KEY)
    }

    pub(crate) async fn get_status(&self, driver: &dyn ClusterDriver) -> EngineResult<ClusterStatus> {
        let reply = run(driver, ADMIN_DATABASE, Command::new("replSetGetStatus", 1)).await?;
        serde_json::from_value(reply).map_err(|e| {
            EngineError::protocol(format!("replSetGetStatus reply is malformed: {e}"))
        })
    }

    pub(crate) async fn list_database_names(
        &self,
        driver: &dyn ClusterDriver,
        name: Option<&str>,
    ) -> EngineResult<Vec<String>> {
        let mut command = Command::new("listDatabases", 1).arg("nameOnly", true);
        if let Some(name) = name {
            command = command.arg("filter", json!({ "name": name }));
        }
        let reply = run(driver, ADMIN_DATABASE, command).await?;
        let databases: Vec<DatabaseName> = decode_field(&reply, "listDatabases", "databases")?;
        Ok(databases.into_iter().map(|d| d.name).collect())
    }

    pub(crate) async fn create_database(
        &self,
        driver: &dyn ClusterDriver,
        name: &str,
    ) -> EngineResult<()> {
        // a database only exists once it holds data
        let created_at = Utc::now().to_rfc3339();
        let command = Command::new("insert", MARKER_COLLECTION)
            .arg("documents", json!([{ "created_at": created_at }]));
        run(driver, name, command).await.map(drop)
    }

    pub(crate) async fn drop_database(&self, driver: &dyn ClusterDriver, name: &str) -> EngineResult<()> {
        run(driver, name, Command::new("dropDatabase", 1))
            .await
            .map(drop)
    }

    pub(crate) async fn users_info(&self, driver: &dyn ClusterDriver) -> EngineResult<Vec<User>> {
        let reply = run(driver, ADMIN_DATABASE, Command::new("usersInfo", 1)).await?;
        let users: Vec<User> = decode_field(&reply, "usersInfo", "users")?;
        Ok(users.into_iter().map(|u| u.without_password()).collect())
    }

    pub(crate) async fn create_user(&self, driver: &dyn ClusterDriver, user: &User) -> EngineResult<()> {
        let password = user.password.as_deref().ok_or_else(|| {
            EngineError::validation(format!("user '{}' needs a password", user.username))
        })?;
        let command = Command::new("createUser", user.username.as_str())
            .arg("pwd", password)
            .arg("roles", roles(&user.roles));
        run(driver, ADMIN_DATABASE, command).await.map(drop)
    }

    pub(crate) async fn update_user(&self, driver: &dyn ClusterDriver, user: &User) -> EngineResult<()> {
        let mut command = Command::new("updateUser", user.username.as_str());
        if let Some(password) = user.password.as_deref() {
            command = command.arg("pwd", password);
        }
        let command = command.arg("roles", roles(&user.roles));
        run(driver, ADMIN_DATABASE, command).await.map(drop)
    }

    pub(crate) async fn drop_user(&self, driver: &dyn ClusterDriver, username: &str) -> EngineResult<()> {
        run(driver, ADMIN_DATABASE, Command::new("dropUser", username))
            .await
            .map(drop)
    }
}

fn roles(roles: &[Role]) -> Value {
    Value::Array(
        roles
            .iter()
            .map(|r| json!({ "role": r.role, "db": r.database }))
            .collect(),
    )
}
