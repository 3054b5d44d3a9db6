//! [`ClusterDriver`] backed by the official MongoDB driver.

use futures::FutureExt;
use futures::future::BoxFuture;
use mongodb::bson::{self, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value;

use crate::command::Command;
use crate::endpoint::{ConnectMode, Endpoint};
use crate::error::{DriverError, DriverResult};
use crate::traits::{ClusterDriver, DriverFactory};

/// Opens links with [`mongodb::Client`].
#[derive(Debug, Clone, Default)]
pub struct MongoDriverFactory {
    app_name: Option<String>,
}

impl MongoDriverFactory {
    /// Create a factory with driver defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `name` as the application name in server logs.
    #[must_use]
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

impl DriverFactory for MongoDriverFactory {
    fn open<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        mode: ConnectMode,
    ) -> BoxFuture<'a, DriverResult<Box<dyn ClusterDriver>>> {
        async move {
            let uri = endpoint.for_mode(mode).to_uri();
            let mut options = ClientOptions::parse(uri).await.map_err(map_error)?;
            if mode == ConnectMode::Direct {
                options.repl_set_name = None;
                options.direct_connection = Some(true);
            }
            if let Some(name) = &self.app_name {
                options.app_name = Some(name.clone());
            }

            let client = Client::with_options(options).map_err(map_error)?;
            Ok(Box::new(MongoDriver { client }) as Box<dyn ClusterDriver>)
        }
        .boxed()
    }
}

/// A live [`mongodb::Client`].
#[derive(Debug, Clone)]
pub struct MongoDriver {
    client: Client,
}

impl MongoDriver {
    /// Wrap an already configured client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl ClusterDriver for MongoDriver {
    fn ping(&self) -> BoxFuture<'_, DriverResult<()>> {
        async move {
            self.client
                .database("admin")
                .run_command(bson::doc! { "ping": 1 })
                .await
                .map_err(map_error)?;
            Ok(())
        }
        .boxed()
    }

    fn run_command<'a>(
        &'a self,
        database: &'a str,
        command: Command,
    ) -> BoxFuture<'a, DriverResult<Value>> {
        async move {
            let document = to_document(&command)?;
            let reply = self
                .client
                .database(database)
                .run_command(document)
                .await
                .map_err(map_error)?;
            Ok(Bson::Document(reply).into_relaxed_extjson())
        }
        .boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, DriverResult<()>> {
        async move {
            self.client.clone().shutdown().await;
            Ok(())
        }
        .boxed()
    }
}

fn to_document(command: &Command) -> DriverResult<Document> {
    let mut document = Document::new();
    document.insert(command.name(), to_bson(command.value())?);
    for (key, value) in command.args() {
        document.insert(key.as_str(), to_bson(value)?);
    }
    Ok(document)
}

fn to_bson(value: &Value) -> DriverResult<Bson> {
    bson::to_bson(value).map_err(|e| DriverError::SerializationFailed(e.to_string()))
}

fn map_error(err: MongoError) -> DriverError {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => DriverError::Command {
            code: command.code,
            code_name: Some(command.code_name.clone()),
            message: command.message.clone(),
        },
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
            DriverError::ConnectionFailed(err.to_string())
        }
        ErrorKind::Authentication { .. } => DriverError::AuthenticationFailed(err.to_string()),
        ErrorKind::InvalidArgument { .. } => DriverError::ConfigurationError(err.to_string()),
        ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            DriverError::SerializationFailed(err.to_string())
        }
        _ => DriverError::Internal(err.to_string()),
    }
}
