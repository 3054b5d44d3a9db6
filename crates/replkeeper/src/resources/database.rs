//! Database resource: create, delete, existence, import and listing
//!
//! A database exists once it holds data, so creation writes a marker document.

use std::future::Future;

use tracing::{Instrument, info, info_span};

use crate::client::ClientInner;
use crate::connection::Session;
use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult, ResourceKind};
use crate::types::{Database, is_protected_database};

/// Database operations of one [`crate::ClusterClient`].
#[derive(Debug, Clone, Copy)]
pub struct DatabaseResource<'a> {
    inner: &'a ClientInner,
}

impl<'a> DatabaseResource<'a> {
    pub(crate) fn new(inner: &'a ClientInner) -> Self {
        Self { inner }
    }

    /// Create database `name` by writing a marker document into it.
    pub async fn create(&self, ctx: &OperationContext, name: &str) -> EngineResult<Database> {
        guard(name, "created")?;
        let span = info_span!("database.create", op_id = %ctx.id(), database = name);
        self.inner
            .retry
            .run(ctx, "create database", |_| async move {
                self.scoped(ctx, "create database", |session| async move {
                    if contains(&session, name).await? {
                        return Err(EngineError::already_exists(ResourceKind::Database, name));
                    }
                    session.create_database(name).await?;
                    info!("Created database");
                    Ok(Database::new(name))
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Drop database `name`.
    pub async fn delete(&self, ctx: &OperationContext, name: &str) -> EngineResult<()> {
        guard(name, "deleted")?;
        let span = info_span!("database.delete", op_id = %ctx.id(), database = name);
        self.inner
            .retry
            .run(ctx, "delete database", |_| async move {
                self.scoped(ctx, "delete database", |session| async move {
                    if !contains(&session, name).await? {
                        return Err(EngineError::does_not_exist(ResourceKind::Database, name));
                    }
                    session.drop_database(name).await?;
                    info!("Dropped database");
                    Ok(())
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Whether database `name` exists
    pub async fn exists(&self, ctx: &OperationContext, name: &str) -> EngineResult<bool> {
        let span = info_span!("database.exists", op_id = %ctx.id(), database = name);
        self.inner
            .retry
            .run(ctx, "database exists", |_| async move {
                self.scoped(ctx, "database exists", |session| async move {
                    contains(&session, name).await
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Adopt existing database `name`.
    pub async fn import_state(&self, ctx: &OperationContext, name: &str) -> EngineResult<Database> {
        guard(name, "imported")?;
        let span = info_span!("database.import", op_id = %ctx.id(), database = name);
        self.inner
            .retry
            .run(ctx, "import database", |_| async move {
                self.scoped(ctx, "import database", |session| async move {
                    if contains(&session, name).await? {
                        Ok(Database::new(name))
                    } else {
                        Err(EngineError::does_not_exist(ResourceKind::Database, name))
                    }
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Every database except the system defaults. An empty result is an error.
    pub async fn list(&self, ctx: &OperationContext) -> EngineResult<Vec<Database>> {
        let span = info_span!("database.list", op_id = %ctx.id());
        self.inner
            .retry
            .run(ctx, "list databases", |_| async move {
                self.scoped(ctx, "list databases", |session| async move {
                    let databases: Vec<Database> = session
                        .list_database_names(None)
                        .await?
                        .into_iter()
                        .filter(|name| !is_protected_database(name))
                        .map(Database::new)
                        .collect();
                    if databases.is_empty() {
                        return Err(EngineError::none_found(ResourceKind::Database));
                    }
                    Ok(databases)
                })
                .await
            })
            .instrument(span)
            .await
    }

    async fn scoped<T, F, Fut>(&self, ctx: &OperationContext, operation: &str, body: F) -> EngineResult<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let manager = &self.inner.manager;
        manager
            .scoped(ctx, manager.preferred_mode(), operation, body)
            .await
    }
}

fn guard(name: &str, action: &'static str) -> EngineResult<()> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("database name must not be empty"));
    }
    if is_protected_database(name) {
        return Err(EngineError::protected(ResourceKind::Database, name, action));
    }
    Ok(())
}

async fn contains(session: &Session, name: &str) -> EngineResult<bool> {
    Ok(session
        .list_database_names(Some(name))
        .await?
        .iter()
        .any(|listed| listed == name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClusterClient;
    use crate::test_helpers::FakeCluster;
    use crate::types::MARKER_COLLECTION;

    fn client(cluster: &FakeCluster) -> ClusterClient {
        ClusterClient::builder("mongodb://db0:27017")
            .with_factory(cluster.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_writes_marker_document() {
        let cluster = FakeCluster::new();
        let client = client(&cluster);
        let ctx = OperationContext::new();

        let created = client.databases().create(&ctx, "app").await.unwrap();
        assert_eq!(created, Database::new("app"));
        assert!(client.databases().exists(&ctx, "app").await.unwrap());

        let inserts = cluster.sent("insert");
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].0, "app");
        assert_eq!(inserts[0].1.value().as_str(), Some(MARKER_COLLECTION));
        let stamp = inserts[0].1.get("documents").unwrap()[0]["created_at"]
            .as_str()
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");

        let err = client.databases().create(&ctx, "app").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_protected_databases_are_refused_before_io() {
        let cluster = FakeCluster::new();
        let client = client(&cluster);
        let ctx = OperationContext::new();

        for name in ["admin", "config", "local"] {
            let err = client.databases().delete(&ctx, name).await.unwrap_err();
            assert!(matches!(err, EngineError::Protected { .. }), "{err}");
        }
        assert_eq!(cluster.opened(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_import_require_presence() {
        let cluster = FakeCluster::new().with_databases(["reports"]);
        let client = client(&cluster);
        let ctx = OperationContext::new();

        let err = client.databases().delete(&ctx, "missing").await.unwrap_err();
        assert!(matches!(err, EngineError::DoesNotExist { .. }));
        assert_eq!(cluster.command_count("dropDatabase"), 0);

        assert_eq!(
            client.databases().import_state(&ctx, "reports").await.unwrap(),
            Database::new("reports")
        );
        client.databases().delete(&ctx, "reports").await.unwrap();
        assert!(!cluster.databases().contains(&"reports".to_string()));
    }

    #[tokio::test]
    async fn test_list_excludes_system_databases() {
        let cluster = FakeCluster::new();
        let client = client(&cluster);
        let ctx = OperationContext::new();

        let err = client.databases().list(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "no databases found");

        client.databases().create(&ctx, "app").await.unwrap();
        assert_eq!(
            client.databases().list(&ctx).await.unwrap(),
            vec![Database::new("app")]
        );
    }
}
