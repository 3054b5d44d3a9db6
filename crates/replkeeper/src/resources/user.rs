//! User resource on the admin database

use std::future::Future;

use tracing::{Instrument, info, info_span};

use crate::client::ClientInner;
use crate::connection::Session;
use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult, ResourceKind};
use crate::types::{User, is_protected_user};

/// User operations of one [`crate::ClusterClient`]. Users live in the admin database.
#[derive(Debug, Clone, Copy)]
pub struct UserResource<'a> {
    inner: &'a ClientInner,
}

impl<'a> UserResource<'a> {
    pub(crate) fn new(inner: &'a ClientInner) -> Self {
        Self { inner }
    }

    /// Create `user`. A password is required.
    pub async fn create(&self, ctx: &OperationContext, user: &User) -> EngineResult<()> {
        guard(&user.username, "created")?;
        if user.password.is_none() {
            return Err(EngineError::validation(format!(
                "user '{}' needs a password",
                user.username
            )));
        }
        let span = info_span!("user.create", op_id = %ctx.id(), user = %user.username);
        self.inner
            .retry
            .run(ctx, "create user", |_| async move {
                self.scoped(ctx, "create user", |session| async move {
                    if find(&session, &user.username).await?.is_some() {
                        return Err(EngineError::already_exists(ResourceKind::User, &user.username));
                    }
                    session.create_user(user).await?;
                    info!(roles = user.roles.len(), "Created user");
                    Ok(())
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Replace the roles of `user`, and its password when one is given.
    pub async fn update(&self, ctx: &OperationContext, user: &User) -> EngineResult<()> {
        guard(&user.username, "updated")?;
        let span = info_span!("user.update", op_id = %ctx.id(), user = %user.username);
        self.inner
            .retry
            .run(ctx, "update user", |_| async move {
                self.scoped(ctx, "update user", |session| async move {
                    if find(&session, &user.username).await?.is_none() {
                        return Err(EngineError::does_not_exist(ResourceKind::User, &user.username));
                    }
                    session.update_user(user).await?;
                    info!(roles = user.roles.len(), "Updated user");
                    Ok(())
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Drop `username`.
    pub async fn delete(&self, ctx: &OperationContext, username: &str) -> EngineResult<()> {
        guard(username, "deleted")?;
        let span = info_span!("user.delete", op_id = %ctx.id(), user = username);
        self.inner
            .retry
            .run(ctx, "delete user", |_| async move {
                self.scoped(ctx, "delete user", |session| async move {
                    if find(&session, username).await?.is_none() {
                        return Err(EngineError::does_not_exist(ResourceKind::User, username));
                    }
                    session.drop_user(username).await?;
                    info!("Dropped user");
                    Ok(())
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Whether `username` exists
    pub async fn exists(&self, ctx: &OperationContext, username: &str) -> EngineResult<bool> {
        let span = info_span!("user.exists", op_id = %ctx.id(), user = username);
        self.inner
            .retry
            .run(ctx, "user exists", |_| async move {
                self.scoped(ctx, "user exists", |session| async move {
                    Ok(find(&session, username).await?.is_some())
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Adopt existing user `username`. The password is never returned.
    pub async fn import_state(&self, ctx: &OperationContext, username: &str) -> EngineResult<User> {
        guard(username, "imported")?;
        let span = info_span!("user.import", op_id = %ctx.id(), user = username);
        self.inner
            .retry
            .run(ctx, "import user", |_| async move {
                self.scoped(ctx, "import user", |session| async move {
                    find(&session, username)
                        .await?
                        .ok_or_else(|| EngineError::does_not_exist(ResourceKind::User, username))
                })
                .await
            })
            .instrument(span)
            .await
    }

    /// Every user except the system defaults, without passwords. An empty result is an error.
    pub async fn list(&self, ctx: &OperationContext) -> EngineResult<Vec<User>> {
        let span = info_span!("user.list", op_id = %ctx.id());
        self.inner
            .retry
            .run(ctx, "list users", |_| async move {
                self.scoped(ctx, "list users", |session| async move {
                    let users: Vec<User> = session
                        .users_info()
                        .await?
                        .into_iter()
                        .filter(|u| !is_protected_user(&u.username))
                        .collect();
                    if users.is_empty() {
                        return Err(EngineError::none_found(ResourceKind::User));
                    }
                    Ok(users)
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

fn guard(username: &str, action: &'static str) -> EngineResult<()> {
    if username.trim().is_empty() {
        return Err(EngineError::validation("username must not be empty"));
    }
    if is_protected_user(username) {
        return Err(EngineError::protected(ResourceKind::User, username, action));
    }
    Ok(())
}

async fn find(session: &Session, username: &str) -> EngineResult<Option<User>> {
    Ok(session
        .users_info()
        .await?
        .into_iter()
        .find(|u| u.username == username))
}
