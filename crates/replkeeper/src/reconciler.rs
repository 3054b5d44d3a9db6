//! Replica-set reconciler
//!
//! Converges a cluster to a declared [`Topology`] and reports its normalized state back.
//!
//! ```text
//!   Absent ──create──▶ Initiating ──▶ Converging ──▶ Stable
//!                                          ▲            │
//!                                          └──update────┘
//! ```
//!
//! `Degraded` is an observation, never a resting state: the poller keeps probing until the set
//! is stable or the operation budget runs out. Every mutating operation runs as one retry
//! executor invocation, so a transient failure restarts the whole sequence.

use replkeeper_driver::ConnectMode;
use tracing::{Instrument, debug, info, info_span};

use crate::client::ClientInner;
use crate::connection::Session;
use crate::context::OperationContext;
use crate::error::{CODE_ALREADY_INITIALIZED, EngineError, EngineResult, ResourceKind};
use crate::normalize::normalize;
use crate::types::{ClusterStatus, ReplicaSetState, Topology};

/// Replica-set operations of one [`crate::ClusterClient`].
#[derive(Debug, Clone, Copy)]
pub struct ReplicaSetReconciler<'a> {
    inner: &'a ClientInner,
}

impl<'a> ReplicaSetReconciler<'a> {
    pub(crate) fn new(inner: &'a ClientInner) -> Self {
        Self { inner }
    }

    /// Bootstrap the replica set described by `desired` and wait until it is stable.
    ///
    /// Runs over a direct link to the first configured host. An `AlreadyInitialized` reply is
    /// accepted when the running set already carries the desired name, so a retried attempt
    /// whose initiate reached the server still converges.
    pub async fn create(&self, ctx: &OperationContext, desired: &Topology) -> EngineResult<()> {
        desired.validate()?;
        let name = desired.name.as_str();
        let span = info_span!("replica_set.create", op_id = %ctx.id(), replica_set = name);

        async {
            info!(state = %ReplicaSetState::Absent, members = desired.members.len(), "Creating replica set");
            self.inner
                .retry
                .run(ctx, "create", |attempt| async move {
                    self.initiate(ctx, desired).await?;
                    info!(state = %ReplicaSetState::Converging, attempt, "Waiting for quorum");

                    let status = self.wait_stable(ctx, name, ConnectMode::Direct).await?;
                    info!(state = %ReplicaSetState::Stable, status = %status.summary(), "Replica set created");
                    Ok(())
                })
                .await
        }
        .instrument(span)
        .await
    }

    /// Reconfigure the running set to `desired` and wait until it is stable again.
    ///
    /// Refuses with [`EngineError::NotReady`] when the set is not stable beforehand; the
    /// reconfigure command is never sent in that case.
    pub async fn update(&self, ctx: &OperationContext, desired: &Topology) -> EngineResult<()> {
        desired.validate()?;
        let name = desired.name.as_str();
        let span = info_span!("replica_set.update", op_id = %ctx.id(), replica_set = name);

        async {
            self.inner
                .retry
                .run(ctx, "update", |attempt| async move {
                    let version = self
                        .inner
                        .manager
                        .scoped(ctx, ConnectMode::SetAware, "replSetReconfig", |session| async move {
                            self.readiness_gate(&session, name).await?;

                            let live = session.get_config().await?;
                            if live.name != name {
                                return Err(EngineError::does_not_exist(ResourceKind::ReplicaSet, name));
                            }
                            let current = live.version.filter(|v| *v > 0).ok_or_else(|| {
                                EngineError::protocol(format!(
                                    "replica set '{name}' reports no configuration version"
                                ))
                            })?;

                            let mut next = desired.clone();
                            next.version = Some(current + 1);
                            info!(from_version = current, to_version = current + 1, "Reconfiguring replica set");
                            session.reconfigure(&next).await?;
                            Ok(current + 1)
                        })
                        .await?;
                    info!(state = %ReplicaSetState::Converging, version, attempt, "Waiting for quorum");

                    let status = self.wait_stable(ctx, name, ConnectMode::SetAware).await?;
                    info!(state = %ReplicaSetState::Stable, status = %status.summary(), "Replica set updated");
                    Ok(())
                })
                .await
        }
        .instrument(span)
        .await
    }

    /// Whether a replica set named `name` runs on the cluster.
    ///
    /// A node that was never initiated answers `false`. Any other failure is returned as an
    /// error rather than guessed at.
    pub async fn exists(&self, ctx: &OperationContext, name: &str) -> EngineResult<bool> {
        let span = info_span!("replica_set.exists", op_id = %ctx.id(), replica_set = name);
        self.inner
            .retry
            .run(ctx, "exists", |_| async move {
                match self.config(ctx).await {
                    Ok(live) => Ok(live.name == name),
                    Err(EngineError::NotYetInitiated) => {
                        debug!("Replica set not initiated");
                        Ok(false)
                    }
                    Err(err) => Err(err),
                }
            })
            .instrument(span)
            .await
    }

    /// Adopt the running set named `name` as a desired-state baseline.
    ///
    /// The set must carry the expected name and be stable. The returned topology is normalized.
    pub async fn import_state(&self, ctx: &OperationContext, name: &str) -> EngineResult<Topology> {
        let span = info_span!("replica_set.import", op_id = %ctx.id(), replica_set = name);
        self.inner
            .retry
            .run(ctx, "import", |_| async move {
                self.inner
                    .manager
                    .scoped(ctx, ConnectMode::SetAware, "import", |session| async move {
                        let live = session.get_config().await?;
                        if live.name != name {
                            return Err(EngineError::does_not_exist(ResourceKind::ReplicaSet, name));
                        }
                        session
                            .get_status()
                            .await?
                            .stability(name)
                            .map_err(|detail| EngineError::not_ready(name, detail))?;

                        let imported = normalize(&live);
                        info!(members = imported.members.len(), "Imported replica set");
                        Ok(imported)
                    })
                    .await
            })
            .instrument(span)
            .await
    }

    /// Block until the set named `name` is stable or `ctx` stops.
    pub async fn ready(&self, ctx: &OperationContext, name: &str) -> EngineResult<ClusterStatus> {
        let span = info_span!("replica_set.ready", op_id = %ctx.id(), replica_set = name);
        self.wait_stable(ctx, name, ConnectMode::SetAware)
            .instrument(span)
            .await
    }

    /// The running configuration with its version cleared, neither name-checked nor
    /// normalized.
    pub async fn read(&self, ctx: &OperationContext) -> EngineResult<Topology> {
        let span = info_span!("replica_set.read", op_id = %ctx.id());
        self.inner
            .retry
            .run(ctx, "read", |_| async move {
                self.config(ctx).await.map(|live| live.without_version())
            })
            .instrument(span)
            .await
    }

    /// The raw member status of the running set.
    pub async fn status(&self, ctx: &OperationContext) -> EngineResult<ClusterStatus> {
        let span = info_span!("replica_set.status", op_id = %ctx.id());
        self.inner
            .retry
            .run(ctx, "status", |_| async move {
                self.inner
                    .manager
                    .scoped(ctx, ConnectMode::SetAware, "replSetGetStatus", |session| async move {
                        session.get_status().await
                    })
                    .await
            })
            .instrument(span)
            .await
    }

    /// Classify the lifecycle state of `name` over a direct link.
    pub async fn observe(&self, ctx: &OperationContext, name: &str) -> EngineResult<ReplicaSetState> {
        let span = info_span!("replica_set.observe", op_id = %ctx.id(), replica_set = name);
        self.inner
            .retry
            .run(ctx, "observe", |_| async move {
                let observed = self
                    .inner
                    .manager
                    .scoped(ctx, ConnectMode::Direct, "replSetGetStatus", |session| async move {
                        session.get_status().await
                    })
                    .await;
                match observed {
                    Ok(status) => Ok(status.state(name)),
                    Err(EngineError::NotYetInitiated) => Ok(ReplicaSetState::Absent),
                    Err(err) => Err(err),
                }
            })
            .instrument(span)
            .await
    }

    async fn initiate(&self, ctx: &OperationContext, desired: &Topology) -> EngineResult<()> {
        self.inner
            .manager
            .scoped(ctx, ConnectMode::Direct, "replSetInitiate", |session| async move {
                info!(state = %ReplicaSetState::Initiating, "Initiating replica set");
                match session.initiate(&desired.without_version()).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.server_code() == Some(CODE_ALREADY_INITIALIZED) => {
                        let live = session.get_config().await?;
                        if live.name == desired.name {
                            info!("Replica set already initiated, adopting it");
                            Ok(())
                        } else {
                            Err(EngineError::already_exists(ResourceKind::ReplicaSet, live.name))
                        }
                    }
                    Err(err) => Err(err),
                }
            })
            .await
    }

    async fn config(&self, ctx: &OperationContext) -> EngineResult<Topology> {
        self.inner
            .manager
            .scoped(ctx, ConnectMode::SetAware, "replSetGetConfig", |session| async move {
                session.get_config().await
            })
            .await
    }

    /// Check stability up to the configured number of observations.
    async fn readiness_gate(&self, session: &Session, name: &str) -> EngineResult<()> {
        let observations = self.inner.readiness_gate_observations.max(1);
        let mut detail = String::new();

        for observation in 1..=observations {
            if observation > 1 {
                tokio::time::sleep(self.inner.poller.interval()).await;
            }
            match session.get_status().await?.stability(name) {
                Ok(()) => return Ok(()),
                Err(observed) => {
                    debug!(observation, observations, "Readiness gate: {observed}");
                    detail = observed;
                }
            }
        }
        Err(EngineError::not_ready(name, detail))
    }

    async fn wait_stable(
        &self,
        ctx: &OperationContext,
        name: &str,
        mode: ConnectMode,
    ) -> EngineResult<ClusterStatus> {
        let poll_ctx = ctx.child();
        let manager = &self.inner.manager;
        self.inner
            .poller
            .wait(&poll_ctx, name, || {
                manager.scoped(&poll_ctx, mode, "replSetGetStatus", |session| async move {
                    session.get_status().await
                })
            })
            .await
    }
}
