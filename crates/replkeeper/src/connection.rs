//! Connection manager
//!
//! Opens links to the cluster in one of two [`ConnectMode`]s, probes them, and guarantees that
//! every link is released again. Engine operations go through [`ConnectionManager::scoped`],
//! which acquires a link, resolves the protocol adapter, runs the operation body and releases the
//! link on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use replkeeper_driver::{ClusterDriver, ConnectMode, DriverError, DriverFactory, Endpoint};
use tracing::{debug, warn};

use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};
use crate::protocol::ProtocolAdapter;
use crate::types::{ClusterStatus, Topology, User};
use crate::version::{VersionDispatcher, VersionRegistry};

/// Budget for establishing and probing a link
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for an explicit disconnect
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

const SET_AWARE_WITHOUT_NAME: &str =
    "direct connection cannot be used against a replica-set-aware operation";

/// Opens and releases cluster links for one logical client.
#[derive(Debug)]
pub struct ConnectionManager {
    endpoint: Endpoint,
    factory: Arc<dyn DriverFactory>,
    connect_timeout: Duration,
    dispatcher: VersionDispatcher,
}

impl ConnectionManager {
    /// A manager for `endpoint`, selecting adapters from `registry`
    pub fn new(
        endpoint: Endpoint,
        factory: Arc<dyn DriverFactory>,
        registry: Arc<VersionRegistry>,
    ) -> Self {
        Self {
            endpoint,
            factory,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dispatcher: VersionDispatcher::new(registry),
        }
    }

    /// Bound link establishment plus liveness probe. Zero keeps the default.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.connect_timeout = timeout;
        }
        self
    }

    /// The configured endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The connect budget
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// The version dispatcher shared by every link of this client
    pub fn dispatcher(&self) -> &VersionDispatcher {
        &self.dispatcher
    }

    /// [`ConnectMode::SetAware`] when the endpoint names a replica set, direct otherwise.
    pub fn preferred_mode(&self) -> ConnectMode {
        if self.endpoint.replica_set().is_some() {
            ConnectMode::SetAware
        } else {
            ConnectMode::Direct
        }
    }

    /// Open a link in `mode` and check that it answers.
    ///
    /// Set-aware links require the endpoint to name a replica set. Establishment and probe share
    /// the connect budget, bounded by `ctx`. A link that fails the probe is released before the
    /// error is returned.
    pub async fn open(&self, ctx: &OperationContext, mode: ConnectMode) -> EngineResult<ClusterHandle> {
        if mode == ConnectMode::SetAware && self.endpoint.replica_set().is_none() {
            return Err(EngineError::configuration(SET_AWARE_WITHOUT_NAME));
        }

        let connect_ctx = ctx.child_with_timeout(self.connect_timeout);
        let result = connect_ctx
            .run("connect", async {
                let driver = self
                    .factory
                    .open(&self.endpoint, mode)
                    .await
                    .map_err(|err| EngineError::from_driver("connect", err))?;
                let handle = ClusterHandle::new(Arc::from(driver), mode);

                let probe = handle.driver().ping().await;
                if let Err(err) = probe {
                    handle.release().await;
                    return Err(ping_failure(err));
                }
                Ok(handle)
            })
            .await;

        match result {
            Ok(handle) => {
                debug!(mode = %mode, endpoint = %self.endpoint, "Opened cluster link");
                Ok(handle)
            }
            // the connect budget ran out while the operation itself still has time
            Err(EngineError::Timeout { after, .. }) if !ctx.is_expired() && !ctx.is_cancelled() => {
                Err(EngineError::connection(format!(
                    "no answer from {} within {after:?}",
                    self.endpoint
                )))
            }
            Err(err) => Err(err),
        }
    }

    /// Run `body` against a freshly opened, version-checked link and release it afterwards.
    ///
    /// The body is raced against `ctx`. Release happens on success, on error and on
    /// interruption; if the returned future itself is dropped the link is released in the
    /// background.
    pub async fn scoped<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        mode: ConnectMode,
        operation: &str,
        body: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let handle = self.open(ctx, mode).await?;

        let result = async {
            let adapter = ctx
                .run(operation, self.dispatcher.resolve(handle.driver()))
                .await?;
            let session = Session {
                driver: handle.shared(),
                adapter,
                mode,
            };
            ctx.run(operation, body(session)).await
        }
        .await;

        handle.release().await;
        result
    }
}

fn ping_failure(err: DriverError) -> EngineError {
    match err {
        DriverError::AuthenticationFailed(_) => EngineError::from_driver("ping", err),
        other => EngineError::connection(format!("ping failed: {other}")),
    }
}

/// An open link. Release it with [`ClusterHandle::release`].
///
/// A handle dropped without release schedules the disconnect on the current runtime.
#[derive(Debug)]
pub struct ClusterHandle {
    driver: Arc<dyn ClusterDriver>,
    mode: ConnectMode,
    released: bool,
}

impl ClusterHandle {
    fn new(driver: Arc<dyn ClusterDriver>, mode: ConnectMode) -> Self {
        Self {
            driver,
            mode,
            released: false,
        }
    }

    /// The mode this link was opened in
    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    /// The underlying driver
    pub fn driver(&self) -> &dyn ClusterDriver {
        self.driver.as_ref()
    }

    /// A shared reference to the driver, valid until the handle is released
    pub fn shared(&self) -> Arc<dyn ClusterDriver> {
        Arc::clone(&self.driver)
    }

    /// Disconnect and wait for the driver to confirm. Failures are logged, not returned.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::time::timeout(RELEASE_TIMEOUT, self.driver.disconnect()).await {
            Ok(Ok(())) => debug!(mode = %self.mode, "Released cluster link"),
            Ok(Err(err)) => warn!(mode = %self.mode, error = %err, "Disconnect failed"),
            Err(_) => warn!(mode = %self.mode, "Disconnect timed out"),
        }
    }
}

impl Drop for ClusterHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let driver = Arc::clone(&self.driver);
        let mode = self.mode;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = driver.disconnect().await {
                        warn!(mode = %mode, error = %err, "Background disconnect failed");
                    }
                });
            }
            Err(_) => warn!(mode = %mode, "Cluster link dropped outside a runtime"),
        }
    }
}

/// A version-checked link handed to operation bodies.
///
/// Every method forwards to the resolved [`ProtocolAdapter`].
#[derive(Debug, Clone)]
pub struct Session {
    driver: Arc<dyn ClusterDriver>,
    adapter: ProtocolAdapter,
    mode: ConnectMode,
}

impl Session {
    /// The adapter selected for this cluster
    pub fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    /// The mode the link was opened in
    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    /// See [`ProtocolAdapter::initiate`]
    pub async fn initiate(&self, topology: &Topology) -> EngineResult<()> {
        self.adapter.initiate(self.driver.as_ref(), topology).await
    }

    /// See [`ProtocolAdapter::reconfigure`]
    pub async fn reconfigure(&self, topology: &Topology) -> EngineResult<()> {
        self.adapter.reconfigure(self.driver.as_ref(), topology).await
    }

    /// See [`ProtocolAdapter::get_config`]
    pub async fn get_config(&self) -> EngineResult<Topology> {
        self.adapter.get_config(self.driver.as_ref()).await
    }

    /// See [`ProtocolAdapter::get_status`]
    pub async fn get_status(&self) -> EngineResult<ClusterStatus> {
        self.adapter.get_status(self.driver.as_ref()).await
    }

    /// See [`ProtocolAdapter::list_database_names`]
    pub async fn list_database_names(&self, name: Option<&str>) -> EngineResult<Vec<String>> {
        self.adapter
            .list_database_names(self.driver.as_ref(), name)
            .await
    }

    /// See [`ProtocolAdapter::create_database`]
    pub async fn create_database(&self, name: &str) -> EngineResult<()> {
        self.adapter.create_database(self.driver.as_ref(), name).await
    }

    /// See [`ProtocolAdapter::drop_database`]
    pub async fn drop_database(&self, name: &str) -> EngineResult<()> {
        self.adapter.drop_database(self.driver.as_ref(), name).await
    }

    /// See [`ProtocolAdapter::users_info`]
    pub async fn users_info(&self) -> EngineResult<Vec<User>> {
        self.adapter.users_info(self.driver.as_ref()).await
    }

    /// See [`ProtocolAdapter::create_user`]
    pub async fn create_user(&self, user: &User) -> EngineResult<()> {
        self.adapter.create_user(self.driver.as_ref(), user).await
    }

    /// See [`ProtocolAdapter::update_user`]
    pub async fn update_user(&self, user: &User) -> EngineResult<()> {
        self.adapter.update_user(self.driver.as_ref(), user).await
    }

    /// See [`ProtocolAdapter::drop_user`]
    pub async fn drop_user(&self, username: &str) -> EngineResult<()> {
        self.adapter.drop_user(self.driver.as_ref(), username).await
    }
}
