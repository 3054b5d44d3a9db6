//! Version dispatcher
//!
//! Probes the server build once per logical client and selects the matching
//! [`ProtocolAdapter`]. A version without a registered adapter is a permanent failure.

use std::sync::Arc;

use replkeeper_driver::ClusterDriver;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::protocol::{self, ProtocolAdapter, ServerLine};

/// Major version this build supports
pub const REQUIRED_VERSION: &str = "6";

/// Version prefixes mapped to server lines.
#[derive(Debug, Clone, Default)]
pub struct VersionRegistry {
    entries: Vec<(String, ServerLine)>,
}

impl VersionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every line this build ships an adapter for
    pub fn builtin() -> Self {
        Self::new().register(format!("{REQUIRED_VERSION}."), ServerLine::V6)
    }

    /// Map versions starting with `prefix` to `line`.
    #[must_use]
    pub fn register(mut self, prefix: impl Into<String>, line: ServerLine) -> Self {
        let prefix = prefix.into();
        self.entries.retain(|(p, _)| *p != prefix);
        self.entries.push((prefix, line));
        self
    }

    /// Select the line whose prefix is the longest match for `version`.
    pub fn select(&self, version: &str) -> Option<ServerLine> {
        self.entries
            .iter()
            .filter(|(prefix, _)| version.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, line)| *line)
    }

    /// Human-readable list of supported versions, e.g. `6`
    pub fn required(&self) -> String {
        let mut prefixes: Vec<&str> = self
            .entries
            .iter()
            .map(|(prefix, _)| prefix.trim_end_matches('.'))
            .collect();
        prefixes.sort_unstable();
        prefixes.join(", ")
    }

    /// Resolve `version` to an adapter.
    pub fn adapter_for(&self, version: &str) -> EngineResult<ProtocolAdapter> {
        self.select(version)
            .map(ProtocolAdapter::for_line)
            .ok_or_else(|| EngineError::UnsupportedVersion {
                observed: version.to_string(),
                required: self.required(),
            })
    }
}

/// Resolves and caches the adapter of one logical client.
#[derive(Debug)]
pub struct VersionDispatcher {
    registry: Arc<VersionRegistry>,
    resolved: OnceCell<ProtocolAdapter>,
}

impl VersionDispatcher {
    /// A dispatcher selecting from `registry`
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        Self {
            registry,
            resolved: OnceCell::new(),
        }
    }

    /// Return the cached adapter, probing the server on first use.
    ///
    /// Failed probes are not cached; the next call probes again.
    pub async fn resolve(&self, driver: &dyn ClusterDriver) -> EngineResult<ProtocolAdapter> {
        let adapter = self
            .resolved
            .get_or_try_init(|| async {
                let version = protocol::server_version(driver).await?;
                debug!(version = %version, "Probed server version");
                let adapter = self.registry.adapter_for(&version)?;
                info!(version = %version, line = %adapter.line(), "Selected protocol adapter");
                Ok::<_, EngineError>(adapter)
            })
            .await?;
        Ok(adapter.clone())
    }

    /// The adapter, if already resolved
    pub fn cached(&self) -> Option<&ProtocolAdapter> {
        self.resolved.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_requires_six() {
        let registry = VersionRegistry::builtin();
        assert_eq!(registry.select("6.0.14"), Some(ServerLine::V6));
        assert_eq!(registry.select("5.0.3"), None);
        assert_eq!(registry.select("60.1"), None);
        assert_eq!(registry.required(), "6");
    }

    #[test]
    fn test_unsupported_version_error() {
        match VersionRegistry::builtin().adapter_for("5.0.3") {
            Err(EngineError::UnsupportedVersion { observed, required }) => {
                assert_eq!(observed, "5.0.3");
                assert_eq!(required, "6");
            }
            other => panic!("expected unsupported version, got {other:?}"),
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = VersionRegistry::new()
            .register("6.", ServerLine::V6)
            .register("6.0.", ServerLine::V6);
        assert_eq!(registry.select("6.0.1"), Some(ServerLine::V6));
        assert_eq!(registry.required(), "6, 6.0");
    }
}
