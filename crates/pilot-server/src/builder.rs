//! Builder for [`PilotServer`].

use std::sync::Arc;
use std::time::Duration;

use pilot_compiler::{ClusterBuilder, ClusterMode, InMemoryPolicySource, MeshConfig, PolicySource, ServiceCatalog};
use pilot_core::PilotResult;
use pilot_topology::TopologyCache;

use crate::config::ServerConfig;
use crate::generator::{ConfigGenerator, MeshGenerator};
use crate::metrics::PilotMetrics;
use crate::registry::SessionRegistry;
use crate::services::AdsService;
use crate::shutdown::ShutdownController;
use crate::PilotServer;

/// Builder for a [`PilotServer`].
///
/// Every input is optional; missing stores start empty.
///
/// ```rust,ignore
/// let server = PilotServerBuilder::new()
///     .topology(topology)
///     .policy_source(policies)
///     .compile_concurrency(8)
///     .build()?;
/// ```
#[derive(Default)]
pub struct PilotServerBuilder {
    topology: Option<Arc<TopologyCache>>,
    catalog: Option<Arc<ServiceCatalog>>,
    policies: Option<Arc<dyn PolicySource>>,
    generator: Option<Arc<dyn ConfigGenerator>>,
    config: ServerConfig,
}

impl PilotServerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Topology cache to read pods from.
    pub fn topology(mut self, topology: Arc<TopologyCache>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Service catalog.
    pub fn catalog(mut self, catalog: Arc<ServiceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Source of destination rules.
    pub fn policy_source(mut self, policies: Arc<dyn PolicySource>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Replace the resource generator.
    pub fn generator(mut self, generator: Arc<dyn ConfigGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Identifier stamped on responses.
    pub fn control_plane_id(mut self, id: impl Into<String>) -> Self {
        self.config.control_plane_id = id.into();
        self
    }

    /// Compilations allowed to run at once.
    pub fn compile_concurrency(mut self, permits: usize) -> Self {
        self.config.compile_concurrency = permits;
        self
    }

    /// Responses buffered per stream.
    pub fn response_buffer_size(mut self, size: usize) -> Self {
        self.config.response_buffer_size = size;
        self
    }

    /// Close streams idle for this long; `None` disables.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// How long shutdown waits for streams.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    /// Cluster naming scheme.
    pub fn cluster_mode(mut self, mode: ClusterMode) -> Self {
        self.config.cluster_mode = mode;
        self
    }

    /// Compiler defaults.
    pub fn mesh_config(mut self, mesh: MeshConfig) -> Self {
        self.config.mesh = mesh;
        self
    }

    /// Build the server.
    ///
    /// The session registry is subscribed to the topology cache here, so pod
    /// changes reach connected proxies from this point on.
    pub fn build(self) -> PilotResult<PilotServer> {
        self.config.validate()?;

        let topology = self.topology.unwrap_or_else(|| Arc::new(TopologyCache::new()));
        let catalog = self.catalog.unwrap_or_else(|| Arc::new(ServiceCatalog::new()));
        let policies: Arc<dyn PolicySource> = match self.policies {
            Some(policies) => policies,
            None => Arc::new(InMemoryPolicySource::new()),
        };

        let metrics = PilotMetrics::new();
        let registry = SessionRegistry::new(Arc::clone(&catalog), metrics.clone());
        topology.subscribe(Arc::new(registry.clone()));

        let generator: Arc<dyn ConfigGenerator> = match self.generator {
            Some(generator) => generator,
            None => Arc::new(
                MeshGenerator::new(
                    Arc::clone(&topology),
                    Arc::clone(&catalog),
                    Arc::clone(&policies),
                    ClusterBuilder::new(self.config.mesh.clone()),
                )
                .with_mode(self.config.cluster_mode),
            ),
        };

        let shutdown = ShutdownController::new();
        let ads = AdsService::new(
            registry.clone(),
            generator,
            Arc::new(self.config),
            metrics,
            shutdown.clone(),
        );

        Ok(PilotServer {
            topology,
            catalog,
            policies,
            registry,
            ads,
            shutdown,
        })
    }
}

impl std::fmt::Debug for PilotServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PilotServerBuilder")
            .field("topology", &self.topology.is_some())
            .field("catalog", &self.catalog.is_some())
            .field("policies", &self.policies.is_some())
            .field("generator", &self.generator.is_some())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::PilotError;

    #[test]
    fn defaults_build() {
        let server = PilotServerBuilder::new().build().unwrap();
        assert!(server.registry().is_empty());
        assert_eq!(server.config().control_plane_id, "meshpilot");
        assert_eq!(server.topology().listener_count(), 1);
    }

    #[test]
    fn invalid_config_rejected() {
        let err = PilotServerBuilder::new()
            .compile_concurrency(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PilotError::Configuration(_)));

        let err = PilotServerBuilder::new()
            .response_buffer_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PilotError::Configuration(_)));
    }

    #[test]
    fn settings_reach_config() {
        let server = PilotServerBuilder::new()
            .control_plane_id("pilot-a")
            .idle_timeout(None)
            .cluster_mode(ClusterMode::SniDnat)
            .build()
            .unwrap();
        assert_eq!(server.config().control_plane_id, "pilot-a");
        assert_eq!(server.config().idle_timeout, None);
        assert_eq!(server.config().cluster_mode, ClusterMode::SniDnat);
    }
}
