//! # pilot-server
//!
//! Aggregated discovery server of the meshpilot control plane.
//!
//! - [`PushSession`] - per-type push state machine of one connection
//! - [`SessionRegistry`] - connected proxies and change fan-out
//! - [`AdsService`] - drives one task per ADS stream
//! - [`MeshGenerator`] - compiles clusters and endpoint assignments per proxy
//! - [`PilotServer`] / [`PilotServerBuilder`] - wiring and the tonic server
//!
//! ## Example
//!
//! ```rust,ignore
//! use pilot_server::PilotServerBuilder;
//!
//! let server = PilotServerBuilder::new()
//!     .topology(topology)
//!     .catalog(catalog)
//!     .policy_source(policies)
//!     .build()?;
//!
//! // feed topology events into server.topology() from elsewhere
//! server.serve("[::]:15010".parse()?).await?;
//! ```
//!
//! ## Flow control
//!
//! Per connection and resource type at most one push is outstanding. A
//! change that arrives meanwhile is remembered and pushed once the proxy
//! acknowledges. Rejected pushes are not retried; the next change is.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
pub mod generator;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod services;
pub mod session;
pub mod shutdown;
mod stream;
mod utils;


pub use builder::PilotServerBuilder;
pub use config::ServerConfig;
pub use generator::{ConfigGenerator, MeshConfigOutput, MeshGenerator};
pub use metrics::{PilotMetrics, QueueOutcome};
pub use proxy::{ProxyInfo, ProxyType};
pub use registry::{ConnectionDump, ConnectionStatus, PushReason, PushRequest, Registration, SessionRegistry};
pub use services::{AdsService, AggregatedDiscoveryService, AggregatedDiscoveryServiceServer};
pub use session::{Decision, HoldReason, PushSession, Rejection, SessionState, SessionStatus};
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use stream::{StreamContext, StreamId};

use std::net::SocketAddr;
use std::sync::Arc;

use pilot_compiler::{PolicySource, ServiceCatalog};
use pilot_topology::TopologyCache;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tracing::{error, info};

/// The meshpilot discovery server.
pub struct PilotServer {
    topology: Arc<TopologyCache>,
    catalog: Arc<ServiceCatalog>,
    policies: Arc<dyn PolicySource>,
    registry: SessionRegistry,
    ads: AdsService,
    shutdown: ShutdownController,
}

impl PilotServer {
    /// Create a builder.
    pub fn builder() -> PilotServerBuilder {
        PilotServerBuilder::new()
    }

    /// Topology cache; feed pod and node events here.
    #[inline]
    pub fn topology(&self) -> &Arc<TopologyCache> {
        &self.topology
    }

    /// Service catalog. Change services through [`SessionRegistry::upsert_service`]
    /// so connected proxies are notified.
    #[inline]
    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    /// Policy source.
    #[inline]
    pub fn policies(&self) -> &Arc<dyn PolicySource> {
        &self.policies
    }

    /// Connected proxies.
    #[inline]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The ADS service.
    #[inline]
    pub fn ads(&self) -> &AdsService {
        &self.ads
    }

    /// Server configuration.
    #[inline]
    pub fn config(&self) -> &ServerConfig {
        self.ads.config()
    }

    /// Metrics handle.
    #[inline]
    pub fn metrics(&self) -> &PilotMetrics {
        self.ads.metrics()
    }

    /// Shutdown controller.
    #[inline]
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    fn router(&self) -> tonic::transport::server::Router {
        let config = self.config();
        let mut builder = Server::builder();

        if let Some(interval) = config.keepalive_interval {
            builder = builder.http2_keepalive_interval(Some(interval));
        }
        if let Some(timeout) = config.keepalive_timeout {
            builder = builder.http2_keepalive_timeout(Some(timeout));
        }
        if let Some(max_streams) = config.max_concurrent_streams {
            builder = builder.concurrency_limit_per_connection(max_streams as usize);
        }

        builder.add_service(self.ads.clone().into_server())
    }

    /// Serve on `addr` until SIGTERM or SIGINT, then drain streams for the
    /// grace period.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), tonic::transport::Error> {
        let router = self.router();
        let shutdown = self.shutdown.clone();
        let grace_period = self.config().grace_period;

        info!(%addr, "discovery server listening");
        router
            .serve_with_shutdown(addr, async move {
                if let Err(e) = shutdown::wait_for_signal().await {
                    error!(error = %e, "cannot listen for shutdown signals");
                    std::future::pending::<()>().await;
                }
                shutdown.shutdown(grace_period).await;
            })
            .await
    }

    /// Serve on `addr` until `shutdown_rx` fires or its sender is dropped.
    pub async fn serve_with_shutdown(
        self,
        addr: SocketAddr,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), tonic::transport::Error> {
        let router = self.router();
        let shutdown = self.shutdown.clone();
        let grace_period = self.config().grace_period;

        info!(%addr, "discovery server listening");
        router
            .serve_with_shutdown(addr, async move {
                let _ = shutdown_rx.await;
                shutdown.shutdown(grace_period).await;
            })
            .await
    }
}

impl std::fmt::Debug for PilotServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PilotServer")
            .field("topology", &self.topology)
            .field("services", &self.catalog.len())
            .field("ads", &self.ads)
            .finish_non_exhaustive()
    }
}
