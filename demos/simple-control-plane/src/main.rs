//! Simple meshpilot control plane.
//!
//! Seeds a small mesh (two nodes, a `reviews` service with v1/v2 pods and a
//! destination rule splitting them) and serves ADS on port 18000. A
//! background task rolls a canary pod in and out so connected proxies see
//! endpoint pushes.
//!
//! Run with:
//! ```bash
//! cargo run -p simple-control-plane
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use meshpilot::compiler::{SimpleLb, TrafficPolicy};
use meshpilot::prelude::*;
use meshpilot::topology::{LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_ZONE};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const REVIEWS: &str = "reviews.default.svc.cluster.local";

/// Configuration for the demo server.
struct Config {
    /// Address to listen on.
    listen_addr: String,
    /// How often the canary pod flips.
    canary_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "[::]:18000".to_string(),
            canary_interval: Duration::from_secs(30),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", meshpilot::version::version_string());

    let config = Config::default();
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;

    let policies = Arc::new(InMemoryPolicySource::new());
    policies.insert(
        DestinationRule::new(REVIEWS, "reviews", "default")
            .with_policy(TrafficPolicy::default().with_load_balancer(SimpleLb::LeastRequest))
            .with_subset(Subset::new("v1").with_label("version", "v1"))
            .with_subset(Subset::new("v2").with_label("version", "v2")),
    )?;

    let server = PilotServer::builder()
        .policy_source(policies)
        .control_plane_id("simple-control-plane")
        .build()?;

    seed(&server)?;
    info!(
        pods = server.topology().len(),
        services = server.catalog().len(),
        "mesh seeded"
    );

    let topology = Arc::clone(server.topology());
    let interval = config.canary_interval;
    let canary_ip: IpAddr = "10.0.1.9".parse()?;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let mut present = false;
        loop {
            ticker.tick().await;
            let kind = if present { EventKind::Deleted } else { EventKind::Added };
            let event = pod("reviews-canary", canary_ip, "node-b", "v2");
            match topology.handle(TopologyEvent::Pod(PodEvent::new(kind, event))) {
                Ok(()) => {
                    present = !present;
                    info!(present, "canary flipped");
                }
                Err(e) => tracing::warn!(error = %e, "canary event rejected"),
            }
        }
    });

    let registry = server.registry().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            info!(proxies = registry.len(), "connected proxies");
        }
    });

    info!("press Ctrl+C to shut down");
    server.serve(addr).await?;
    Ok(())
}

fn pod(name: &str, ip: IpAddr, node: &str, version: &str) -> PodInfo {
    PodInfo::running(PodName::new("default", name), ip, node)
        .with_label("app", "reviews")
        .with_label("version", version)
}

/// Two nodes in different zones, two pods and the `reviews` service.
fn seed(server: &PilotServer) -> anyhow::Result<()> {
    let topology = server.topology();
    for (node, zone) in [("node-a", "1a"), ("node-b", "1b")] {
        topology.handle(TopologyEvent::Node(
            NodeEvent::new(EventKind::Added, node)
                .with_label(LABEL_TOPOLOGY_REGION, "us-east")
                .with_label(LABEL_TOPOLOGY_ZONE, zone),
        ))?;
    }
    for (name, ip, node, version) in [
        ("reviews-v1", "10.0.1.1", "node-a", "v1"),
        ("reviews-v2", "10.0.1.2", "node-b", "v2"),
    ] {
        let ip: IpAddr = ip.parse()?;
        topology.handle(TopologyEvent::Pod(PodEvent::new(
            EventKind::Added,
            pod(name, ip, node, version),
        )))?;
    }

    server.registry().upsert_service(
        Service::new(REVIEWS, "default")
            .with_selector("app", "reviews")
            .with_port(Port::new("http", 9080, Protocol::Http)),
    );
    Ok(())
}
