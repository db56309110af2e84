//! # meshpilot
//!
//! Service-mesh control plane core: keeps a live view of pods and nodes,
//! compiles per-proxy cluster configuration from services and destination
//! rules, and pushes it to proxies over ADS with ACK/NACK flow control.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use meshpilot::prelude::*;
//!
//! let server = PilotServer::builder().build()?;
//!
//! server.topology().handle(TopologyEvent::Node(
//!     NodeEvent::new(EventKind::Added, "n1")
//!         .with_label("topology.kubernetes.io/region", "us-east")
//!         .with_label("topology.kubernetes.io/zone", "1a"),
//! ))?;
//! server.registry().upsert_service(
//!     Service::new("reviews.default.svc.cluster.local", "default")
//!         .with_selector("app", "reviews")
//!         .with_port(Port::new("http", 9080, Protocol::Http)),
//! );
//!
//! server.serve("[::]:15010".parse()?).await?;
//! ```
//!
//! ## Architecture
//!
//! - `pilot-core` - type URLs, versions, resource encoding, errors
//! - `pilot-types` - discovery protocol messages
//! - `pilot-topology` - pod and node cache with change notifications
//! - `pilot-compiler` - services and destination rules to clusters
//! - `pilot-server` - push sessions, session registry, ADS server
//!
//! This crate re-exports all of them.
//!
//! ## Design Principles
//!
//! 1. **No panics in library code** - errors are returned as `Result`
//! 2. **No locks held across await points** - stream state is task-owned
//! 3. **One outstanding push per proxy and type**

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use pilot_compiler as compiler;
pub use pilot_core as core;
pub use pilot_server as server;
pub use pilot_topology as topology;
pub use pilot_types as types;

/// Common imports.
///
/// ```rust,ignore
/// use meshpilot::prelude::*;
/// ```
pub mod prelude {
    pub use pilot_core::{
        EncodedResources, PilotError, PilotResult, ResourceKind, ResourceVersion, TypeUrl,
    };

    pub use pilot_topology::{
        EventKind, NodeEvent, PodEvent, PodInfo, PodListener, PodName, PodRecord, TopologyCache,
        TopologyEvent,
    };

    pub use pilot_compiler::{
        ClusterBuilder, ClusterDefinition, ClusterMode, CompileInput, Compiled, DestinationRule,
        Endpoint, InMemoryPolicySource, MeshConfig, PolicySource, Port, Protocol, Resolution,
        Service, ServiceCatalog, Subset,
    };

    pub use pilot_server::{
        AdsService, ConfigGenerator, ConnectionDump, MeshGenerator, PilotServer,
        PilotServerBuilder, PushSession, ServerConfig, SessionRegistry,
    };
}

/// Version information.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Minimum supported Rust version.
    pub const MSRV: &str = "1.75";

    /// Version string for logs.
    pub fn version_string() -> String {
        format!("meshpilot {VERSION} (MSRV {MSRV})")
    }
}
