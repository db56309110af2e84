//! # pilot-compiler
//!
//! Turns services, endpoints and destination rules into proxy cluster
//! definitions.
//!
//! - [`ClusterBuilder`] - compiles one service port into its clusters
//! - [`ClusterDefinition`] - a cluster as pushed over CDS
//! - [`EndpointAssignment`] - locality-grouped endpoints, pushed over EDS
//! - [`PolicySource`] / [`ServiceCatalog`] - inputs to the compiler
//!
//! ## Key Design Decisions
//!
//! - Compiling is deterministic: equal inputs give byte-identical encodings
//! - The most specific traffic policy replaces the less specific one whole
//! - Clusters that cannot be built are reported as [`Diagnostic`]s and the
//!   rest of the batch is still produced
//!
//! ## Example
//!
//! ```rust
//! use pilot_compiler::{ClusterBuilder, ClusterMode, CompileInput, MeshConfig, Port, Protocol,
//!     Resolution, Service};
//!
//! let svc = Service::new("db.example.com", "default")
//!     .with_resolution(Resolution::Static)
//!     .with_port(Port::new("tcp", 5432, Protocol::Tcp));
//!
//! let builder = ClusterBuilder::new(MeshConfig::default());
//! let compiled = builder.compile(&CompileInput {
//!     service: &svc,
//!     port: &svc.ports[0],
//!     destination_rule: None,
//!     endpoints: &[],
//!     mode: ClusterMode::Default,
//! });
//! assert!(compiled.clusters.is_empty());
//! assert_eq!(compiled.diagnostics.len(), 1);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod assignment;
mod builder;
mod cluster;
mod diagnostics;
mod mesh;
mod model;
mod naming;
mod policy;
mod source;

pub use assignment::{build_endpoint_assignment, EndpointAssignment, LbEndpoint, LocalityEndpoints};
pub use builder::{ClusterBuilder, CompileInput, Compiled, IpFamilies};
pub use cluster::{
    CircuitBreakers, ClusterDefinition, ClusterMetadata, DiscoveryType, DnsLookupFamily,
    DnsSettings, EdsConfig, LbPolicy, UpstreamTls,
};
pub use diagnostics::{CompileStats, Diagnostic, DiagnosticKind};
pub use mesh::MeshConfig;
pub use model::{labels_match, Endpoint, ExportScope, Port, Protocol, Resolution, Service};
pub use naming::{
    build_stat_prefix, dns_srv_subset_key, parse_subset_key, subset_key, ClusterMode, SubsetKey,
    TrafficDirection, BLACKHOLE_CLUSTER, INBOUND_PASSTHROUGH_BIND_IPV4,
    INBOUND_PASSTHROUGH_BIND_IPV6, INBOUND_PASSTHROUGH_CLUSTER_IPV4,
    INBOUND_PASSTHROUGH_CLUSTER_IPV6, PASSTHROUGH_CLUSTER,
};
pub use policy::{
    resolve_policy, ConnectionPoolSettings, DestinationRule, OutlierDetection, SimpleLb, Subset,
    TlsMode, TlsSettings, TrafficPolicy,
};
pub use source::{InMemoryPolicySource, PolicyError, PolicySource, ServiceCatalog};
