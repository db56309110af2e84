//! Compiled cluster definitions.
//!
//! A [`ClusterDefinition`] is produced fresh by every compile and never
//! mutated after it has been handed out. It encodes as JSON inside a
//! `google.protobuf.Any` tagged with the cluster type URL; all maps are ordered
//! so identical input always yields identical bytes.

use std::net::IpAddr;
use std::time::Duration;

use pilot_core::{PilotError, Resource, TypeUrl};
use serde::{Deserialize, Serialize};

use crate::assignment::EndpointAssignment;
use crate::policy::{OutlierDetection, TlsMode, TrafficPolicy};

/// How the proxy discovers cluster members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryType {
    /// Fixed endpoints inlined in the cluster.
    Static,
    /// Endpoints are hostnames the proxy resolves.
    StrictDns,
    /// Endpoints delivered separately over ADS.
    Eds,
    /// Original destination of the connection.
    OriginalDst,
}

impl DiscoveryType {
    /// Envoy enum name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "STATIC",
            Self::StrictDns => "STRICT_DNS",
            Self::Eds => "EDS",
            Self::OriginalDst => "ORIGINAL_DST",
        }
    }

    /// Whether endpoints are inlined and therefore required.
    #[must_use]
    pub fn requires_inline_endpoints(self) -> bool {
        matches!(self, Self::Static | Self::StrictDns)
    }
}

/// Cluster load balancing policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LbPolicy {
    /// Round robin.
    RoundRobin,
    /// Least request.
    LeastRequest,
    /// Random.
    Random,
    /// Chosen by the discovery type, used with `ORIGINAL_DST`.
    ClusterProvided,
}

/// Where EDS clusters fetch their endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdsConfig {
    /// Name to request endpoints under; the cluster name.
    pub service_name: String,
    /// Always fetched over the aggregated stream.
    pub ads: bool,
    /// How long the proxy waits for the first assignment.
    pub initial_fetch_timeout: Duration,
}

/// DNS lookup family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsLookupFamily {
    /// IPv4 only.
    V4Only,
}

/// STRICT_DNS resolution settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSettings {
    /// Address family.
    pub lookup_family: DnsLookupFamily,
    /// Refresh rate.
    pub refresh_rate: Duration,
    /// Honour record TTLs.
    pub respect_dns_ttl: bool,
}

/// Connection limits rendered from connection pool settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakers {
    /// Maximum connections.
    pub max_connections: Option<u32>,
    /// Maximum pending requests.
    pub max_pending_requests: Option<u32>,
    /// Maximum requests.
    pub max_requests: Option<u32>,
    /// Maximum retries.
    pub max_retries: Option<u32>,
}

/// Upstream TLS as rendered on a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTls {
    /// Mode; never `Disable`.
    pub mode: TlsMode,
    /// SNI sent upstream.
    pub sni: Option<String>,
    /// Subject alt names to verify.
    pub subject_alt_names: Vec<String>,
}

/// Provenance tags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    /// Path of the destination rule the cluster was built from.
    pub config: Option<String>,
    /// Subset name for subset clusters.
    pub subset: Option<String>,
}

impl ClusterMetadata {
    /// Whether no tags are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.config.is_none() && self.subset.is_none()
    }
}

/// A cluster ready to be pushed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDefinition {
    /// Cluster name.
    pub name: String,
    /// Discovery type.
    pub discovery_type: DiscoveryType,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Load balancing policy.
    pub lb_policy: LbPolicy,
    /// Inline endpoints for STATIC and STRICT_DNS clusters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_assignment: Option<EndpointAssignment>,
    /// EDS source for EDS clusters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eds_config: Option<EdsConfig>,
    /// DNS settings for STRICT_DNS clusters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSettings>,
    /// Connection limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breakers: Option<CircuitBreakers>,
    /// Outlier detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,
    /// Upstream TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<UpstreamTls>,
    /// Speak HTTP/2 upstream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub http2: bool,
    /// Stat name override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_stat_name: Option<String>,
    /// Source address for upstream connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_bind_address: Option<IpAddr>,
    /// Policy the cluster was rendered from.
    pub traffic_policy: TrafficPolicy,
    /// Provenance.
    #[serde(default, skip_serializing_if = "ClusterMetadata::is_empty")]
    pub metadata: ClusterMetadata,
}

impl ClusterDefinition {
    /// A bare cluster; the builder fills in the rest.
    pub(crate) fn new(
        name: impl Into<String>,
        discovery_type: DiscoveryType,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            discovery_type,
            connect_timeout,
            lb_policy: LbPolicy::RoundRobin,
            load_assignment: None,
            eds_config: None,
            dns: None,
            circuit_breakers: None,
            outlier_detection: None,
            tls: None,
            http2: false,
            alt_stat_name: None,
            upstream_bind_address: None,
            traffic_policy: TrafficPolicy::default(),
            metadata: ClusterMetadata::default(),
        }
    }

    /// Number of inlined endpoints.
    #[must_use]
    pub fn inline_endpoint_count(&self) -> usize {
        self.load_assignment
            .as_ref()
            .map(EndpointAssignment::endpoint_count)
            .unwrap_or(0)
    }
}

impl Resource for ClusterDefinition {
    fn type_url(&self) -> &str {
        TypeUrl::CLUSTER
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self) -> Result<prost_types::Any, PilotError> {
        let value = serde_json::to_vec(self)
            .map_err(|e| PilotError::encoding(TypeUrl::CLUSTER, &self.name, e))?;
        Ok(prost_types::Any {
            type_url: TypeUrl::CLUSTER.to_string(),
            value,
        })
    }
}
