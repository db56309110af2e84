//! Services and endpoints as the compiler sees them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::DiscoveryType;

/// How the proxy finds the instances of a service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// The proxy balances over endpoints delivered by EDS.
    ClientSideLb,
    /// Endpoints are DNS names resolved by the proxy.
    Dns,
    /// Traffic goes to the original destination address.
    Passthrough,
    /// Endpoints are fixed addresses inlined in the cluster.
    Static,
}

impl Resolution {
    /// Cluster discovery type for this resolution.
    #[must_use]
    pub fn discovery_type(self) -> DiscoveryType {
        match self {
            Self::ClientSideLb => DiscoveryType::Eds,
            Self::Dns => DiscoveryType::StrictDns,
            Self::Passthrough => DiscoveryType::OriginalDst,
            Self::Static => DiscoveryType::Static,
        }
    }
}

/// Application protocol of a port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// HTTP/1.1.
    Http,
    /// HTTP/2.
    Http2,
    /// gRPC.
    Grpc,
    /// Opaque TCP.
    #[default]
    Tcp,
    /// TLS passthrough.
    Tls,
}

impl Protocol {
    /// Whether upstream connections should speak HTTP/2.
    #[must_use]
    pub fn is_http2(self) -> bool {
        matches!(self, Self::Http2 | Self::Grpc)
    }
}

/// A service port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    /// Port name, e.g. `http-web`.
    pub name: String,
    /// Port number clients connect to.
    pub number: u16,
    /// Port on the workload, if different.
    #[serde(default)]
    pub target_port: Option<u16>,
    /// Application protocol.
    #[serde(default)]
    pub protocol: Protocol,
}

impl Port {
    /// Create a port.
    pub fn new(name: impl Into<String>, number: u16, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            number,
            target_port: None,
            protocol,
        }
    }

    /// Port on the workload.
    #[inline]
    #[must_use]
    pub fn endpoint_port(&self) -> u16 {
        self.target_port.unwrap_or(self.number)
    }
}

/// Namespaces a service is visible from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportScope {
    /// Every namespace.
    #[default]
    Public,
    /// Only the service's own namespace.
    Private,
}

/// A mesh service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Fully qualified hostname, e.g. `reviews.default.svc.cluster.local`.
    pub hostname: String,
    /// Namespace the service lives in.
    pub namespace: String,
    /// Ports.
    pub ports: Vec<Port>,
    /// Endpoint resolution.
    pub resolution: Resolution,
    /// Pod selector; empty for services without workloads in the mesh.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Declared endpoints for `Static` and `Dns` services.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Whether the service lives outside the mesh.
    #[serde(default)]
    pub mesh_external: bool,
    /// Visibility.
    #[serde(default)]
    pub export_to: ExportScope,
}

impl Service {
    /// A service resolved through EDS.
    pub fn new(hostname: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            namespace: namespace.into(),
            ports: Vec::new(),
            resolution: Resolution::ClientSideLb,
            selector: BTreeMap::new(),
            endpoints: Vec::new(),
            mesh_external: false,
            export_to: ExportScope::Public,
        }
    }

    /// Add a port.
    #[must_use]
    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    /// Set the resolution.
    #[must_use]
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Add a selector entry.
    #[must_use]
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector.insert(key.into(), value.into());
        self
    }

    /// Add a declared endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Set visibility.
    #[must_use]
    pub fn with_export(mut self, scope: ExportScope) -> Self {
        self.export_to = scope;
        self
    }

    /// Port with the given number.
    #[must_use]
    pub fn port(&self, number: u16) -> Option<&Port> {
        self.ports.iter().find(|p| p.number == number)
    }

    /// Whether a proxy in `namespace` may see this service.
    #[must_use]
    pub fn is_visible_from(&self, namespace: &str) -> bool {
        match self.export_to {
            ExportScope::Public => true,
            ExportScope::Private => self.namespace == namespace,
        }
    }

    /// Whether the service's selector picks a workload with these labels.
    #[must_use]
    pub fn selects(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        self.namespace == namespace
            && !self.selector.is_empty()
            && labels_match(labels, &self.selector)
    }

    /// First dotted label of the hostname.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.hostname.split('.').next().unwrap_or(&self.hostname)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostname)
    }
}

/// One instance of a service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// IP address or, for DNS services, a hostname.
    pub address: String,
    /// Port on the instance.
    pub port: u16,
    /// Workload labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// `region/zone` or empty.
    #[serde(default)]
    pub locality: String,
    /// Load balancing weight, at least 1.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Endpoint {
    /// An endpoint with weight 1 and no labels.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            labels: BTreeMap::new(),
            locality: String::new(),
            weight: 1,
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the locality.
    #[must_use]
    pub fn with_locality(mut self, locality: impl Into<String>) -> Self {
        self.locality = locality.into();
        self
    }

    /// Set the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }
}

/// `true` when `labels` contains every `selector` entry.
#[must_use]
pub fn labels_match(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
}
