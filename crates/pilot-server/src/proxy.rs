//! Proxy identity parsed from the node of the first request.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use pilot_compiler::IpFamilies;
use pilot_core::{NodeHash, PilotError};
use pilot_types::Node;
use serde::Serialize;

/// Node metadata key carrying the proxy namespace.
pub const METADATA_NAMESPACE: &str = "NAMESPACE";
/// Node metadata key carrying comma-separated instance IPs.
pub const METADATA_INSTANCE_IPS: &str = "INSTANCE_IPS";

/// Role of a connected proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ProxyType {
    /// Sidecar next to an application workload.
    Sidecar,
    /// Standalone gateway.
    Router,
}

impl ProxyType {
    /// Id prefix for this proxy type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sidecar => "sidecar",
            Self::Router => "router",
        }
    }
}

impl FromStr for ProxyType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sidecar" => Ok(Self::Sidecar),
            "router" => Ok(Self::Router),
            _ => Err(()),
        }
    }
}

/// A connected proxy.
///
/// Node ids have the form `type~ip~id~domain`, e.g.
/// `sidecar~10.0.0.5~reviews-v1-abc.default~default.svc.cluster.local`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProxyInfo {
    /// Raw node id.
    pub node_id: String,
    /// Hash of the node id.
    #[serde(skip)]
    pub node_hash: NodeHash,
    /// Proxy role.
    pub proxy_type: ProxyType,
    /// Addresses of the proxy, first one from the node id unless metadata overrides.
    pub ip_addresses: Vec<IpAddr>,
    /// Workload id, `pod.namespace` for sidecars.
    pub id: String,
    /// DNS domain.
    pub dns_domain: String,
    /// Namespace used for visibility decisions.
    pub namespace: String,
}

impl ProxyInfo {
    /// Parse a node into proxy identity.
    ///
    /// ```rust
    /// use pilot_server::ProxyInfo;
    /// use pilot_types::Node;
    ///
    /// let node = Node {
    ///     id: "sidecar~10.0.0.5~reviews-v1.default~default.svc.cluster.local".into(),
    ///     ..Default::default()
    /// };
    /// let proxy = ProxyInfo::from_node(&node).unwrap();
    /// assert_eq!(proxy.namespace, "default");
    /// assert_eq!(proxy.ip_addresses[0].to_string(), "10.0.0.5");
    /// ```
    pub fn from_node(node: &Node) -> Result<Self, PilotError> {
        let invalid = |reason: &str| PilotError::InvalidNode {
            node_id: node.id.clone(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = node.id.split('~').collect();
        let [kind, ip, id, domain] = parts.as_slice() else {
            return Err(invalid("expected 4 parts separated by '~'"));
        };

        let proxy_type = kind
            .parse::<ProxyType>()
            .map_err(|()| invalid("unknown proxy type"))?;

        let ip_addresses = match node.metadata_string(METADATA_INSTANCE_IPS) {
            Some(ips) => ips
                .split(',')
                .map(|s| s.trim().parse::<IpAddr>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| invalid("invalid address in INSTANCE_IPS"))?,
            None => vec![ip.parse().map_err(|_| invalid("invalid ip address"))?],
        };
        if ip_addresses.is_empty() {
            return Err(invalid("no ip address"));
        }

        let namespace = match node.metadata_string(METADATA_NAMESPACE) {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => id.split_once('.').map(|(_, ns)| ns.to_string()).unwrap_or_default(),
        };

        Ok(Self {
            node_id: node.id.clone(),
            node_hash: NodeHash::from_id(&node.id),
            proxy_type,
            ip_addresses,
            id: id.to_string(),
            dns_domain: domain.to_string(),
            namespace,
        })
    }

    /// Whether `ip` belongs to this proxy.
    #[inline]
    pub fn has_ip(&self, ip: IpAddr) -> bool {
        self.ip_addresses.contains(&ip)
    }

    /// Address families the proxy has.
    #[inline]
    pub fn ip_families(&self) -> IpFamilies {
        IpFamilies::from_addrs(&self.ip_addresses)
    }
}

impl fmt::Display for ProxyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_id)
    }
}
