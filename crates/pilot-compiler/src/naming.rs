//! Deterministic cluster names.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Cluster catching unmatched outbound traffic.
pub const BLACKHOLE_CLUSTER: &str = "BlackHoleCluster";
/// Cluster forwarding to the original destination.
pub const PASSTHROUGH_CLUSTER: &str = "PassthroughCluster";
/// Inbound passthrough over IPv4.
pub const INBOUND_PASSTHROUGH_CLUSTER_IPV4: &str = "InboundPassthroughClusterIpv4";
/// Inbound passthrough over IPv6.
pub const INBOUND_PASSTHROUGH_CLUSTER_IPV6: &str = "InboundPassthroughClusterIpv6";
/// Source address of inbound passthrough connections over IPv4.
pub const INBOUND_PASSTHROUGH_BIND_IPV4: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 6));
/// Source address of inbound passthrough connections over IPv6.
pub const INBOUND_PASSTHROUGH_BIND_IPV6: IpAddr = IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 6));

/// Traffic direction encoded in cluster names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficDirection {
    /// Leaving the proxy.
    Outbound,
    /// Arriving at the proxy.
    Inbound,
}

impl TrafficDirection {
    /// Lower-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }
}

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Naming scheme for service clusters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterMode {
    /// `outbound|80|v1|host` names; SNI derived for mesh mTLS.
    #[default]
    Default,
    /// DNS SRV style names used by SNI-DNAT gateways.
    SniDnat,
}

impl ClusterMode {
    /// Name of the cluster for `subset` (empty for the default cluster).
    #[must_use]
    pub fn cluster_name(self, subset: &str, host: &str, port: u16) -> String {
        match self {
            Self::Default => subset_key(TrafficDirection::Outbound, subset, host, port),
            Self::SniDnat => dns_srv_subset_key(TrafficDirection::Outbound, subset, host, port),
        }
    }
}

/// `direction|port|subset|host`
///
/// ```rust
/// use pilot_compiler::{subset_key, TrafficDirection};
///
/// assert_eq!(subset_key(TrafficDirection::Outbound, "", "svc", 80), "outbound|80||svc");
/// assert_eq!(subset_key(TrafficDirection::Outbound, "v1", "svc", 80), "outbound|80|v1|svc");
/// ```
#[must_use]
pub fn subset_key(direction: TrafficDirection, subset: &str, host: &str, port: u16) -> String {
    format!("{direction}|{port}|{subset}|{host}")
}

/// `direction_.port_.subset_.host`, a valid DNS name usable as SNI.
#[must_use]
pub fn dns_srv_subset_key(
    direction: TrafficDirection,
    subset: &str,
    host: &str,
    port: u16,
) -> String {
    format!("{direction}_.{port}_.{subset}_.{host}")
}

/// Components of a parsed cluster name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubsetKey<'a> {
    /// Direction.
    pub direction: TrafficDirection,
    /// Port.
    pub port: u16,
    /// Subset, empty for the default cluster.
    pub subset: &'a str,
    /// Host.
    pub host: &'a str,
}

/// Parse either naming scheme back into its parts.
#[must_use]
pub fn parse_subset_key(name: &str) -> Option<SubsetKey<'_>> {
    let parts: Vec<&str> = if name.contains('|') {
        name.splitn(4, '|').collect()
    } else {
        name.splitn(4, "_.").collect()
    };
    let [direction, port, subset, host] = parts.as_slice() else {
        return None;
    };
    let direction = match *direction {
        "outbound" => TrafficDirection::Outbound,
        "inbound" => TrafficDirection::Inbound,
        _ => return None,
    };
    Some(SubsetKey {
        direction,
        port: port.parse().ok()?,
        subset,
        host,
    })
}

/// Expand an alt stat name pattern.
///
/// Recognised tokens: `%SERVICE%`, `%SERVICE_FQDN%`, `%SERVICE_NAMESPACE%`,
/// `%SERVICE_PORT%`, `%SERVICE_PORT_NAME%` and `%SUBSET_NAME%`.
#[must_use]
pub fn build_stat_prefix(
    pattern: &str,
    host: &str,
    namespace: &str,
    subset: &str,
    port: u16,
    port_name: &str,
) -> String {
    let short = host.split('.').next().unwrap_or(host);
    pattern
        .replace("%SERVICE_FQDN%", host)
        .replace("%SERVICE_NAMESPACE%", namespace)
        .replace("%SERVICE_PORT_NAME%", port_name)
        .replace("%SERVICE_PORT%", &port.to_string())
        .replace("%SUBSET_NAME%", subset)
        .replace("%SERVICE%", short)
}
