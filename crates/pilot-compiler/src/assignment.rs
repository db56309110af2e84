//! Endpoint assignments, the EDS payload.

use std::collections::BTreeMap;

use pilot_core::{PilotError, Resource, TypeUrl};
use serde::{Deserialize, Serialize};

use crate::model::{labels_match, Endpoint};

/// A single endpoint in an assignment.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LbEndpoint {
    /// Address.
    pub address: String,
    /// Port.
    pub port: u16,
    /// Load balancing weight.
    pub weight: u32,
}

/// Endpoints sharing a locality.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityEndpoints {
    /// `region/zone` or empty.
    pub locality: String,
    /// Endpoints ordered by address and port.
    pub lb_endpoints: Vec<LbEndpoint>,
    /// Sum of endpoint weights.
    pub load_balancing_weight: u32,
}

/// Endpoints of one cluster, grouped by locality.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAssignment {
    /// Cluster the endpoints belong to.
    pub cluster_name: String,
    /// Locality groups ordered by locality.
    pub endpoints: Vec<LocalityEndpoints>,
}

impl EndpointAssignment {
    /// Total endpoints across localities.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.iter().map(|l| l.lb_endpoints.len()).sum()
    }

    /// Whether there are no endpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoint_count() == 0
    }
}

/// Group `endpoints` matching `subset_labels` by locality.
///
/// An empty label set keeps every endpoint. Output ordering depends only on
/// the endpoint values, never on input order.
///
/// ```rust
/// use std::collections::BTreeMap;
/// use pilot_compiler::{build_endpoint_assignment, Endpoint};
///
/// let endpoints = vec![
///     Endpoint::new("10.0.0.2", 80).with_locality("us-east/1a"),
///     Endpoint::new("10.0.0.1", 80).with_locality("us-east/1a"),
///     Endpoint::new("10.0.1.1", 80).with_locality("us-west/2b"),
/// ];
/// let la = build_endpoint_assignment("outbound|80||svc", &endpoints, &BTreeMap::new());
/// assert_eq!(la.endpoints.len(), 2);
/// assert_eq!(la.endpoints[0].lb_endpoints[0].address, "10.0.0.1");
/// ```
#[must_use]
pub fn build_endpoint_assignment(
    cluster_name: &str,
    endpoints: &[Endpoint],
    subset_labels: &BTreeMap<String, String>,
) -> EndpointAssignment {
    let mut by_locality: BTreeMap<&str, Vec<LbEndpoint>> = BTreeMap::new();
    for ep in endpoints
        .iter()
        .filter(|ep| labels_match(&ep.labels, subset_labels))
    {
        by_locality
            .entry(ep.locality.as_str())
            .or_default()
            .push(LbEndpoint {
                address: ep.address.clone(),
                port: ep.port,
                weight: ep.weight.max(1),
            });
    }

    let endpoints = by_locality
        .into_iter()
        .map(|(locality, mut lb_endpoints)| {
            lb_endpoints.sort();
            lb_endpoints.dedup();
            let load_balancing_weight = lb_endpoints
                .iter()
                .fold(0u32, |total, e| total.saturating_add(e.weight));
            LocalityEndpoints {
                locality: locality.to_string(),
                lb_endpoints,
                load_balancing_weight,
            }
        })
        .collect();

    EndpointAssignment {
        cluster_name: cluster_name.to_string(),
        endpoints,
    }
}

impl Resource for EndpointAssignment {
    fn type_url(&self) -> &str {
        TypeUrl::ENDPOINT
    }

    fn name(&self) -> &str {
        &self.cluster_name
    }

    fn encode(&self) -> Result<prost_types::Any, PilotError> {
        let value = serde_json::to_vec(self)
            .map_err(|e| PilotError::encoding(TypeUrl::ENDPOINT, &self.cluster_name, e))?;
        Ok(prost_types::Any {
            type_url: TypeUrl::ENDPOINT.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn filters_by_subset_labels() {
        let endpoints = vec![
            Endpoint::new("10.0.0.1", 80).with_label("version", "v1"),
            Endpoint::new("10.0.0.2", 80).with_label("version", "v2"),
        ];
        let la = build_endpoint_assignment("c", &endpoints, &selector(&[("version", "v2")]));
        assert_eq!(la.endpoint_count(), 1);
        assert_eq!(la.endpoints[0].lb_endpoints[0].address, "10.0.0.2");

        let none = build_endpoint_assignment("c", &endpoints, &selector(&[("version", "v3")]));
        assert!(none.is_empty());
    }

    #[test]
    fn order_independent() {
        let a = vec![
            Endpoint::new("10.0.0.1", 80).with_locality("b"),
            Endpoint::new("10.0.0.2", 80).with_locality("a").with_weight(3),
        ];
        let mut b = a.clone();
        b.reverse();
        let la = build_endpoint_assignment("c", &a, &BTreeMap::new());
        assert_eq!(la, build_endpoint_assignment("c", &b, &BTreeMap::new()));
        assert_eq!(la.endpoints[0].locality, "a");
        assert_eq!(la.endpoints[0].load_balancing_weight, 3);
        assert_eq!(la.encode().unwrap(), build_endpoint_assignment("c", &b, &BTreeMap::new()).encode().unwrap());
    }

    #[test]
    fn locality_weight_saturates() {
        let eps = vec![
            Endpoint::new("10.0.0.1", 80).with_locality("a").with_weight(u32::MAX),
            Endpoint::new("10.0.0.2", 80).with_locality("a").with_weight(2),
        ];
        let la = build_endpoint_assignment("c", &eps, &BTreeMap::new());
        assert_eq!(la.endpoints.len(), 1);
        assert_eq!(la.endpoints[0].load_balancing_weight, u32::MAX);
        assert_eq!(la.endpoints[0].lb_endpoints[0].weight, u32::MAX);
    }
}
