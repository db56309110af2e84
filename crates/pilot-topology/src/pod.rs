//! Cached pod records.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::event::{PodInfo, PodName};

/// What the cache knows about one addressable pod.
///
/// Keyed by IP; at most one record exists per IP.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    /// Pod IP.
    pub ip: IpAddr,
    /// `namespace/name` identity.
    pub name: PodName,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
    /// `region/zone` of the node, or empty.
    pub locality: String,
    /// SPIFFE identity of the pod's service account.
    pub service_account: String,
    /// Node the pod is bound to.
    pub node_name: String,
}

impl PodRecord {
    /// Build a record from a live pod that already has an IP.
    pub(crate) fn from_info(
        info: &PodInfo,
        ip: IpAddr,
        locality: String,
        trust_domain: &str,
    ) -> Self {
        Self {
            ip,
            name: info.name.clone(),
            labels: info.labels.clone(),
            locality,
            service_account: spiffe_identity(
                trust_domain,
                &info.name.namespace,
                &info.service_account,
            ),
            node_name: info.node_name.clone(),
        }
    }

    /// Namespace of the pod.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.name.namespace
    }

    /// Whether every selector entry is present in the labels.
    ///
    /// An empty selector matches nothing.
    #[must_use]
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        !selector.is_empty() && labels_match(&self.labels, selector)
    }
}

/// `true` when `labels` contains every `selector` entry.
#[must_use]
pub fn labels_match(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
}

/// `spiffe://<trust-domain>/ns/<namespace>/sa/<service-account>`
#[must_use]
pub fn spiffe_identity(trust_domain: &str, namespace: &str, service_account: &str) -> String {
    format!("spiffe://{trust_domain}/ns/{namespace}/sa/{service_account}")
}
