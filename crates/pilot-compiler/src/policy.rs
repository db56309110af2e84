//! Destination rules and traffic policy.
//!
//! A policy attached at a more specific level replaces the less specific one
//! as a whole; fields are never merged across levels.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Simple load balancing algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimpleLb {
    /// Round robin.
    RoundRobin,
    /// Least outstanding requests.
    LeastRequest,
    /// Random.
    Random,
    /// Forward to the original destination; turns the cluster into
    /// `ORIGINAL_DST`.
    Passthrough,
}

/// Connection pool limits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolSettings {
    /// TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Maximum upstream connections.
    pub max_connections: Option<u32>,
    /// Maximum pending HTTP/1.1 requests.
    pub http1_max_pending_requests: Option<u32>,
    /// Maximum concurrent HTTP/2 requests.
    pub http2_max_requests: Option<u32>,
    /// Maximum outstanding retries.
    pub max_retries: Option<u32>,
}

impl ConnectionPoolSettings {
    /// Whether any limit is set.
    #[must_use]
    pub fn has_limits(&self) -> bool {
        self.max_connections.is_some()
            || self.http1_max_pending_requests.is_some()
            || self.http2_max_requests.is_some()
            || self.max_retries.is_some()
    }
}

/// Outlier detection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutlierDetection {
    /// Consecutive errors before ejection.
    pub consecutive_errors: u32,
    /// Time between ejection sweeps.
    pub interval: Duration,
    /// Minimum ejection duration.
    pub base_ejection_time: Duration,
    /// Maximum share of hosts that may be ejected.
    pub max_ejection_percent: u32,
}

impl Default for OutlierDetection {
    fn default() -> Self {
        Self {
            consecutive_errors: 5,
            interval: Duration::from_secs(10),
            base_ejection_time: Duration::from_secs(30),
            max_ejection_percent: 10,
        }
    }
}

/// Upstream TLS mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsMode {
    /// Plaintext.
    #[default]
    Disable,
    /// TLS with server verification only.
    Simple,
    /// TLS with client certificates supplied in the rule.
    Mutual,
    /// Mesh-issued mutual TLS.
    IstioMutual,
}

/// Upstream TLS settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Mode.
    pub mode: TlsMode,
    /// Explicit SNI.
    pub sni: Option<String>,
    /// Subject alt names to verify.
    pub subject_alt_names: Vec<String>,
}

impl TlsSettings {
    /// Settings with only a mode.
    #[must_use]
    pub fn mode(mode: TlsMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

/// Traffic policy for a service or subset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficPolicy {
    /// Load balancing algorithm.
    pub load_balancer: Option<SimpleLb>,
    /// Connection pool settings.
    pub connection_pool: Option<ConnectionPoolSettings>,
    /// Outlier detection.
    pub outlier_detection: Option<OutlierDetection>,
    /// Upstream TLS.
    pub tls: Option<TlsSettings>,
}

impl TrafficPolicy {
    /// Set the load balancer.
    #[must_use]
    pub fn with_load_balancer(mut self, lb: SimpleLb) -> Self {
        self.load_balancer = Some(lb);
        self
    }

    /// Set the connect timeout, creating connection pool settings if needed.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connection_pool
            .get_or_insert_with(ConnectionPoolSettings::default)
            .connect_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of upstream connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.connection_pool
            .get_or_insert_with(ConnectionPoolSettings::default)
            .max_connections = Some(max);
        self
    }

    /// Set outlier detection.
    #[must_use]
    pub fn with_outlier_detection(mut self, od: OutlierDetection) -> Self {
        self.outlier_detection = Some(od);
        self
    }

    /// Set TLS.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// A named partition of a service's endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    /// Subset name, e.g. `v1`.
    pub name: String,
    /// Endpoint label selector.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Replaces the rule's policy for this subset.
    #[serde(default)]
    pub traffic_policy: Option<TrafficPolicy>,
}

impl Subset {
    /// Subset with an empty selector.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a selector label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set an overriding policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TrafficPolicy) -> Self {
        self.traffic_policy = Some(policy);
        self
    }
}

/// Routing policy for one host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRule {
    /// Host the rule applies to.
    pub host: String,
    /// Rule name.
    pub name: String,
    /// Namespace the rule was defined in.
    pub namespace: String,
    /// Policy for the whole host.
    #[serde(default)]
    pub traffic_policy: Option<TrafficPolicy>,
    /// Subsets.
    #[serde(default)]
    pub subsets: Vec<Subset>,
}

impl DestinationRule {
    /// A rule with no policy and no subsets.
    pub fn new(
        host: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set the host-level policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TrafficPolicy) -> Self {
        self.traffic_policy = Some(policy);
        self
    }

    /// Add a subset.
    #[must_use]
    pub fn with_subset(mut self, subset: Subset) -> Self {
        self.subsets.push(subset);
        self
    }

    /// Path recorded in cluster metadata.
    #[must_use]
    pub fn config_path(&self) -> String {
        format!(
            "/apis/networking.istio.io/v1alpha3/namespaces/{}/destination-rule/{}",
            self.namespace, self.name
        )
    }

    /// Name of the first subset that appears more than once.
    #[must_use]
    pub fn duplicate_subset(&self) -> Option<&str> {
        let mut seen = std::collections::BTreeSet::new();
        self.subsets
            .iter()
            .map(|s| s.name.as_str())
            .find(|name| !seen.insert(*name))
    }
}

/// Pick the policy in force: the most specific one present wins outright.
#[must_use]
pub fn resolve_policy<'a>(
    default: &'a TrafficPolicy,
    rule: Option<&'a TrafficPolicy>,
    subset: Option<&'a TrafficPolicy>,
) -> &'a TrafficPolicy {
    subset.or(rule).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_specific_policy_wins() {
        let default = TrafficPolicy::default().with_load_balancer(SimpleLb::RoundRobin);
        let rule = TrafficPolicy::default().with_max_connections(10);
        let subset = TrafficPolicy::default().with_load_balancer(SimpleLb::Random);

        assert_eq!(resolve_policy(&default, None, None), &default);
        assert_eq!(resolve_policy(&default, Some(&rule), None), &rule);
        let chosen = resolve_policy(&default, Some(&rule), Some(&subset));
        assert_eq!(chosen, &subset);
        // no field merging
        assert!(chosen.connection_pool.is_none());
    }

    #[test]
    fn config_path() {
        let rule = DestinationRule::new("svc", "svc-dr", "default");
        assert_eq!(
            rule.config_path(),
            "/apis/networking.istio.io/v1alpha3/namespaces/default/destination-rule/svc-dr"
        );
    }

    #[test]
    fn duplicate_subsets() {
        let rule = DestinationRule::new("svc", "dr", "ns")
            .with_subset(Subset::new("v1"))
            .with_subset(Subset::new("v2"))
            .with_subset(Subset::new("v1"));
        assert_eq!(rule.duplicate_subset(), Some("v1"));
    }

    #[test]
    fn policy_from_json() {
        let json = r#"{
            "load_balancer": "LeastRequest",
            "connection_pool": { "max_connections": 100 },
            "tls": { "mode": "IstioMutual" }
        }"#;
        let policy: TrafficPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.load_balancer, Some(SimpleLb::LeastRequest));
        assert_eq!(policy.connection_pool.unwrap().max_connections, Some(100));
        assert_eq!(policy.tls.unwrap().mode, TlsMode::IstioMutual);
    }
}
