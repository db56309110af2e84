//! Node locality labels.

use std::collections::BTreeMap;

/// Region label.
pub const LABEL_REGION: &str = "failure-domain.beta.kubernetes.io/region";
/// Zone label.
pub const LABEL_ZONE: &str = "failure-domain.beta.kubernetes.io/zone";
/// GA region label, read when the beta label is missing.
pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
/// GA zone label, read when the beta label is missing.
pub const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

/// Format a locality as `region/zone`, or the empty string if both are empty.
///
/// ```rust
/// use pilot_topology::locality_string;
///
/// assert_eq!(locality_string("us-east", "1a"), "us-east/1a");
/// assert_eq!(locality_string("us-east", ""), "us-east/");
/// assert_eq!(locality_string("", ""), "");
/// ```
#[must_use]
pub fn locality_string(region: &str, zone: &str) -> String {
    if region.is_empty() && zone.is_empty() {
        return String::new();
    }
    format!("{region}/{zone}")
}

/// Region and zone of a node, taken from its labels.
#[must_use]
pub fn region_zone(labels: &BTreeMap<String, String>) -> (&str, &str) {
    let pick = |primary: &str, fallback: &str| {
        labels
            .get(primary)
            .or_else(|| labels.get(fallback))
            .map(String::as_str)
            .unwrap_or("")
    };
    (
        pick(LABEL_REGION, LABEL_TOPOLOGY_REGION),
        pick(LABEL_ZONE, LABEL_TOPOLOGY_ZONE),
    )
}

/// Locality string of a node, taken from its labels.
#[must_use]
pub fn node_locality(labels: &BTreeMap<String, String>) -> String {
    let (region, zone) = region_zone(labels);
    locality_string(region, zone)
}
