//! Inbound topology events.
//!
//! Events come from an external watch on the cluster API. The cache only relies
//! on per-object delivery order; duplicate delivery of an unchanged object is a
//! no-op.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// What happened to the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Object was created.
    Added,
    /// Object was modified.
    Updated,
    /// Object was removed.
    Deleted,
}

/// A single change to the watched topology.
#[derive(Clone, Debug, PartialEq)]
pub enum TopologyEvent {
    /// A node changed.
    Node(NodeEvent),
    /// A pod changed.
    Pod(PodEvent),
}

impl TopologyEvent {
    /// Kind of the wrapped event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Node(e) => e.kind,
            Self::Pod(e) => e.kind,
        }
    }
}

/// Node event with its labels.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeEvent {
    /// What happened.
    pub kind: EventKind,
    /// Node name. Nodes are not namespaced.
    pub name: String,
    /// Node labels; only the locality labels are read.
    pub labels: BTreeMap<String, String>,
}

impl NodeEvent {
    /// Convenience constructor.
    pub fn new(kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Pod event.
///
/// `pod` is `None` when a delete arrives after the object has already been
/// evicted upstream; only the identity is known then.
#[derive(Clone, Debug, PartialEq)]
pub struct PodEvent {
    /// What happened.
    pub kind: EventKind,
    /// Pod identity.
    pub name: PodName,
    /// Pod payload, if it could be decoded.
    pub pod: Option<PodInfo>,
}

impl PodEvent {
    /// Event carrying a full payload.
    pub fn new(kind: EventKind, pod: PodInfo) -> Self {
        Self {
            kind,
            name: pod.name.clone(),
            pod: Some(pod),
        }
    }

    /// Delete event whose payload was lost.
    pub fn deleted_without_payload(name: PodName) -> Self {
        Self {
            kind: EventKind::Deleted,
            name,
            pod: None,
        }
    }
}

/// `namespace/name` identity of a pod.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodName {
    /// Namespace.
    pub namespace: String,
    /// Name within the namespace.
    pub name: String,
}

impl PodName {
    /// Create a pod name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase reported by the cluster API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    /// Scheduled but not all containers are running yet.
    Pending,
    /// Running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// Phase could not be obtained.
    Unknown,
}

impl PodPhase {
    /// Pods in these phases are addressable and kept in the cache.
    #[inline]
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// Decoded pod object as delivered by the watch.
#[derive(Clone, Debug, PartialEq)]
pub struct PodInfo {
    /// Identity.
    pub name: PodName,
    /// Assigned IP; absent until the scheduler has placed the pod.
    pub ip: Option<IpAddr>,
    /// Lifecycle phase.
    pub phase: PodPhase,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
    /// Node the pod is bound to.
    pub node_name: String,
    /// Kubernetes service account name.
    pub service_account: String,
}

impl PodInfo {
    /// A running pod with no labels on the given node.
    pub fn running(name: PodName, ip: IpAddr, node_name: impl Into<String>) -> Self {
        Self {
            name,
            ip: Some(ip),
            phase: PodPhase::Running,
            labels: BTreeMap::new(),
            node_name: node_name.into(),
            service_account: "default".to_string(),
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the service account.
    #[must_use]
    pub fn with_service_account(mut self, sa: impl Into<String>) -> Self {
        self.service_account = sa.into();
        self
    }

    /// Set the phase.
    #[must_use]
    pub fn with_phase(mut self, phase: PodPhase) -> Self {
        self.phase = phase;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_name_display() {
        assert_eq!(PodName::new("default", "reviews-v1").to_string(), "default/reviews-v1");
    }

    #[test]
    fn live_phases() {
        assert!(PodPhase::Pending.is_live());
        assert!(PodPhase::Running.is_live());
        assert!(!PodPhase::Succeeded.is_live());
        assert!(!PodPhase::Failed.is_live());
        assert!(!PodPhase::Unknown.is_live());
    }

    #[test]
    fn event_kind_passthrough() {
        let event = TopologyEvent::Node(NodeEvent::new(EventKind::Deleted, "n1"));
        assert_eq!(event.kind(), EventKind::Deleted);
    }
}
