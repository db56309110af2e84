//! Type URLs for the resource kinds a proxy can subscribe to.

use std::fmt;

/// Type URL wrapper.
///
/// A proxy names what it wants by type URL. Only clusters and endpoint
/// assignments are generated by this control plane, but the other well-known
/// URLs are recognised so that requests for them can be rejected cleanly.
///
/// # Example
///
/// ```rust
/// use pilot_core::{ResourceKind, TypeUrl};
///
/// let t = TypeUrl::new("type.googleapis.com/envoy.config.cluster.v3.Cluster");
/// assert_eq!(t.short_name(), "Cluster");
/// assert_eq!(t.kind(), ResourceKind::Cluster);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeUrl(String);

/// Coarse classification of a type URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Upstream cluster definitions (CDS).
    Cluster,
    /// Endpoint assignments for EDS clusters.
    Endpoint,
    /// Listeners (LDS).
    Listener,
    /// Route configurations (RDS).
    Route,
    /// Secrets (SDS).
    Secret,
    /// Anything else.
    Other,
}

impl ResourceKind {
    /// Abbreviation used in logs and metric labels.
    #[must_use]
    pub fn abbreviation(self) -> &'static str {
        match self {
            Self::Cluster => "cds",
            Self::Endpoint => "eds",
            Self::Listener => "lds",
            Self::Route => "rds",
            Self::Secret => "sds",
            Self::Other => "other",
        }
    }
}

impl TypeUrl {
    /// Cluster (CDS).
    pub const CLUSTER: &'static str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

    /// ClusterLoadAssignment (EDS).
    pub const ENDPOINT: &'static str =
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

    /// Listener (LDS).
    pub const LISTENER: &'static str = "type.googleapis.com/envoy.config.listener.v3.Listener";

    /// RouteConfiguration (RDS).
    pub const ROUTE: &'static str =
        "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

    /// Secret (SDS).
    pub const SECRET: &'static str =
        "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

    /// Create a new type URL from a string.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Type URL for clusters.
    #[must_use]
    pub fn cluster() -> Self {
        Self::new(Self::CLUSTER)
    }

    /// Type URL for endpoint assignments.
    #[must_use]
    pub fn endpoint() -> Self {
        Self::new(Self::ENDPOINT)
    }

    /// Get the type URL as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last dotted segment of the message name, e.g. `Cluster`.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0
            .rsplit('/')
            .next()
            .and_then(|s| s.rsplit('.').next())
            .unwrap_or(&self.0)
    }

    /// Classify this URL.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self.0.as_str() {
            Self::CLUSTER => ResourceKind::Cluster,
            Self::ENDPOINT => ResourceKind::Endpoint,
            Self::LISTENER => ResourceKind::Listener,
            Self::ROUTE => ResourceKind::Route,
            Self::SECRET => ResourceKind::Secret,
            _ => ResourceKind::Other,
        }
    }

    /// Whether this looks like a protobuf type URL at all.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0
            .strip_prefix("type.googleapis.com/")
            .is_some_and(|rest| !rest.is_empty())
    }

    /// Consume and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TypeUrl {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TypeUrl {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TypeUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
