//! Proxy identity hashing.

use std::fmt;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

/// Fixed-size key for a proxy node id.
///
/// Several streams can belong to the same proxy (for example after a
/// reconnect overlaps the old stream); the registry finds all of them by
/// comparing this hash.
///
/// # Example
///
/// ```rust
/// use pilot_core::NodeHash;
///
/// let a = NodeHash::from_id("sidecar~10.0.0.5~reviews-v1.default~default.svc.cluster.local");
/// let b = NodeHash::from_id("sidecar~10.0.0.5~reviews-v1.default~default.svc.cluster.local");
/// assert_eq!(a, b);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHash(u64);

impl NodeHash {
    /// Hash a node id.
    #[must_use]
    pub fn from_id(node_id: &str) -> Self {
        let mut hasher = FnvHasher::default();
        node_id.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Raw hash value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
