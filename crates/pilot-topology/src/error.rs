//! Reasons an event could not be applied.

use crate::event::PodName;

/// An inbound event that was dropped.
///
/// None of these are fatal; the caller logs them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Pod has no IP yet and is not addressable.
    #[error("pod {0} has no IP assigned yet")]
    MissingIp(PodName),

    /// Add or update event without a decodable payload.
    #[error("event for pod {0} carries no pod payload")]
    MissingPayload(PodName),

    /// Delete for a pod the cache never stored.
    #[error("pod {0} is not in the cache")]
    UnknownPod(PodName),
}

/// Result alias for cache operations.
pub type TopologyResult<T> = std::result::Result<T, TopologyError>;
