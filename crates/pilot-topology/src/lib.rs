//! # pilot-topology
//!
//! Event-driven view of cluster topology for the control plane.
//!
//! - [`TopologyCache`] - pods keyed by IP plus a node to locality index
//! - [`TopologyEvent`] - typed node and pod watch events
//! - [`PodListener`] - observer interface for incremental consumers
//! - [`ChannelListener`] - adapts notifications onto a tokio channel
//!
//! ## Key Design Decisions
//!
//! - One writer at a time; readers use a `parking_lot::RwLock` and never see
//!   half-applied events
//! - Re-applying an unchanged object produces no notification
//! - A node locality change is pushed down to every pod on that node
//! - The cache is volatile and rebuilt from the watch on startup

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod error;
mod event;
mod listener;
mod locality;
mod pod;
mod stats;

pub use cache::{TopologyCache, DEFAULT_TRUST_DOMAIN};
pub use error::{TopologyError, TopologyResult};
pub use event::{EventKind, NodeEvent, PodEvent, PodInfo, PodName, PodPhase, TopologyEvent};
pub use listener::{ChannelListener, NotificationKind, PodListener, PodNotification};
pub use locality::{
    locality_string, node_locality, region_zone, LABEL_REGION, LABEL_TOPOLOGY_REGION,
    LABEL_TOPOLOGY_ZONE, LABEL_ZONE,
};
pub use pod::{labels_match, spiffe_identity, PodRecord};
pub use stats::TopologyStats;
