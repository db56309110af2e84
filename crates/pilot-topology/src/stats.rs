//! Topology cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for cache activity.
///
/// All counters are atomic and can be read from any thread.
#[derive(Debug, Default)]
pub struct TopologyStats {
    pods_added: AtomicU64,
    pods_updated: AtomicU64,
    pods_deleted: AtomicU64,
    events_dropped: AtomicU64,
    locality_propagations: AtomicU64,
    noop_events: AtomicU64,
}

impl TopologyStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_added(&self) {
        self.pods_added.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_updated(&self) {
        self.pods_updated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_deleted(&self) {
        self.pods_deleted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_propagation(&self) {
        self.locality_propagations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_noop(&self) {
        self.noop_events.fetch_add(1, Ordering::Relaxed);
    }

    /// `PodAdded` notifications emitted.
    #[inline]
    pub fn pods_added(&self) -> u64 {
        self.pods_added.load(Ordering::Relaxed)
    }

    /// `PodUpdated` notifications emitted.
    #[inline]
    pub fn pods_updated(&self) -> u64 {
        self.pods_updated.load(Ordering::Relaxed)
    }

    /// `PodDeleted` notifications emitted.
    #[inline]
    pub fn pods_deleted(&self) -> u64 {
        self.pods_deleted.load(Ordering::Relaxed)
    }

    /// Events that could not be applied.
    #[inline]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Node locality changes pushed down to pods.
    #[inline]
    pub fn locality_propagations(&self) -> u64 {
        self.locality_propagations.load(Ordering::Relaxed)
    }

    /// Events that matched the stored state and changed nothing.
    #[inline]
    pub fn noop_events(&self) -> u64 {
        self.noop_events.load(Ordering::Relaxed)
    }

    /// Total notifications emitted.
    pub fn notifications(&self) -> u64 {
        self.pods_added() + self.pods_updated() + self.pods_deleted()
    }
}
