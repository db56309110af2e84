//! Observers of pod changes.
//!
//! Any number of [`PodListener`]s can be registered on a
//! [`TopologyCache`](crate::TopologyCache). Callbacks run on the thread that
//! applied the event, after the cache's data lock has been released, so a
//! listener may query the cache but must not block.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::pod::PodRecord;

/// Observer of pod record changes.
pub trait PodListener: Send + Sync {
    /// A record was created.
    fn on_added(&self, pod: &PodRecord);

    /// A record changed, including a locality change pushed from its node.
    fn on_updated(&self, pod: &PodRecord);

    /// A record was removed. `pod` is the last stored state.
    fn on_deleted(&self, pod: &PodRecord);
}

/// Which callback a notification corresponds to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum NotificationKind {
    /// [`PodListener::on_added`]
    Added,
    /// [`PodListener::on_updated`]
    Updated,
    /// [`PodListener::on_deleted`]
    Deleted,
}

/// A pod change as a value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PodNotification {
    /// What happened.
    pub kind: NotificationKind,
    /// Record after the change (before it, for deletes).
    pub pod: PodRecord,
}

impl PodNotification {
    pub(crate) fn deliver(&self, listener: &dyn PodListener) {
        match self.kind {
            NotificationKind::Added => listener.on_added(&self.pod),
            NotificationKind::Updated => listener.on_updated(&self.pod),
            NotificationKind::Deleted => listener.on_deleted(&self.pod),
        }
    }
}

/// Listener that forwards notifications into a bounded tokio channel.
///
/// Uses `try_send`: when the receiver falls behind, notifications are dropped
/// and counted rather than blocking the ingestion path.
#[derive(Debug)]
pub struct ChannelListener {
    sender: mpsc::Sender<PodNotification>,
    dropped: AtomicU64,
}

impl ChannelListener {
    /// Create a listener and the receiving half of its channel.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PodNotification>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Notifications lost to a full or closed channel.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, kind: NotificationKind, pod: &PodRecord) {
        let notification = PodNotification {
            kind,
            pod: pod.clone(),
        };
        if self.sender.try_send(notification).is_err() {
            // Channel full or closed, skip this update
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(ip = %pod.ip, ?kind, "pod notification dropped");
        }
    }
}

impl PodListener for ChannelListener {
    fn on_added(&self, pod: &PodRecord) {
        self.forward(NotificationKind::Added, pod);
    }

    fn on_updated(&self, pod: &PodRecord) {
        self.forward(NotificationKind::Updated, pod);
    }

    fn on_deleted(&self, pod: &PodRecord) {
        self.forward(NotificationKind::Deleted, pod);
    }
}
