//! Per-stream identity and counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::proxy::ProxyInfo;

/// Unique identifier for an ADS stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StreamId(u64);

impl StreamId {
    /// Allocate the next stream id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Identity and traffic counters of one ADS stream.
///
/// The proxy is unknown until the first request carrying a node arrives.
#[derive(Debug)]
pub struct StreamContext {
    id: StreamId,
    proxy: Option<Arc<ProxyInfo>>,
    created_at: Instant,
    requests: AtomicU64,
    responses: AtomicU64,
    rejections: AtomicU64,
    last_activity: Mutex<Instant>,
}

impl StreamContext {
    /// Context for a new stream.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            id: StreamId::new(),
            proxy: None,
            created_at: now,
            requests: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            last_activity: Mutex::new(now),
        }
    }

    /// Stream id.
    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The connected proxy, once identified.
    #[inline]
    pub fn proxy(&self) -> Option<&Arc<ProxyInfo>> {
        self.proxy.as_ref()
    }

    /// Node id of the connected proxy, once identified.
    #[inline]
    pub fn node_id(&self) -> Option<&str> {
        self.proxy.as_deref().map(|p| p.node_id.as_str())
    }

    /// Bind the stream to a proxy.
    pub fn set_proxy(&mut self, proxy: Arc<ProxyInfo>) {
        self.proxy = Some(proxy);
    }

    /// How long the stream has been open.
    #[inline]
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Record an incoming request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Record a sent response.
    pub fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Record a rejected response.
    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests received.
    #[inline]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Responses sent.
    #[inline]
    pub fn response_count(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Rejections received across all types.
    #[inline]
    pub fn rejection_count(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Time since the last request or response.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

impl Default for StreamContext {
    fn default() -> Self {
        Self::new()
    }
}
