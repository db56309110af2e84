//! Metrics for the push pipeline.
//!
//! Everything goes through the `metrics` facade; install a recorder (for
//! example a Prometheus exporter) to collect it. The in-process gauges kept
//! here let tests and admin views read the current values directly.
//!
//! | name | kind | labels |
//! |------|------|--------|
//! | `pilot_requests_total` | counter | `type` |
//! | `pilot_pushes_total` | counter | `type` |
//! | `pilot_push_suppressed_total` | counter | `type` |
//! | `pilot_acks_total` | counter | `type` |
//! | `pilot_nacks_total` | counter | `type` |
//! | `pilot_push_requests_total` | counter | `outcome` |
//! | `pilot_compile_duration_seconds` | histogram | `type` |
//! | `pilot_connected_proxies` | gauge | |
//! | `pilot_stream_duration_seconds` | histogram | |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use pilot_core::TypeUrl;

/// Outcome of queueing a push request for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Queued.
    Queued,
    /// A request was already queued; the two were merged.
    Coalesced,
    /// The connection is gone.
    Closed,
}

impl QueueOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Coalesced => "coalesced",
            Self::Closed => "closed",
        }
    }
}

/// Push pipeline metrics.
#[derive(Debug, Clone, Default)]
pub struct PilotMetrics {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    connected: AtomicU64,
    pushes: AtomicU64,
    nacks: AtomicU64,
}

fn type_label(type_url: &TypeUrl) -> &'static str {
    type_url.kind().abbreviation()
}

impl PilotMetrics {
    /// Create a metrics handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request arrived.
    pub fn record_request(&self, type_url: &TypeUrl) {
        counter!("pilot_requests_total", "type" => type_label(type_url)).increment(1);
    }

    /// A push was sent.
    pub fn record_push(&self, type_url: &TypeUrl) {
        self.inner.pushes.fetch_add(1, Ordering::Relaxed);
        counter!("pilot_pushes_total", "type" => type_label(type_url)).increment(1);
    }

    /// A push was compiled but not sent because the proxy already had it.
    pub fn record_suppressed(&self, type_url: &TypeUrl) {
        counter!("pilot_push_suppressed_total", "type" => type_label(type_url)).increment(1);
    }

    /// A push was accepted.
    pub fn record_ack(&self, type_url: &TypeUrl) {
        counter!("pilot_acks_total", "type" => type_label(type_url)).increment(1);
    }

    /// A push was rejected.
    pub fn record_nack(&self, type_url: &TypeUrl) {
        self.inner.nacks.fetch_add(1, Ordering::Relaxed);
        counter!("pilot_nacks_total", "type" => type_label(type_url)).increment(1);
    }

    /// Compile time for one push.
    pub fn record_compile(&self, type_url: &TypeUrl, elapsed: Duration) {
        histogram!("pilot_compile_duration_seconds", "type" => type_label(type_url))
            .record(elapsed.as_secs_f64());
    }

    /// Result of queueing a push request.
    pub fn record_queue(&self, outcome: QueueOutcome) {
        counter!("pilot_push_requests_total", "outcome" => outcome.as_str()).increment(1);
    }

    fn proxy_connected(&self) {
        let count = self.inner.connected.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("pilot_connected_proxies").set(count as f64);
    }

    fn proxy_disconnected(&self, duration: Duration) {
        let count = self.inner.connected.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!("pilot_connected_proxies").set(count as f64);
        histogram!("pilot_stream_duration_seconds").record(duration.as_secs_f64());
    }

    /// Proxies currently connected.
    #[inline]
    pub fn connected_proxies(&self) -> u64 {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Pushes sent since start.
    #[inline]
    pub fn pushes(&self) -> u64 {
        self.inner.pushes.load(Ordering::Relaxed)
    }

    /// Rejections received since start.
    #[inline]
    pub fn nacks(&self) -> u64 {
        self.inner.nacks.load(Ordering::Relaxed)
    }

    /// Track a stream until the returned guard is dropped.
    pub fn track_stream(&self) -> StreamTracker {
        self.proxy_connected();
        StreamTracker {
            start: Instant::now(),
            metrics: self.clone(),
        }
    }
}

/// Keeps a stream counted as connected while alive.
#[derive(Debug)]
pub struct StreamTracker {
    start: Instant,
    metrics: PilotMetrics,
}

impl Drop for StreamTracker {
    fn drop(&mut self) {
        self.metrics.proxy_disconnected(self.start.elapsed());
    }
}
