//! Compile diagnostics and counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Why a cluster was not produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    /// A STATIC or STRICT_DNS cluster resolved to zero endpoints.
    NoEndpoints,
    /// A subset with no label selector.
    EmptySubsetSelector,
    /// The policy source failed for the service.
    PolicyLookupFailed,
}

impl DiagnosticKind {
    /// Metric-friendly name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoEndpoints => "no_endpoints",
            Self::EmptySubsetSelector => "empty_subset_selector",
            Self::PolicyLookupFailed => "policy_lookup_failed",
        }
    }
}

/// One skipped cluster or service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Category.
    pub kind: DiagnosticKind,
    /// Cluster name or service host the diagnostic is about.
    pub subject: String,
    /// Human-readable detail.
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic.
    pub fn new(kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.kind.as_str(), self.subject, self.message)
    }
}

/// Compiler activity counters.
#[derive(Debug, Default)]
pub struct CompileStats {
    compiles: AtomicU64,
    clusters_built: AtomicU64,
    no_endpoint_clusters: AtomicU64,
    diagnostics: AtomicU64,
}

impl CompileStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_compile(&self, clusters: usize) {
        self.compiles.fetch_add(1, Ordering::Relaxed);
        self.clusters_built.fetch_add(clusters as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_diagnostic(&self, kind: DiagnosticKind) {
        self.diagnostics.fetch_add(1, Ordering::Relaxed);
        if kind == DiagnosticKind::NoEndpoints {
            self.no_endpoint_clusters.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Compile invocations.
    #[inline]
    pub fn compiles(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Clusters produced.
    #[inline]
    pub fn clusters_built(&self) -> u64 {
        self.clusters_built.load(Ordering::Relaxed)
    }

    /// Inline-endpoint clusters skipped for lack of endpoints.
    #[inline]
    pub fn no_endpoint_clusters(&self) -> u64 {
        self.no_endpoint_clusters.load(Ordering::Relaxed)
    }

    /// All diagnostics recorded.
    #[inline]
    pub fn diagnostics(&self) -> u64 {
        self.diagnostics.load(Ordering::Relaxed)
    }
}
