//! Connected proxies and change fan-out.
//!
//! The registry never touches session state. Each connection task owns its
//! sessions and publishes a [`ConnectionStatus`] through a `watch` channel;
//! the registry only reads it for admin dumps. Changes reach connections as
//! [`PushRequest`]s over a one-slot channel: if a request is already queued
//! the new one is merged into it, since every push recompiles from current
//! state anyway.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use pilot_compiler::{Service, ServiceCatalog};
use pilot_core::NodeHash;
use pilot_topology::{PodListener, PodRecord};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::metrics::{PilotMetrics, QueueOutcome};
use crate::proxy::ProxyInfo;
use crate::session::SessionStatus;
use crate::stream::StreamId;

/// Why a connection should recompute its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushReason {
    /// A pod was added, updated or removed.
    Pod(IpAddr),
    /// The destination rule of a host changed.
    Policy(String),
    /// A service was added, updated or removed.
    Service(String),
    /// Everything may have changed.
    Full,
}

/// A request to re-evaluate every session of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// What triggered it.
    pub reason: PushReason,
}

/// Status a connection task publishes after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// One entry per resource type, in type URL order.
    pub sessions: Vec<SessionStatus>,
    /// Requests received.
    pub requests: u64,
    /// Responses sent.
    pub responses: u64,
}

/// Admin view of one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionDump {
    /// Stream id.
    pub stream: StreamId,
    /// Node id of the proxy.
    pub node_id: String,
    /// Proxy namespace.
    pub namespace: String,
    /// Proxy addresses.
    pub ip_addresses: Vec<IpAddr>,
    /// Time since the proxy connected.
    pub connected_for: Duration,
    /// Published status.
    pub status: ConnectionStatus,
}

impl ConnectionDump {
    /// Status of one resource type.
    pub fn session(&self, type_url: &str) -> Option<&SessionStatus> {
        self.status.sessions.iter().find(|s| s.type_url == type_url)
    }
}

#[derive(Debug)]
struct Connection {
    proxy: Arc<ProxyInfo>,
    push_tx: mpsc::Sender<PushRequest>,
    status: watch::Receiver<ConnectionStatus>,
    connected_at: Instant,
}

#[derive(Debug)]
struct Inner {
    connections: DashMap<StreamId, Connection>,
    catalog: Arc<ServiceCatalog>,
    /// Hosts each pod was last selected by, so label changes reach old
    /// consumers too.
    pod_services: Mutex<HashMap<IpAddr, BTreeSet<String>>>,
    metrics: PilotMetrics,
}

/// Registry of connected proxies.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Create a registry over a service catalog.
    pub fn new(catalog: Arc<ServiceCatalog>, metrics: PilotMetrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: DashMap::new(),
                catalog,
                pod_services: Mutex::new(HashMap::new()),
                metrics,
            }),
        }
    }

    /// The service catalog.
    #[inline]
    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.inner.catalog
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Register a connection.
    ///
    /// The connection stays registered until the returned guard is dropped.
    pub fn register(
        &self,
        stream: StreamId,
        proxy: Arc<ProxyInfo>,
        status: watch::Receiver<ConnectionStatus>,
    ) -> (Registration, mpsc::Receiver<PushRequest>) {
        let (push_tx, push_rx) = mpsc::channel(1);
        let overlapping = self.streams_for_hash(proxy.node_hash);
        if overlapping.is_empty() {
            debug!(%stream, proxy = %proxy, "proxy registered");
        } else {
            debug!(%stream, proxy = %proxy, ?overlapping, "proxy registered with streams still open");
        }
        self.inner.connections.insert(
            stream,
            Connection {
                proxy,
                push_tx,
                status,
                connected_at: Instant::now(),
            },
        );
        (
            Registration {
                registry: self.clone(),
                stream,
            },
            push_rx,
        )
    }

    /// Open streams of the proxy with this node id, ordered by stream.
    pub fn streams_for(&self, node_id: &str) -> Vec<StreamId> {
        self.streams_for_hash(NodeHash::from_id(node_id))
    }

    fn streams_for_hash(&self, hash: NodeHash) -> Vec<StreamId> {
        let mut streams: Vec<StreamId> = self
            .inner
            .connections
            .iter()
            .filter(|entry| entry.value().proxy.node_hash == hash)
            .map(|entry| *entry.key())
            .collect();
        streams.sort();
        streams
    }

    fn unregister(&self, stream: StreamId) {
        if self.inner.connections.remove(&stream).is_some() {
            debug!(%stream, "proxy unregistered");
        }
    }

    /// Add or replace a service and notify the proxies that see it.
    ///
    /// Returns the number of connections notified.
    pub fn upsert_service(&self, service: Service) -> usize {
        let previous = self.inner.catalog.get(&service.hostname);
        let host = service.hostname.clone();
        if !self.inner.catalog.upsert(service) {
            return 0;
        }
        let current = self.inner.catalog.get(&host);
        let affected: Vec<Arc<Service>> = previous.into_iter().chain(current).collect();
        self.notify_matching(PushReason::Service(host), |proxy| {
            affected.iter().any(|s| s.is_visible_from(&proxy.namespace))
        })
    }

    /// Remove a service and notify the proxies that saw it.
    pub fn remove_service(&self, host: &str) -> usize {
        match self.inner.catalog.remove(host) {
            Some(service) => self.notify_matching(PushReason::Service(host.to_string()), |proxy| {
                service.is_visible_from(&proxy.namespace)
            }),
            None => 0,
        }
    }

    /// The destination rule for `host` changed.
    ///
    /// Returns the number of connections notified; zero for unknown hosts.
    pub fn on_policy_change(&self, host: &str) -> usize {
        match self.inner.catalog.get(host) {
            Some(service) => self.notify_matching(PushReason::Policy(host.to_string()), |proxy| {
                service.is_visible_from(&proxy.namespace)
            }),
            None => {
                trace!(host, "policy change for unknown host");
                0
            }
        }
    }

    /// Notify every connection.
    pub fn push_all(&self) -> usize {
        self.notify_matching(PushReason::Full, |_| true)
    }

    /// Connections affected by a change to `pod`.
    fn on_pod(&self, pod: &PodRecord, removed: bool) -> usize {
        let current: BTreeSet<String> = if removed {
            BTreeSet::new()
        } else {
            self.inner
                .catalog
                .services_selecting(pod.namespace(), &pod.labels)
                .iter()
                .map(|s| s.hostname.clone())
                .collect()
        };

        let previous = {
            let mut index = self.inner.pod_services.lock();
            if current.is_empty() {
                index.remove(&pod.ip)
            } else {
                index.insert(pod.ip, current.clone())
            }
        }
        .unwrap_or_default();

        let services: Vec<Arc<Service>> = current
            .union(&previous)
            .filter_map(|host| self.inner.catalog.get(host))
            .collect();

        self.notify_matching(PushReason::Pod(pod.ip), |proxy| {
            proxy.has_ip(pod.ip) || services.iter().any(|s| s.is_visible_from(&proxy.namespace))
        })
    }

    fn notify_matching(&self, reason: PushReason, affected: impl Fn(&ProxyInfo) -> bool) -> usize {
        let mut notified = 0;
        for entry in self.inner.connections.iter() {
            let connection = entry.value();
            if !affected(&connection.proxy) {
                continue;
            }
            let outcome = match connection.push_tx.try_send(PushRequest {
                reason: reason.clone(),
            }) {
                Ok(()) => QueueOutcome::Queued,
                Err(TrySendError::Full(_)) => QueueOutcome::Coalesced,
                Err(TrySendError::Closed(_)) => QueueOutcome::Closed,
            };
            self.inner.metrics.record_queue(outcome);
            if outcome != QueueOutcome::Closed {
                notified += 1;
            }
        }
        trace!(?reason, notified, "push requests fanned out");
        notified
    }

    /// Per-connection view of accepted versions, outstanding nonces,
    /// rejections and the last pushed resource names, ordered by stream.
    pub fn admin_snapshot(&self) -> Vec<ConnectionDump> {
        let mut dumps: Vec<ConnectionDump> = self
            .inner
            .connections
            .iter()
            .map(|entry| {
                let connection = entry.value();
                ConnectionDump {
                    stream: *entry.key(),
                    node_id: connection.proxy.node_id.clone(),
                    namespace: connection.proxy.namespace.clone(),
                    ip_addresses: connection.proxy.ip_addresses.clone(),
                    connected_for: connection.connected_at.elapsed(),
                    status: connection.status.borrow().clone(),
                }
            })
            .collect();
        dumps.sort_by_key(|d| d.stream);
        dumps
    }
}

impl PodListener for SessionRegistry {
    fn on_added(&self, pod: &PodRecord) {
        self.on_pod(pod, false);
    }

    fn on_updated(&self, pod: &PodRecord) {
        self.on_pod(pod, false);
    }

    fn on_deleted(&self, pod: &PodRecord) {
        self.on_pod(pod, true);
    }
}

/// Keeps a connection registered; unregisters on drop.
#[derive(Debug)]
pub struct Registration {
    registry: SessionRegistry,
    stream: StreamId,
}

impl Registration {
    /// Registered stream.
    #[inline]
    pub fn stream(&self) -> StreamId {
        self.stream
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.stream);
    }
}
