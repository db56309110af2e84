//! The topology cache.
//!
//! Writers are serialized by a mutex so that events are applied and their
//! notifications delivered in arrival order. The data itself sits behind a
//! reader/writer lock; readers never observe a half-applied event because all
//! changes for one event are made under a single write guard.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, trace};

use crate::error::{TopologyError, TopologyResult};
use crate::event::{EventKind, NodeEvent, PodEvent, PodName, TopologyEvent};
use crate::listener::{NotificationKind, PodListener, PodNotification};
use crate::locality::{locality_string, node_locality};
use crate::pod::PodRecord;
use crate::stats::TopologyStats;

/// Default SPIFFE trust domain.
pub const DEFAULT_TRUST_DOMAIN: &str = "cluster.local";

#[derive(Debug, Default)]
struct State {
    pods: HashMap<IpAddr, PodRecord>,
    pods_by_node: HashMap<String, BTreeSet<IpAddr>>,
    node_localities: HashMap<String, String>,
}

impl State {
    fn insert(&mut self, record: PodRecord) -> Option<PodRecord> {
        let previous = self.pods.insert(record.ip, record.clone());
        if let Some(prev) = &previous {
            if prev.node_name != record.node_name {
                self.unbind(&prev.node_name, prev.ip);
            }
        }
        self.pods_by_node
            .entry(record.node_name)
            .or_default()
            .insert(record.ip);
        previous
    }

    fn remove(&mut self, ip: IpAddr) -> Option<PodRecord> {
        let removed = self.pods.remove(&ip)?;
        self.unbind(&removed.node_name, ip);
        Some(removed)
    }

    fn unbind(&mut self, node: &str, ip: IpAddr) {
        if let Some(ips) = self.pods_by_node.get_mut(node) {
            ips.remove(&ip);
            if ips.is_empty() {
                self.pods_by_node.remove(node);
            }
        }
    }

    fn locality_of(&self, node: &str) -> String {
        self.node_localities.get(node).cloned().unwrap_or_default()
    }

    fn find_by_name(&self, name: &PodName) -> Option<IpAddr> {
        self.pods
            .values()
            .find(|record| &record.name == name)
            .map(|record| record.ip)
    }

    fn upsert(&mut self, mut record: PodRecord) -> Option<PodNotification> {
        record.locality = self.locality_of(&record.node_name);
        if self.pods.get(&record.ip) == Some(&record) {
            return None;
        }
        let kind = match self.insert(record.clone()) {
            Some(_) => NotificationKind::Updated,
            None => NotificationKind::Added,
        };
        Some(PodNotification { kind, pod: record })
    }

    /// Delete the record named `name`, trying `hint` before scanning.
    ///
    /// A record at `hint` that belongs to another pod is left alone.
    fn delete_named(&mut self, name: &PodName, hint: Option<IpAddr>) -> Option<PodNotification> {
        let ip = hint
            .filter(|ip| self.pods.get(ip).is_some_and(|record| &record.name == name))
            .or_else(|| self.find_by_name(name))?;
        self.delete(ip)
    }

    fn delete(&mut self, ip: IpAddr) -> Option<PodNotification> {
        self.remove(ip).map(|pod| PodNotification {
            kind: NotificationKind::Deleted,
            pod,
        })
    }

    fn propagate(&mut self, node: &str, locality: &str) -> Vec<PodNotification> {
        let ips: Vec<IpAddr> = self
            .pods_by_node
            .get(node)
            .map(|ips| ips.iter().copied().collect())
            .unwrap_or_default();

        let mut updated = Vec::with_capacity(ips.len());
        for ip in ips {
            if let Some(record) = self.pods.get_mut(&ip) {
                if record.locality == locality {
                    continue;
                }
                record.locality = locality.to_string();
                updated.push(PodNotification {
                    kind: NotificationKind::Updated,
                    pod: record.clone(),
                });
            }
        }
        updated
    }
}

/// Materialized view of pods keyed by IP plus a node locality index.
///
/// ## Thread Safety
///
/// Queries can run concurrently with event application. Listeners are invoked
/// after the data lock is released but while the writer lock is still held, so
/// they see a consistent cache and receive notifications in order. A listener
/// must not call a mutating method on the same cache.
///
/// # Example
///
/// ```rust
/// use pilot_topology::{EventKind, NodeEvent, PodEvent, PodInfo, PodName, TopologyCache,
///     TopologyEvent, LABEL_REGION, LABEL_ZONE};
///
/// let cache = TopologyCache::new();
/// cache.handle(TopologyEvent::Node(
///     NodeEvent::new(EventKind::Added, "n1")
///         .with_label(LABEL_REGION, "us-east")
///         .with_label(LABEL_ZONE, "1a"),
/// )).unwrap();
///
/// let ip = "10.0.0.5".parse().unwrap();
/// let pod = PodInfo::running(PodName::new("default", "web-0"), ip, "n1");
/// cache.handle(TopologyEvent::Pod(PodEvent::new(EventKind::Added, pod))).unwrap();
///
/// assert_eq!(cache.lookup_by_ip(ip).unwrap().locality, "us-east/1a");
/// ```
pub struct TopologyCache {
    write_lock: Mutex<()>,
    state: RwLock<State>,
    listeners: RwLock<Vec<Arc<dyn PodListener>>>,
    stats: TopologyStats,
    trust_domain: String,
}

impl fmt::Debug for TopologyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyCache")
            .field("pods", &self.len())
            .field("listeners", &self.listeners.read().len())
            .field("trust_domain", &self.trust_domain)
            .finish()
    }
}

impl Default for TopologyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyCache {
    /// Create an empty cache using the default trust domain.
    pub fn new() -> Self {
        Self::with_trust_domain(DEFAULT_TRUST_DOMAIN)
    }

    /// Create an empty cache with a custom SPIFFE trust domain.
    pub fn with_trust_domain(trust_domain: impl Into<String>) -> Self {
        Self {
            write_lock: Mutex::new(()),
            state: RwLock::new(State::default()),
            listeners: RwLock::new(Vec::new()),
            stats: TopologyStats::new(),
            trust_domain: trust_domain.into(),
        }
    }

    /// Register an observer.
    pub fn subscribe(&self, listener: Arc<dyn PodListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered observers.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Cache statistics.
    #[inline]
    pub fn stats(&self) -> &TopologyStats {
        &self.stats
    }

    /// Trust domain used for service account identities.
    #[inline]
    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    /// Apply one inbound event.
    ///
    /// Returns an error for events that were dropped; the cache is unchanged
    /// in that case.
    #[instrument(level = "trace", skip_all, fields(kind = ?event.kind()))]
    pub fn handle(&self, event: TopologyEvent) -> TopologyResult<()> {
        let result = match event {
            TopologyEvent::Node(e) => {
                self.handle_node(e);
                Ok(())
            }
            TopologyEvent::Pod(e) => self.handle_pod(e),
        };
        if let Err(err) = &result {
            self.stats.record_dropped();
            debug!(error = %err, "topology event dropped");
        }
        result
    }

    fn handle_node(&self, event: NodeEvent) {
        match event.kind {
            EventKind::Added | EventKind::Updated => {
                let locality = node_locality(&event.labels);
                self.set_node_locality(&event.name, locality);
            }
            EventKind::Deleted => {
                self.remove_node(&event.name);
            }
        }
    }

    fn handle_pod(&self, event: PodEvent) -> TopologyResult<()> {
        match event.kind {
            EventKind::Added | EventKind::Updated => {
                let info = event
                    .pod
                    .ok_or_else(|| TopologyError::MissingPayload(event.name.clone()))?;
                let ip = info
                    .ip
                    .ok_or_else(|| TopologyError::MissingIp(info.name.clone()))?;

                if info.phase.is_live() {
                    // locality is resolved under the write lock in upsert_pod
                    let record = PodRecord::from_info(&info, ip, String::new(), &self.trust_domain);
                    self.upsert_pod(record);
                } else {
                    trace!(pod = %info.name, phase = ?info.phase, "pod no longer live");
                    self.remove_named(&info.name, Some(ip));
                }
                Ok(())
            }
            EventKind::Deleted => {
                let hint = event.pod.as_ref().and_then(|p| p.ip);
                if self.remove_named(&event.name, hint) {
                    return Ok(());
                }
                match hint {
                    // repeated delete
                    Some(ip) => {
                        trace!(pod = %event.name, %ip, "delete for a pod not stored");
                        Ok(())
                    }
                    None => Err(TopologyError::UnknownPod(event.name)),
                }
            }
        }
    }

    fn remove_named(&self, name: &PodName, hint: Option<IpAddr>) -> bool {
        let _writer = self.write_lock.lock();
        let notification = self.state.write().delete_named(name, hint);
        match notification {
            Some(n) => {
                self.dispatch(std::slice::from_ref(&n));
                true
            }
            None => false,
        }
    }

    /// Store a pod record.
    ///
    /// The record's locality is always taken from the node index. Returns
    /// `false` if an identical record was already stored, in which case no
    /// notification fires.
    pub fn upsert_pod(&self, record: PodRecord) -> bool {
        let _writer = self.write_lock.lock();
        let notification = self.state.write().upsert(record);
        match notification {
            Some(n) => {
                self.dispatch(std::slice::from_ref(&n));
                true
            }
            None => {
                self.stats.record_noop();
                false
            }
        }
    }

    /// Remove the pod at `ip`. Returns `false` if there was none.
    pub fn remove_pod(&self, ip: IpAddr) -> bool {
        let _writer = self.write_lock.lock();
        let notification = self.state.write().delete(ip);
        match notification {
            Some(n) => {
                self.dispatch(std::slice::from_ref(&n));
                true
            }
            None => false,
        }
    }

    /// Record a node's region and zone.
    ///
    /// Returns the number of pods whose locality changed.
    pub fn upsert_node(&self, name: &str, region: &str, zone: &str) -> usize {
        self.set_node_locality(name, locality_string(region, zone))
    }

    fn set_node_locality(&self, name: &str, locality: String) -> usize {
        let _writer = self.write_lock.lock();
        let updated = {
            let mut state = self.state.write();
            // a node seen for the first time with no labels still gets an entry
            if state.node_localities.get(name) == Some(&locality) {
                None
            } else {
                state
                    .node_localities
                    .insert(name.to_string(), locality.clone());
                Some(state.propagate(name, &locality))
            }
        };

        match updated {
            Some(notifications) => {
                self.stats.record_propagation();
                debug!(node = name, %locality, pods = notifications.len(), "node locality changed");
                self.dispatch(&notifications);
                notifications.len()
            }
            None => {
                self.stats.record_noop();
                0
            }
        }
    }

    /// Forget a node; its pods get an empty locality.
    ///
    /// Returns the number of pods whose locality changed.
    pub fn remove_node(&self, name: &str) -> usize {
        let _writer = self.write_lock.lock();
        let updated = {
            let mut state = self.state.write();
            state
                .node_localities
                .remove(name)
                .map(|_| state.propagate(name, ""))
        };

        match updated {
            Some(notifications) => {
                self.stats.record_propagation();
                debug!(node = name, pods = notifications.len(), "node removed");
                self.dispatch(&notifications);
                notifications.len()
            }
            None => 0,
        }
    }

    /// Set `locality` on `node` and on every pod bound to it.
    ///
    /// The node index is updated too, so pods added later inherit the same
    /// locality. Emits one update per pod whose locality actually changed and
    /// returns that count.
    pub fn propagate_locality(&self, node: &str, locality: &str) -> usize {
        self.set_node_locality(node, locality.to_string())
    }

    /// Pod stored at `ip`.
    pub fn lookup_by_ip(&self, ip: IpAddr) -> Option<PodRecord> {
        self.state.read().pods.get(&ip).cloned()
    }

    /// Pods bound to `node`, ordered by IP.
    pub fn pods_on_node(&self, node: &str) -> Vec<PodRecord> {
        let state = self.state.read();
        state
            .pods_by_node
            .get(node)
            .map(|ips| ips.iter().filter_map(|ip| state.pods.get(ip).cloned()).collect())
            .unwrap_or_default()
    }

    /// Pods in `namespace` whose labels satisfy `selector`, ordered by IP.
    ///
    /// An empty selector matches nothing.
    pub fn pods_matching(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Vec<PodRecord> {
        if selector.is_empty() {
            return Vec::new();
        }
        let state = self.state.read();
        let mut pods: Vec<PodRecord> = state
            .pods
            .values()
            .filter(|p| p.namespace() == namespace && p.matches(selector))
            .cloned()
            .collect();
        pods.sort_by_key(|p| p.ip);
        pods
    }

    /// Stored locality of a node.
    pub fn node_locality(&self, node: &str) -> Option<String> {
        self.state.read().node_localities.get(node).cloned()
    }

    /// Number of stored pods.
    pub fn len(&self) -> usize {
        self.state.read().pods.len()
    }

    /// Whether no pods are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatch(&self, notifications: &[PodNotification]) {
        if notifications.is_empty() {
            return;
        }
        for n in notifications {
            match n.kind {
                NotificationKind::Added => self.stats.record_added(),
                NotificationKind::Updated => self.stats.record_updated(),
                NotificationKind::Deleted => self.stats.record_deleted(),
            }
        }

        let listeners: Vec<Arc<dyn PodListener>> = self.listeners.read().clone();
        for n in notifications {
            trace!(ip = %n.pod.ip, kind = ?n.kind, "pod notification");
            for listener in &listeners {
                n.deliver(listener.as_ref());
            }
        }
    }
}
