//! Where services and destination rules come from.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::model::Service;
use crate::policy::DestinationRule;

/// Errors returned by a [`PolicySource`].
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The backing store could not be read.
    #[error("policy source unavailable: {0}")]
    Unavailable(String),

    /// A rule was rejected.
    #[error("invalid destination rule for {host}: {reason}")]
    Invalid {
        /// Host the rule applies to.
        host: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Resolves the destination rule that applies to a service.
pub trait PolicySource: Send + Sync {
    /// Rule for `service`, if any.
    fn destination_rule(&self, service: &Service) -> Result<Option<DestinationRule>, PolicyError>;
}

impl<T: PolicySource + ?Sized> PolicySource for Arc<T> {
    fn destination_rule(&self, service: &Service) -> Result<Option<DestinationRule>, PolicyError> {
        (**self).destination_rule(service)
    }
}

/// Destination rules kept in memory, keyed by host.
#[derive(Debug, Default)]
pub struct InMemoryPolicySource {
    rules: RwLock<BTreeMap<String, DestinationRule>>,
}

impl InMemoryPolicySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the rule for its host.
    ///
    /// Returns the previous rule. Rules with duplicate subset names are rejected.
    pub fn insert(&self, rule: DestinationRule) -> Result<Option<DestinationRule>, PolicyError> {
        if let Some(name) = rule.duplicate_subset() {
            return Err(PolicyError::Invalid {
                host: rule.host.clone(),
                reason: format!("duplicate subset {name}"),
            });
        }
        Ok(self.rules.write().insert(rule.host.clone(), rule))
    }

    /// Remove the rule for `host`.
    pub fn remove(&self, host: &str) -> Option<DestinationRule> {
        self.rules.write().remove(host)
    }

    /// Rule for `host`.
    pub fn get(&self, host: &str) -> Option<DestinationRule> {
        self.rules.read().get(host).cloned()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl PolicySource for InMemoryPolicySource {
    fn destination_rule(&self, service: &Service) -> Result<Option<DestinationRule>, PolicyError> {
        Ok(self.get(&service.hostname))
    }
}

/// The services known to the control plane, ordered by host.
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    services: RwLock<BTreeMap<String, Arc<Service>>>,
}

impl ServiceCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a service. Returns whether anything changed.
    pub fn upsert(&self, service: Service) -> bool {
        let mut services = self.services.write();
        if services.get(&service.hostname).is_some_and(|s| **s == service) {
            return false;
        }
        services.insert(service.hostname.clone(), Arc::new(service));
        true
    }

    /// Remove a service by host.
    pub fn remove(&self, host: &str) -> Option<Arc<Service>> {
        self.services.write().remove(host)
    }

    /// Service by host.
    pub fn get(&self, host: &str) -> Option<Arc<Service>> {
        self.services.read().get(host).cloned()
    }

    /// All services in host order.
    pub fn list(&self) -> Vec<Arc<Service>> {
        self.services.read().values().cloned().collect()
    }

    /// Services visible from `namespace`, in host order.
    pub fn visible_from(&self, namespace: &str) -> Vec<Arc<Service>> {
        self.services
            .read()
            .values()
            .filter(|s| s.is_visible_from(namespace))
            .cloned()
            .collect()
    }

    /// Services whose selector matches a pod with `labels` in `namespace`.
    pub fn services_selecting(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Vec<Arc<Service>> {
        self.services
            .read()
            .values()
            .filter(|s| s.selects(namespace, labels))
            .cloned()
            .collect()
    }

    /// Number of services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
