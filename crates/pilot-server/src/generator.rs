//! Resource generation for a connected proxy.

use std::sync::Arc;

use pilot_compiler::{
    build_endpoint_assignment, ClusterBuilder, ClusterDefinition, ClusterMode, CompileInput,
    Diagnostic, DiagnosticKind, DiscoveryType, Endpoint, EndpointAssignment, PolicySource,
    Resolution, Service, ServiceCatalog,
};
use pilot_core::{encode_all, EncodedResources, PilotError, PilotResult, ResourceKind, TypeUrl};
use pilot_topology::TopologyCache;
use tracing::{debug, warn};

use crate::proxy::ProxyInfo;

/// Produces the resources of one type for one proxy.
///
/// Called from a blocking worker; implementations must not block on async
/// work.
pub trait ConfigGenerator: Send + Sync + 'static {
    /// Generate resources of `type_url` for `proxy`.
    ///
    /// `resource_names` filters named resource types; empty means everything.
    fn generate(
        &self,
        proxy: &ProxyInfo,
        type_url: &TypeUrl,
        resource_names: &[String],
    ) -> PilotResult<EncodedResources>;
}

/// Clusters and endpoint assignments compiled for one proxy.
#[derive(Debug, Default)]
pub struct MeshConfigOutput {
    /// Clusters, service clusters in host order followed by synthetic ones.
    pub clusters: Vec<ClusterDefinition>,
    /// Endpoint assignments for EDS clusters.
    pub assignments: Vec<EndpointAssignment>,
    /// Everything that was skipped.
    pub diagnostics: Vec<Diagnostic>,
}

/// Generator over the topology cache, service catalog and policy source.
pub struct MeshGenerator {
    topology: Arc<TopologyCache>,
    catalog: Arc<ServiceCatalog>,
    policies: Arc<dyn PolicySource>,
    builder: ClusterBuilder,
    mode: ClusterMode,
}

impl MeshGenerator {
    /// Create a generator.
    pub fn new(
        topology: Arc<TopologyCache>,
        catalog: Arc<ServiceCatalog>,
        policies: Arc<dyn PolicySource>,
        builder: ClusterBuilder,
    ) -> Self {
        Self {
            topology,
            catalog,
            policies,
            builder,
            mode: ClusterMode::Default,
        }
    }

    /// Use a different cluster naming scheme.
    #[must_use]
    pub fn with_mode(mut self, mode: ClusterMode) -> Self {
        self.mode = mode;
        self
    }

    /// The cluster builder.
    #[inline]
    pub fn builder(&self) -> &ClusterBuilder {
        &self.builder
    }

    /// Compile everything visible to `proxy`.
    ///
    /// A service whose policy lookup fails is skipped with a diagnostic; the
    /// other services are still compiled.
    pub fn compile_for(&self, proxy: &ProxyInfo) -> MeshConfigOutput {
        let mut out = MeshConfigOutput::default();

        for service in self.catalog.visible_from(&proxy.namespace) {
            let rule = match self.policies.destination_rule(&service) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(service = %service.hostname, error = %e, "policy lookup failed, skipping service");
                    out.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::PolicyLookupFailed,
                        &service.hostname,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            for port in &service.ports {
                let endpoints = self.endpoints_for(&service, port.endpoint_port());
                let compiled = self.builder.compile(&CompileInput {
                    service: &service,
                    port,
                    destination_rule: rule.as_ref(),
                    endpoints: &endpoints,
                    mode: self.mode,
                });

                for cluster in &compiled.clusters {
                    if cluster.discovery_type != DiscoveryType::Eds {
                        continue;
                    }
                    let selector = cluster
                        .metadata
                        .subset
                        .as_deref()
                        .and_then(|name| rule.as_ref()?.subsets.iter().find(|s| s.name == name))
                        .map(|s| s.labels.clone())
                        .unwrap_or_default();
                    out.assignments
                        .push(build_endpoint_assignment(&cluster.name, &endpoints, &selector));
                }
                out.clusters.extend(compiled.clusters);
                out.diagnostics.extend(compiled.diagnostics);
            }
        }

        out.clusters
            .extend(self.builder.synthetic_clusters(proxy.ip_families()));

        debug!(
            proxy = %proxy,
            clusters = out.clusters.len(),
            assignments = out.assignments.len(),
            diagnostics = out.diagnostics.len(),
            "compiled mesh configuration"
        );
        out
    }

    /// Endpoints of a service on the given target port.
    fn endpoints_for(&self, service: &Service, target_port: u16) -> Vec<Endpoint> {
        match service.resolution {
            Resolution::ClientSideLb => self
                .topology
                .pods_matching(&service.namespace, &service.selector)
                .into_iter()
                .map(|pod| {
                    let mut endpoint =
                        Endpoint::new(pod.ip.to_string(), target_port).with_locality(pod.locality);
                    endpoint.labels = pod.labels;
                    endpoint
                })
                .collect(),
            Resolution::Static | Resolution::Dns => service.endpoints.clone(),
            Resolution::Passthrough => Vec::new(),
        }
    }
}

impl std::fmt::Debug for MeshGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshGenerator")
            .field("services", &self.catalog.len())
            .field("pods", &self.topology.len())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl ConfigGenerator for MeshGenerator {
    fn generate(
        &self,
        proxy: &ProxyInfo,
        type_url: &TypeUrl,
        resource_names: &[String],
    ) -> PilotResult<EncodedResources> {
        let requested = |name: &str| resource_names.is_empty() || resource_names.iter().any(|n| n == name);

        match type_url.kind() {
            ResourceKind::Cluster => {
                let output = self.compile_for(proxy);
                encode_all(output.clusters.iter())
            }
            ResourceKind::Endpoint => {
                let output = self.compile_for(proxy);
                encode_all(
                    output
                        .assignments
                        .iter()
                        .filter(|a| requested(&a.cluster_name)),
                )
            }
            _ => Err(PilotError::UnsupportedType {
                type_url: type_url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_compiler::{
        DestinationRule, InMemoryPolicySource, MeshConfig, PolicyError, Port, Protocol, Subset,
        BLACKHOLE_CLUSTER, PASSTHROUGH_CLUSTER,
    };
    use pilot_topology::{EventKind, PodEvent, PodInfo, PodName, TopologyEvent};
    use pilot_types::Node;

    fn proxy(namespace: &str) -> ProxyInfo {
        ProxyInfo::from_node(&Node {
            id: format!("sidecar~10.9.9.9~client.{namespace}~cluster.local"),
            ..Default::default()
        })
        .unwrap()
    }

    fn setup() -> (Arc<TopologyCache>, Arc<ServiceCatalog>, Arc<InMemoryPolicySource>) {
        let topology = Arc::new(TopologyCache::new());
        topology.upsert_node("n1", "us-east", "1a");
        for (i, version) in ["v1", "v2"].iter().enumerate() {
            let info = PodInfo::running(
                PodName::new("default", format!("reviews-{version}")),
                format!("10.0.0.{}", i + 1).parse().unwrap(),
                "n1",
            )
            .with_label("app", "reviews")
            .with_label("version", *version);
            topology
                .handle(TopologyEvent::Pod(PodEvent::new(EventKind::Added, info)))
                .unwrap();
        }

        let catalog = Arc::new(ServiceCatalog::new());
        catalog.upsert(
            Service::new("reviews.default.svc.cluster.local", "default")
                .with_selector("app", "reviews")
                .with_port(Port::new("http", 9080, Protocol::Http)),
        );

        let policies = Arc::new(InMemoryPolicySource::new());
        policies
            .insert(
                DestinationRule::new("reviews.default.svc.cluster.local", "reviews", "default")
                    .with_subset(Subset::new("v1").with_label("version", "v1")),
            )
            .unwrap();
        (topology, catalog, policies)
    }

    fn generator(
        topology: Arc<TopologyCache>,
        catalog: Arc<ServiceCatalog>,
        policies: Arc<dyn PolicySource>,
    ) -> MeshGenerator {
        MeshGenerator::new(topology, catalog, policies, ClusterBuilder::new(MeshConfig::default()))
    }

    #[test]
    fn clusters_for_proxy() {
        let (topology, catalog, policies) = setup();
        let generator = generator(topology, catalog, policies);

        let out = generator.compile_for(&proxy("default"));
        let names: Vec<_> = out.clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "outbound|9080||reviews.default.svc.cluster.local",
                "outbound|9080|v1|reviews.default.svc.cluster.local",
                BLACKHOLE_CLUSTER,
                PASSTHROUGH_CLUSTER,
                "InboundPassthroughClusterIpv4",
            ]
        );

        assert_eq!(out.assignments.len(), 2);
        assert_eq!(out.assignments[0].endpoint_count(), 2);
        assert_eq!(out.assignments[1].endpoint_count(), 1);
        assert_eq!(out.assignments[0].endpoints[0].locality, "us-east/1a");
    }

    #[test]
    fn endpoints_filtered_by_name() {
        let (topology, catalog, policies) = setup();
        let generator = generator(topology, catalog, policies);
        let wanted = vec!["outbound|9080|v1|reviews.default.svc.cluster.local".to_string()];

        let encoded = generator
            .generate(&proxy("default"), &TypeUrl::endpoint(), &wanted)
            .unwrap();
        assert_eq!(encoded.names, wanted);
    }

    #[test]
    fn generation_is_stable() {
        let (topology, catalog, policies) = setup();
        let generator = generator(topology, catalog, policies);
        let p = proxy("default");

        let a = generator.generate(&p, &TypeUrl::cluster(), &[]).unwrap();
        let b = generator.generate(&p, &TypeUrl::cluster(), &[]).unwrap();
        assert_eq!(a.version, b.version);
        assert_eq!(a.resources, b.resources);
    }

    #[test]
    fn unsupported_type() {
        let (topology, catalog, policies) = setup();
        let generator = generator(topology, catalog, policies);
        let err = generator
            .generate(&proxy("default"), &TypeUrl::new(TypeUrl::LISTENER), &[])
            .unwrap_err();
        assert!(matches!(err, PilotError::UnsupportedType { .. }));
    }

    struct Failing;

    impl PolicySource for Failing {
        fn destination_rule(&self, service: &Service) -> Result<Option<DestinationRule>, PolicyError> {
            if service.hostname.starts_with("broken") {
                Err(PolicyError::Unavailable("store offline".into()))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn policy_failure_skips_only_that_service() {
        let (topology, catalog, _) = setup();
        catalog.upsert(
            Service::new("broken.default.svc.cluster.local", "default")
                .with_port(Port::new("http", 80, Protocol::Http)),
        );
        let generator = generator(topology, catalog, Arc::new(Failing));

        let out = generator.compile_for(&proxy("default"));
        assert!(out
            .clusters
            .iter()
            .any(|c| c.name == "outbound|9080||reviews.default.svc.cluster.local"));
        assert!(!out.clusters.iter().any(|c| c.name.contains("broken")));
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::PolicyLookupFailed);
    }
}
