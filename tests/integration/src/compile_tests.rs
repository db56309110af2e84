//! Cluster compilation scenarios.

use std::sync::Arc;
use std::time::Duration;

use meshpilot::compiler::{
    DiagnosticKind, DiscoveryType, ExportScope, LbPolicy, SimpleLb, TrafficPolicy,
};
use meshpilot::prelude::*;
use meshpilot::server::ProxyInfo;
use meshpilot::types::Node;
use meshpilot_integration_tests::{pod_event, sidecar_id};

fn rule_policy() -> TrafficPolicy {
    TrafficPolicy::default()
        .with_load_balancer(SimpleLb::LeastRequest)
        .with_connect_timeout(Duration::from_secs(3))
}

fn svc() -> Service {
    Service::new("svc", "default").with_port(Port::new("http", 80, Protocol::Http))
}

fn compile(builder: &ClusterBuilder, service: &Service, rule: Option<&DestinationRule>, endpoints: &[Endpoint]) -> Compiled {
    builder.compile(&CompileInput {
        service,
        port: &service.ports[0],
        destination_rule: rule,
        endpoints,
        mode: ClusterMode::Default,
    })
}

#[test]
fn subset_policy_overrides_rule_policy_for_that_subset_only() {
    let builder = ClusterBuilder::new(MeshConfig::default());
    let service = svc();
    let canary_policy = TrafficPolicy::default().with_load_balancer(SimpleLb::Random);
    let rule = DestinationRule::new("svc", "svc-dr", "default")
        .with_policy(rule_policy())
        .with_subset(Subset::new("v1").with_label("version", "v1"))
        .with_subset(
            Subset::new("canary")
                .with_label("track", "canary")
                .with_policy(canary_policy.clone()),
        );

    let compiled = compile(&builder, &service, Some(&rule), &[]);

    let names: Vec<_> = compiled.names().collect();
    assert_eq!(
        names,
        ["outbound|80||svc", "outbound|80|v1|svc", "outbound|80|canary|svc"]
    );

    for name in ["outbound|80||svc", "outbound|80|v1|svc"] {
        let cluster = compiled.cluster(name).unwrap();
        assert_eq!(cluster.traffic_policy, rule_policy());
        assert_eq!(cluster.lb_policy, LbPolicy::LeastRequest);
        assert_eq!(cluster.connect_timeout, Duration::from_secs(3));
    }

    let canary = compiled.cluster("outbound|80|canary|svc").unwrap();
    assert_eq!(canary.traffic_policy, canary_policy);
    assert_eq!(canary.lb_policy, LbPolicy::Random);
    // no field merging with the rule policy
    assert_eq!(canary.connect_timeout, MeshConfig::default().connect_timeout);
    assert!(compiled.diagnostics.is_empty());
}

#[test]
fn subset_without_labels_is_reported_and_skipped() {
    let builder = ClusterBuilder::new(MeshConfig::default());
    let service = svc();
    let rule = DestinationRule::new("svc", "svc-dr", "default")
        .with_subset(Subset::new("all"))
        .with_subset(Subset::new("v1").with_label("version", "v1"));

    let compiled = compile(&builder, &service, Some(&rule), &[]);
    let names: Vec<_> = compiled.names().collect();
    assert_eq!(names, ["outbound|80||svc", "outbound|80|v1|svc"]);
    assert_eq!(compiled.diagnostics.len(), 1);
    assert_eq!(compiled.diagnostics[0].kind, DiagnosticKind::EmptySubsetSelector);
}

#[test]
fn compile_is_deterministic_across_builders() {
    let service = svc().with_selector("app", "svc");
    let rule = DestinationRule::new("svc", "svc-dr", "default")
        .with_policy(rule_policy())
        .with_subset(Subset::new("v2").with_label("version", "v2"))
        .with_subset(Subset::new("v1").with_label("version", "v1"));

    let a = compile(&ClusterBuilder::new(MeshConfig::default()), &service, Some(&rule), &[]);
    let b = compile(&ClusterBuilder::new(MeshConfig::default()), &service, Some(&rule), &[]);
    assert_eq!(a, b);
}

#[test]
fn static_service_without_endpoints_is_skipped() {
    let builder = ClusterBuilder::new(MeshConfig::default());
    let service = svc().with_resolution(Resolution::Static);

    let compiled = compile(&builder, &service, None, &[]);
    assert!(compiled.clusters.is_empty());
    assert_eq!(compiled.diagnostics.len(), 1);
    assert_eq!(compiled.diagnostics[0].kind, DiagnosticKind::NoEndpoints);

    let compiled = compile(&builder, &service, None, &[Endpoint::new("10.1.1.1", 80)]);
    assert_eq!(compiled.clusters.len(), 1);
    assert_eq!(compiled.clusters[0].discovery_type, DiscoveryType::Static);
}

#[test]
fn generator_respects_visibility_and_pod_locality() {
    let topology = Arc::new(TopologyCache::new());
    topology.upsert_node("n1", "us-east", "1a");
    topology
        .handle(pod_event(EventKind::Added, "team-a", "api-0", "10.0.0.5", "n1", &[("app", "api")]))
        .unwrap();

    let catalog = Arc::new(ServiceCatalog::new());
    catalog.upsert(
        Service::new("api.team-a.svc.cluster.local", "team-a")
            .with_selector("app", "api")
            .with_port(Port::new("http", 8080, Protocol::Http))
            .with_export(ExportScope::Private),
    );

    let generator = MeshGenerator::new(
        topology,
        catalog,
        Arc::new(InMemoryPolicySource::new()),
        ClusterBuilder::new(MeshConfig::default()),
    );

    let proxy = |ns: &str| {
        ProxyInfo::from_node(&Node {
            id: sidecar_id("10.9.0.1", ns),
            ..Default::default()
        })
        .unwrap()
    };

    let same_ns = generator.compile_for(&proxy("team-a"));
    assert!(same_ns
        .clusters
        .iter()
        .any(|c| c.name == "outbound|8080||api.team-a.svc.cluster.local"));
    assert_eq!(same_ns.assignments.len(), 1);
    assert_eq!(same_ns.assignments[0].endpoints[0].locality, "us-east/1a");
    assert_eq!(same_ns.assignments[0].endpoints[0].lb_endpoints[0].address, "10.0.0.5");

    let other_ns = generator.compile_for(&proxy("team-b"));
    assert!(other_ns.assignments.is_empty());
    assert!(!other_ns.clusters.iter().any(|c| c.name.contains("api.team-a")));
}
