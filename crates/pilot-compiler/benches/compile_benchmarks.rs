//! Benchmarks for the cluster compiler.
//!
//! Run with: `cargo bench --package pilot-compiler`

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pilot_compiler::{
    build_endpoint_assignment, ClusterBuilder, ClusterMode, CompileInput, DestinationRule,
    Endpoint, MeshConfig, Port, Protocol, Resolution, Service, SimpleLb, Subset, TrafficPolicy,
};
use pilot_core::encode_all;

fn endpoints(n: usize) -> Vec<Endpoint> {
    (0..n)
        .map(|i| {
            Endpoint::new(format!("10.{}.{}.{}", i >> 16 & 0xff, i >> 8 & 0xff, i & 0xff), 8080)
                .with_label("version", format!("v{}", i % 4))
                .with_locality(format!("region/zone-{}", i % 3))
        })
        .collect()
}

fn rule(subsets: usize) -> DestinationRule {
    let mut rule = DestinationRule::new("svc.default.svc.cluster.local", "svc", "default")
        .with_policy(TrafficPolicy::default().with_load_balancer(SimpleLb::LeastRequest));
    for i in 0..subsets {
        rule = rule.with_subset(Subset::new(format!("v{i}")).with_label("version", format!("v{i}")));
    }
    rule
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let builder = ClusterBuilder::new(MeshConfig::default());

    for resolution in [Resolution::ClientSideLb, Resolution::Static] {
        for num_endpoints in [10, 1_000] {
            let svc = Service::new("svc.default.svc.cluster.local", "default")
                .with_resolution(resolution)
                .with_port(Port::new("http", 80, Protocol::Http));
            let rule = rule(4);
            let eps = endpoints(num_endpoints);

            group.throughput(Throughput::Elements(num_endpoints as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{resolution:?}"), num_endpoints),
                &eps,
                |b, eps| {
                    b.iter(|| {
                        let compiled = builder.compile(&CompileInput {
                            service: &svc,
                            port: &svc.ports[0],
                            destination_rule: Some(&rule),
                            endpoints: eps,
                            mode: ClusterMode::Default,
                        });
                        black_box(compiled)
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("endpoint_assignment");

    for num_endpoints in [100, 10_000] {
        let eps = endpoints(num_endpoints);
        let selector: BTreeMap<String, String> = [("version".to_string(), "v1".to_string())].into_iter().collect();

        group.throughput(Throughput::Elements(num_endpoints as u64));
        group.bench_with_input(BenchmarkId::from_parameter(num_endpoints), &eps, |b, eps| {
            b.iter(|| black_box(build_endpoint_assignment("outbound|80|v1|svc", eps, &selector)))
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let builder = ClusterBuilder::new(MeshConfig::default());
    let services: Vec<Service> = (0..100)
        .map(|i| {
            Service::new(format!("svc-{i}.default.svc.cluster.local"), "default")
                .with_port(Port::new("http", 80, Protocol::Http))
        })
        .collect();
    let clusters: Vec<_> = services
        .iter()
        .flat_map(|svc| {
            builder
                .compile(&CompileInput {
                    service: svc,
                    port: &svc.ports[0],
                    destination_rule: None,
                    endpoints: &[],
                    mode: ClusterMode::Default,
                })
                .clusters
        })
        .collect();

    c.bench_function("encode_100_clusters", |b| {
        b.iter(|| black_box(encode_all(clusters.iter())))
    });
}

criterion_group!(benches, bench_compile, bench_assignment, bench_encode);
criterion_main!(benches);
