//! Benchmarks for the topology cache.
//!
//! Run with: `cargo bench --package pilot-topology`

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pilot_topology::{
    EventKind, PodEvent, PodInfo, PodListener, PodName, PodRecord, TopologyCache, TopologyEvent,
};

struct Discard;

impl PodListener for Discard {
    fn on_added(&self, pod: &PodRecord) {
        black_box(pod);
    }
    fn on_updated(&self, pod: &PodRecord) {
        black_box(pod);
    }
    fn on_deleted(&self, pod: &PodRecord) {
        black_box(pod);
    }
}

fn pod_ip(i: usize) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, (i >> 16) as u8, (i >> 8) as u8, i as u8))
}

fn populated(num_pods: usize, num_nodes: usize) -> TopologyCache {
    let cache = TopologyCache::new();
    cache.subscribe(Arc::new(Discard));
    for i in 0..num_pods {
        let info = PodInfo::running(
            PodName::new("default", format!("pod-{i}")),
            pod_ip(i),
            format!("node-{}", i % num_nodes),
        )
        .with_label("app", format!("app-{}", i % 10));
        let _ = cache.handle(TopologyEvent::Pod(PodEvent::new(EventKind::Added, info)));
    }
    cache
}

fn bench_pod_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("pod_events");

    for num_pods in [100usize, 1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*num_pods as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_pods),
            num_pods,
            |b, &num_pods| {
                b.iter(|| black_box(populated(num_pods, 10)));
            },
        );
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let cache = populated(10_000, 50);
    c.bench_function("lookup_by_ip", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % 10_000;
            black_box(cache.lookup_by_ip(pod_ip(i)))
        });
    });
}

fn bench_locality_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("locality_propagation");

    for pods_per_node in [10usize, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(pods_per_node),
            pods_per_node,
            |b, &pods_per_node| {
                let cache = populated(pods_per_node * 4, 4);
                let mut flip = false;
                b.iter(|| {
                    flip = !flip;
                    let zone = if flip { "a" } else { "b" };
                    black_box(cache.upsert_node("node-0", "region", zone))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pod_events, bench_lookup, bench_locality_propagation);
criterion_main!(benches);
