//! Load tests for the topology cache and push fan-out.
//!
//! Run with: `cargo test --package meshpilot-integration-tests --test load_tests -- --nocapture`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use meshpilot::prelude::*;
use meshpilot_integration_tests::{node_event, pod_event, sidecar_id, AdsClient};
use tokio::sync::Barrier;

const NODES: usize = 50;
const PODS_PER_NODE: usize = 20;

fn pod_ip(node: usize, pod: usize) -> String {
    format!("10.{}.{}.{}", node / 250, node % 250, pod + 1)
}

/// Seed 1000 pods across 50 nodes, then move every node to a new zone.
#[tokio::test]
async fn test_1000_pods_relocated() {
    let cache = TopologyCache::new();
    for n in 0..NODES {
        cache
            .handle(node_event(EventKind::Added, &format!("node-{n}"), "us-east", "1a"))
            .unwrap();
    }

    let start = Instant::now();
    for n in 0..NODES {
        for p in 0..PODS_PER_NODE {
            cache
                .handle(pod_event(
                    EventKind::Added,
                    "default",
                    &format!("pod-{n}-{p}"),
                    &pod_ip(n, p),
                    &format!("node-{n}"),
                    &[("app", "load")],
                ))
                .unwrap();
        }
    }
    let add_duration = start.elapsed();
    println!(
        "Added {} pods in {:?} ({:.2} µs/op)",
        NODES * PODS_PER_NODE,
        add_duration,
        add_duration.as_micros() as f64 / (NODES * PODS_PER_NODE) as f64
    );
    assert_eq!(cache.len(), NODES * PODS_PER_NODE);

    let start = Instant::now();
    let mut moved = 0;
    for n in 0..NODES {
        moved += cache.upsert_node(&format!("node-{n}"), "us-east", "1b");
    }
    println!("Relocated {} pods in {:?}", moved, start.elapsed());

    assert_eq!(moved, NODES * PODS_PER_NODE);
    let selector = BTreeMap::from([("app".to_string(), "load".to_string())]);
    let pods = cache.pods_matching("default", &selector);
    assert_eq!(pods.len(), NODES * PODS_PER_NODE);
    assert!(pods.iter().all(|pod| pod.locality == "us-east/1b"));
}

/// Writers on many tasks never lose a pod.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers() {
    let cache = Arc::new(TopologyCache::new());
    cache.upsert_node("node-0", "us-east", "1a");
    let writers = 8;
    let barrier = Arc::new(Barrier::new(writers));

    let start = Instant::now();
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                for p in 0..100 {
                    cache
                        .handle(pod_event(
                            EventKind::Added,
                            "default",
                            &format!("pod-{w}-{p}"),
                            &pod_ip(w, p),
                            "node-0",
                            &[],
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    println!("{} writers finished in {:?}", writers, start.elapsed());

    assert_eq!(cache.len(), writers * 100);
    assert_eq!(cache.stats().pods_added(), (writers * 100) as u64);
}

/// One service change reaches 200 connected proxies.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_200_proxy_fan_out() {
    let server = PilotServerBuilder::new()
        .idle_timeout(None)
        .compile_concurrency(8)
        .build()
        .unwrap();
    let proxies = 200;

    let start = Instant::now();
    let mut clients = Vec::with_capacity(proxies);
    for i in 0..proxies {
        let ip = format!("10.200.{}.{}", i / 250, i % 250 + 1);
        let mut client = AdsClient::connect(server.ads(), sidecar_id(&ip, "default"));
        client.subscribe(TypeUrl::CLUSTER).await;
        let first = client.recv().await;
        client.ack(&first).await;
        clients.push(client);
    }
    println!("Connected {} proxies in {:?}", proxies, start.elapsed());
    assert_eq!(server.registry().len(), proxies);

    let start = Instant::now();
    let notified = server.registry().upsert_service(
        Service::new("fanout.default.svc.cluster.local", "default")
            .with_port(Port::new("http", 80, Protocol::Http)),
    );
    assert_eq!(notified, proxies);

    let mut versions = Vec::with_capacity(proxies);
    for client in &mut clients {
        versions.push(client.recv().await.version_info);
    }
    println!("Pushed to {} proxies in {:?}", proxies, start.elapsed());

    versions.dedup();
    assert_eq!(versions.len(), 1, "all proxies see the same cluster set");
}
