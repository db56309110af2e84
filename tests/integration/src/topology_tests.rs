//! Topology cache scenarios.

use std::sync::Arc;

use meshpilot::prelude::*;
use meshpilot::topology::{ChannelListener, NotificationKind, PodNotification};
use meshpilot_integration_tests::{node_event, pod_event};
use tokio::sync::mpsc;

fn drain(rx: &mut mpsc::Receiver<PodNotification>) -> Vec<PodNotification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

fn cache_with_listener() -> (TopologyCache, mpsc::Receiver<PodNotification>) {
    let cache = TopologyCache::new();
    let (listener, rx) = ChannelListener::new(64);
    cache.subscribe(Arc::new(listener));
    (cache, rx)
}

#[test]
fn pod_on_labelled_node_gets_locality_and_loses_it_with_node() {
    let (cache, mut rx) = cache_with_listener();

    cache
        .handle(node_event(EventKind::Added, "n1", "us-east", "1a"))
        .unwrap();
    cache
        .handle(pod_event(EventKind::Added, "default", "web", "10.0.0.5", "n1", &[("app", "web")]))
        .unwrap();

    let added = drain(&mut rx);
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].kind, NotificationKind::Added);
    assert_eq!(added[0].pod.locality, "us-east/1a");

    cache
        .handle(node_event(EventKind::Deleted, "n1", "", ""))
        .unwrap();

    let updated = drain(&mut rx);
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].kind, NotificationKind::Updated);
    assert_eq!(updated[0].pod.locality, "");
    assert_eq!(
        cache.lookup_by_ip("10.0.0.5".parse().unwrap()).unwrap().locality,
        ""
    );
}

#[test]
fn repeated_add_is_idempotent() {
    let (cache, mut rx) = cache_with_listener();
    for _ in 0..3 {
        cache
            .handle(pod_event(EventKind::Added, "default", "web", "10.0.0.5", "n1", &[]))
            .unwrap();
    }
    assert_eq!(drain(&mut rx).len(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn node_arriving_late_updates_every_bound_pod() {
    let (cache, mut rx) = cache_with_listener();
    for i in 1..=3 {
        cache
            .handle(pod_event(
                EventKind::Added,
                "default",
                &format!("web-{i}"),
                &format!("10.0.0.{i}"),
                "n1",
                &[],
            ))
            .unwrap();
    }
    cache
        .handle(pod_event(EventKind::Added, "default", "other", "10.0.1.1", "n2", &[]))
        .unwrap();
    drain(&mut rx);

    cache
        .handle(node_event(EventKind::Added, "n1", "eu-west", "b"))
        .unwrap();
    let updates = drain(&mut rx);
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|n| n.pod.locality == "eu-west/b"));

    // same labels again
    cache
        .handle(node_event(EventKind::Updated, "n1", "eu-west", "b"))
        .unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn selector_queries() {
    let cache = TopologyCache::new();
    cache
        .handle(pod_event(EventKind::Added, "default", "a", "10.0.0.1", "n1", &[("app", "web"), ("version", "v1")]))
        .unwrap();
    cache
        .handle(pod_event(EventKind::Added, "default", "b", "10.0.0.2", "n1", &[("app", "web"), ("version", "v2")]))
        .unwrap();
    cache
        .handle(pod_event(EventKind::Added, "other", "c", "10.0.0.3", "n1", &[("app", "web")]))
        .unwrap();

    let selector = [("app".to_string(), "web".to_string())].into_iter().collect();
    assert_eq!(cache.pods_matching("default", &selector).len(), 2);
    assert_eq!(cache.pods_on_node("n1").len(), 3);

    cache
        .handle(pod_event(EventKind::Deleted, "default", "a", "10.0.0.1", "n1", &[]))
        .unwrap();
    assert_eq!(cache.pods_matching("default", &selector).len(), 1);
}
