//! End-to-end pushes: topology events in, discovery responses out.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use meshpilot::compiler::EndpointAssignment;
use meshpilot::prelude::*;
use meshpilot::types::{DiscoveryRequest, DiscoveryResponse};
use meshpilot_integration_tests::{decode, discovery_request, node_event, pod_event, sidecar_id, AdsClient};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint as ChannelEndpoint};

const API: &str = "api.default.svc.cluster.local";

fn api_cluster() -> String {
    format!("outbound|8080||{API}")
}

fn server() -> PilotServer {
    let catalog = Arc::new(ServiceCatalog::new());
    catalog.upsert(
        Service::new(API, "default")
            .with_selector("app", "api")
            .with_port(Port::new("http", 8080, Protocol::Http)),
    );
    PilotServerBuilder::new()
        .catalog(catalog)
        .idle_timeout(None)
        .build()
        .unwrap()
}

fn assignment(response: &DiscoveryResponse) -> EndpointAssignment {
    assert_eq!(response.resources.len(), 1);
    decode(&response.resources[0])
}

#[tokio::test]
async fn locality_follows_node_lifecycle() {
    let server = server();
    let node_id = sidecar_id("10.1.0.1", "default");
    let mut client = AdsClient::connect(server.ads(), node_id.clone());

    let mut subscribe = discovery_request(&node_id, TypeUrl::ENDPOINT, "", "");
    subscribe.resource_names = vec![api_cluster()];
    client.send(subscribe).await;

    let empty = client.recv().await;
    assert!(assignment(&empty).endpoints.is_empty());
    client.ack(&empty).await;

    server
        .topology()
        .handle(node_event(EventKind::Added, "n1", "us-east", "1a"))
        .unwrap();
    server
        .topology()
        .handle(pod_event(EventKind::Added, "default", "api-0", "10.0.0.5", "n1", &[("app", "api")]))
        .unwrap();

    let placed = client.recv().await;
    let placed_assignment = assignment(&placed);
    assert_eq!(placed_assignment.cluster_name, api_cluster());
    assert_eq!(placed_assignment.endpoints.len(), 1);
    assert_eq!(placed_assignment.endpoints[0].locality, "us-east/1a");
    assert_eq!(placed_assignment.endpoints[0].lb_endpoints[0].address, "10.0.0.5");
    assert_eq!(placed_assignment.endpoints[0].lb_endpoints[0].port, 8080);
    client.ack(&placed).await;

    server
        .topology()
        .handle(node_event(EventKind::Deleted, "n1", "", ""))
        .unwrap();

    let orphaned = client.recv().await;
    assert_ne!(orphaned.version_info, placed.version_info);
    assert_eq!(assignment(&orphaned).endpoints[0].locality, "");
    client.ack(&orphaned).await;
    client.assert_silent().await;
}

#[tokio::test]
async fn pods_outside_the_selector_do_not_push() {
    let server = server();
    let node_id = sidecar_id("10.1.0.1", "default");
    let mut client = AdsClient::connect(server.ads(), node_id);

    client.subscribe(TypeUrl::ENDPOINT).await;
    let first = client.recv().await;
    client.ack(&first).await;

    server
        .topology()
        .handle(pod_event(EventKind::Added, "default", "db-0", "10.0.0.9", "n1", &[("app", "db")]))
        .unwrap();
    client.assert_silent().await;
}

#[tokio::test]
async fn new_service_reaches_cluster_subscribers() {
    let server = server();
    let node_id = sidecar_id("10.1.0.1", "default");
    let mut client = AdsClient::connect(server.ads(), node_id);

    client.subscribe(TypeUrl::CLUSTER).await;
    let first = client.recv().await;
    client.ack(&first).await;

    let notified = server.registry().upsert_service(
        Service::new("web.default.svc.cluster.local", "default")
            .with_port(Port::new("http", 80, Protocol::Http)),
    );
    assert_eq!(notified, 1);

    let second = client.recv().await;
    assert_eq!(second.resources.len(), first.resources.len() + 1);
    let clusters: Vec<ClusterDefinition> = second.resources.iter().map(decode).collect();
    assert!(clusters
        .iter()
        .any(|c| c.name == "outbound|80||web.default.svc.cluster.local"));
}

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn connect(addr: SocketAddr) -> Channel {
    let endpoint = ChannelEndpoint::from_shared(format!("http://{addr}")).unwrap();
    for _ in 0..50 {
        if let Ok(channel) = endpoint.connect().await {
            return channel;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server at {addr} never came up");
}

#[tokio::test]
async fn serves_ads_over_grpc() {
    let server = server();
    let addr = free_addr();
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(server.serve_with_shutdown(addr, stop_rx));

    let mut grpc = tonic::client::Grpc::new(connect(addr).await);
    grpc.ready().await.unwrap();

    let (tx, rx) = mpsc::channel::<DiscoveryRequest>(4);
    let node_id = sidecar_id("10.1.0.1", "default");
    tx.send(discovery_request(&node_id, TypeUrl::CLUSTER, "", ""))
        .await
        .unwrap();

    let path = PathAndQuery::from_static(
        "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources",
    );
    let codec: ProstCodec<DiscoveryRequest, DiscoveryResponse> = ProstCodec::default();
    let mut responses = grpc
        .streaming(tonic::Request::new(ReceiverStream::new(rx)), path, codec)
        .await
        .unwrap()
        .into_inner();

    let response = timeout(Duration::from_secs(2), responses.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.type_url, TypeUrl::CLUSTER);
    assert!(!response.nonce.is_empty());
    let clusters: Vec<ClusterDefinition> = response.resources.iter().map(decode).collect();
    assert!(clusters.iter().any(|c| c.name == api_cluster()));

    drop(tx);
    drop(responses);
    drop(grpc);
    stop_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
