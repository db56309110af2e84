//! Shared fixtures for the meshpilot integration tests.

use std::time::Duration;

use futures::StreamExt;
use meshpilot::prelude::*;
use meshpilot::server::services::AdsResponseStream;
use meshpilot::topology::{LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_ZONE};
use meshpilot::types::{Any, DiscoveryRequest, DiscoveryResponse, Node};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

/// Node event carrying region and zone labels.
pub fn node_event(kind: EventKind, name: &str, region: &str, zone: &str) -> TopologyEvent {
    TopologyEvent::Node(
        NodeEvent::new(kind, name)
            .with_label(LABEL_TOPOLOGY_REGION, region)
            .with_label(LABEL_TOPOLOGY_ZONE, zone),
    )
}

/// Event for a running pod.
pub fn pod_event(
    kind: EventKind,
    namespace: &str,
    name: &str,
    ip: &str,
    node: &str,
    labels: &[(&str, &str)],
) -> TopologyEvent {
    let mut info = PodInfo::running(
        PodName::new(namespace, name),
        ip.parse().expect("pod ip"),
        node,
    );
    for (k, v) in labels {
        info = info.with_label(*k, *v);
    }
    TopologyEvent::Pod(PodEvent::new(kind, info))
}

/// Sidecar node id for a proxy at `ip` in `namespace`.
pub fn sidecar_id(ip: &str, namespace: &str) -> String {
    format!("sidecar~{ip}~client.{namespace}~{namespace}.svc.cluster.local")
}

/// A discovery request from `node_id`.
pub fn discovery_request(node_id: &str, type_url: &str, version: &str, nonce: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: version.to_string(),
        node: Some(Node {
            id: node_id.to_string(),
            ..Default::default()
        }),
        type_url: type_url.to_string(),
        response_nonce: nonce.to_string(),
        ..Default::default()
    }
}

/// Decode a resource payload.
pub fn decode<T: DeserializeOwned>(any: &Any) -> T {
    serde_json::from_slice(&any.value).expect("resource payload")
}

/// In-process ADS client on top of [`AdsService::serve_stream`].
pub struct AdsClient {
    node_id: String,
    requests: mpsc::Sender<Result<DiscoveryRequest, Status>>,
    responses: AdsResponseStream,
}

impl AdsClient {
    /// Open a stream for `node_id`.
    pub fn connect(ads: &AdsService, node_id: impl Into<String>) -> Self {
        let (requests, rx) = mpsc::channel(16);
        Self {
            node_id: node_id.into(),
            requests,
            responses: ads.serve_stream(ReceiverStream::new(rx)),
        }
    }

    /// Subscribe to `type_url`.
    pub async fn subscribe(&self, type_url: &str) {
        self.send(discovery_request(&self.node_id, type_url, "", ""))
            .await;
    }

    /// Acknowledge a response.
    pub async fn ack(&self, response: &DiscoveryResponse) {
        self.send(discovery_request(
            &self.node_id,
            &response.type_url,
            &response.version_info,
            &response.nonce,
        ))
        .await;
    }

    /// Send a raw request.
    pub async fn send(&self, request: DiscoveryRequest) {
        self.requests
            .send(Ok(request))
            .await
            .expect("stream task alive");
    }

    /// Next response, failing after two seconds.
    pub async fn recv(&mut self) -> DiscoveryResponse {
        timeout(Duration::from_secs(2), self.responses.next())
            .await
            .expect("no response in time")
            .expect("stream ended")
            .expect("error response")
    }

    /// Assert nothing arrives for a short while.
    pub async fn assert_silent(&mut self) {
        let next = timeout(Duration::from_millis(150), self.responses.next()).await;
        assert!(next.is_err(), "unexpected message: {next:?}");
    }
}
