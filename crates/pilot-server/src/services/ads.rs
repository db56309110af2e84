//! Aggregated Discovery Service (ADS).
//!
//! Every resource type travels over one bidirectional stream. Each stream is
//! driven by its own task, which owns the [`PushSession`]s of that
//! connection and reacts to three inputs: requests from the proxy, push
//! requests from the [`SessionRegistry`], and the idle and shutdown timers.

use std::collections::BTreeMap;
use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use pilot_core::{EncodedResources, PilotError, PilotResult, ResourceVersion, TypeUrl};
use pilot_types::{DiscoveryRequest, DiscoveryResponse};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Context, Poll, StdError};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ServerConfig;
use crate::generator::ConfigGenerator;
use crate::metrics::PilotMetrics;
use crate::proxy::ProxyInfo;
use crate::registry::{ConnectionStatus, PushRequest, Registration, SessionRegistry};
use crate::session::{Decision, PushSession};
use crate::shutdown::ShutdownController;
use crate::stream::StreamContext;

/// Response stream of one ADS connection.
pub type AdsResponseStream = ReceiverStream<Result<DiscoveryResponse, Status>>;

/// ADS service.
#[derive(Clone)]
pub struct AdsService {
    registry: SessionRegistry,
    generator: Arc<dyn ConfigGenerator>,
    config: Arc<ServerConfig>,
    compile_permits: Arc<Semaphore>,
    metrics: PilotMetrics,
    shutdown: ShutdownController,
}

impl AdsService {
    /// Create the service.
    pub fn new(
        registry: SessionRegistry,
        generator: Arc<dyn ConfigGenerator>,
        config: Arc<ServerConfig>,
        metrics: PilotMetrics,
        shutdown: ShutdownController,
    ) -> Self {
        let compile_permits = Arc::new(Semaphore::new(config.compile_concurrency.max(1)));
        Self {
            registry,
            generator,
            config,
            compile_permits,
            metrics,
            shutdown,
        }
    }

    /// The session registry.
    #[inline]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Server configuration.
    #[inline]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Metrics handle.
    #[inline]
    pub fn metrics(&self) -> &PilotMetrics {
        &self.metrics
    }

    /// Wrap into a tonic service.
    pub fn into_server(self) -> AggregatedDiscoveryServiceServer<Self> {
        let limit = self.config.max_request_size;
        AggregatedDiscoveryServiceServer::new(self).max_decoding_message_size(limit)
    }

    /// Drive one ADS stream.
    ///
    /// Spawns the stream task and returns the response side. The task ends
    /// when the request stream ends or fails, the response side is dropped,
    /// the stream idles out, or the server shuts down. A stream is idle when
    /// nothing was sent or received for `idle_timeout` and no response is
    /// waiting for an ACK.
    pub fn serve_stream<S>(&self, requests: S) -> AdsResponseStream
    where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.response_buffer_size.max(1));
        let driver = StreamDriver {
            service: self.clone(),
            ctx: StreamContext::new(),
            tx,
            sessions: BTreeMap::new(),
            status: None,
            registration: None,
            push_rx: None,
        };
        tokio::spawn(driver.run(requests));
        ReceiverStream::new(rx)
    }

    async fn compile(
        &self,
        proxy: Arc<ProxyInfo>,
        type_url: TypeUrl,
        resource_names: Vec<String>,
    ) -> PilotResult<EncodedResources> {
        let _permit = Arc::clone(&self.compile_permits)
            .acquire_owned()
            .await
            .map_err(|_| PilotError::Shutdown)?;

        let generator = Arc::clone(&self.generator);
        let started = Instant::now();
        let t = type_url.clone();
        let result = tokio::task::spawn_blocking(move || generator.generate(&proxy, &t, &resource_names))
            .await
            .map_err(|e| PilotError::internal("compile task failed", e))?;
        self.metrics.record_compile(&type_url, started.elapsed());
        result
    }
}

impl std::fmt::Debug for AdsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsService")
            .field("connections", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// State of one stream, owned by its task.
struct StreamDriver {
    service: AdsService,
    ctx: StreamContext,
    tx: mpsc::Sender<Result<DiscoveryResponse, Status>>,
    sessions: BTreeMap<TypeUrl, PushSession>,
    status: Option<watch::Sender<ConnectionStatus>>,
    registration: Option<Registration>,
    push_rx: Option<mpsc::Receiver<PushRequest>>,
}

impl StreamDriver {
    async fn run<S>(mut self, requests: S)
    where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + 'static,
    {
        let _operation = self.service.shutdown.register_operation();
        let _tracker = self.service.metrics.track_stream();
        let mut requests = Box::pin(requests);
        let mut shutdown = Box::pin(self.service.shutdown.shutdown_signal().wait());
        let stream = self.ctx.id();
        info!(%stream, "ADS stream started");

        let outcome = loop {
            let idle = self.idle_remaining();
            tokio::select! {
                request = requests.next() => match request {
                    Some(Ok(request)) => {
                        if let Err(e) = self.on_request(request).await {
                            break Err(e);
                        }
                    }
                    Some(Err(status)) => {
                        debug!(%stream, error = %status, "request stream failed");
                        break Ok(());
                    }
                    None => break Ok(()),
                },
                Some(push) = next_push(&mut self.push_rx) => {
                    if let Err(e) = self.on_push(push).await {
                        break Err(e);
                    }
                }
                _ = sleep_or_forever(idle) => {
                    break Err(PilotError::Timeout {
                        operation: "waiting for the next request".into(),
                    });
                }
                _ = &mut shutdown => break Err(PilotError::Shutdown),
            }
        };

        if let Err(e) = outcome {
            match e {
                PilotError::StreamClosed { .. } => debug!(%stream, "response stream dropped"),
                e => {
                    warn!(%stream, error = %e, "closing ADS stream");
                    let _ = self.tx.send(Err(e.into())).await;
                }
            }
        }

        info!(
            %stream,
            node_id = self.ctx.node_id().unwrap_or(""),
            duration = ?self.ctx.duration(),
            requests = self.ctx.request_count(),
            responses = self.ctx.response_count(),
            rejections = self.ctx.rejection_count(),
            "ADS stream ended"
        );
        // sessions, registration and any in-flight compile result go with self
    }

    /// Time left before the stream idles out.
    ///
    /// The clock stops while a response waits for its ACK.
    fn idle_remaining(&self) -> Option<Duration> {
        let limit = self.service.config.idle_timeout?;
        if self.sessions.values().any(|s| s.outstanding_nonce().is_some()) {
            return None;
        }
        Some(limit.saturating_sub(self.ctx.idle_time()))
    }

    #[instrument(level = "debug", skip_all, fields(stream = %self.ctx.id(), type_url = %request.type_url))]
    async fn on_request(&mut self, request: DiscoveryRequest) -> PilotResult<()> {
        self.ctx.record_request();
        if self.ctx.proxy().is_none() {
            self.identify(&request)?;
        }

        let type_url = TypeUrl::new(request.type_url.as_str());
        if !type_url.is_valid() {
            debug!("request with invalid type URL dropped");
            return Ok(());
        }
        self.service.metrics.record_request(&type_url);

        let control_plane = &self.service.config.control_plane_id;
        let session = self
            .sessions
            .entry(type_url.clone())
            .or_insert_with(|| PushSession::new(type_url.clone()).with_control_plane(control_plane.clone()));

        let answers_outstanding = session.outstanding_nonce() == Some(request.response_nonce.as_str());
        let decision = session.handle_request(&request);
        if answers_outstanding {
            if request.is_nack() {
                self.ctx.record_rejection();
                self.service.metrics.record_nack(&type_url);
            } else {
                self.service.metrics.record_ack(&type_url);
            }
        }

        trace!(?decision, "request applied");
        if let Decision::Push { unless } = decision {
            self.push(&type_url, unless).await?;
        }
        self.publish_status();
        Ok(())
    }

    fn identify(&mut self, request: &DiscoveryRequest) -> PilotResult<()> {
        let node = request.node.as_ref().ok_or_else(|| PilotError::MissingNode {
            stream: self.ctx.id().to_string(),
        })?;
        let proxy = Arc::new(ProxyInfo::from_node(node)?);

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (registration, push_rx) =
            self.service
                .registry
                .register(self.ctx.id(), Arc::clone(&proxy), status_rx);

        debug!(stream = %self.ctx.id(), proxy = %proxy, "proxy identified");
        self.ctx.set_proxy(proxy);
        self.status = Some(status_tx);
        self.registration = Some(registration);
        self.push_rx = Some(push_rx);
        Ok(())
    }

    async fn on_push(&mut self, push: PushRequest) -> PilotResult<()> {
        trace!(stream = %self.ctx.id(), reason = ?push.reason, "push requested");
        let types: Vec<TypeUrl> = self.sessions.keys().cloned().collect();
        for type_url in types {
            let decision = match self.sessions.get_mut(&type_url) {
                Some(session) => session.on_change(),
                None => continue,
            };
            if let Decision::Push { unless } = decision {
                self.push(&type_url, unless).await?;
            }
        }
        self.publish_status();
        Ok(())
    }

    /// Compile and send one type. Errors are returned only when the stream
    /// must end.
    async fn push(&mut self, type_url: &TypeUrl, unless: Option<ResourceVersion>) -> PilotResult<()> {
        let Some(proxy) = self.ctx.proxy().cloned() else {
            return Ok(());
        };
        let names = self
            .sessions
            .get(type_url)
            .map(|s| s.subscription().to_vec())
            .unwrap_or_default();

        let encoded = match self.service.compile(proxy, type_url.clone(), names).await {
            Ok(encoded) => encoded,
            Err(PilotError::UnsupportedType { .. }) => {
                warn!(stream = %self.ctx.id(), %type_url, "unsupported resource type, no response");
                self.sessions.remove(type_url);
                return Ok(());
            }
            Err(e) if e.is_fatal_for_stream() => return Err(e),
            Err(e) => {
                warn!(stream = %self.ctx.id(), %type_url, error = %e, "generation failed, push skipped");
                return Ok(());
            }
        };

        let Some(session) = self.sessions.get_mut(type_url) else {
            return Ok(());
        };
        match session.build_push(unless.as_ref(), encoded) {
            Some(response) => {
                debug!(
                    stream = %self.ctx.id(),
                    %type_url,
                    version = %response.version_info,
                    nonce = %response.nonce,
                    resources = response.resources.len(),
                    "pushing"
                );
                self.tx
                    .send(Ok(response))
                    .await
                    .map_err(|_| PilotError::StreamClosed {
                        reason: "response receiver dropped".into(),
                    })?;
                self.ctx.record_response();
                self.service.metrics.record_push(type_url);
            }
            None => self.service.metrics.record_suppressed(type_url),
        }
        Ok(())
    }

    fn publish_status(&self) {
        if let Some(status) = &self.status {
            status.send_replace(ConnectionStatus {
                sessions: self.sessions.values().map(PushSession::status).collect(),
                requests: self.ctx.request_count(),
                responses: self.ctx.response_count(),
            });
        }
    }
}

async fn next_push(rx: &mut Option<mpsc::Receiver<PushRequest>>) -> Option<PushRequest> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => pending().await,
    }
}

/// The `AggregatedDiscoveryService` gRPC service.
#[async_trait]
pub trait AggregatedDiscoveryService: Send + Sync + 'static {
    /// Response stream of `StreamAggregatedResources`.
    type StreamAggregatedResourcesStream: Stream<Item = Result<DiscoveryResponse, Status>>
        + Send
        + 'static;

    /// Bidirectional state-of-the-world ADS stream.
    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status>;
}

#[async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = AdsResponseStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        if self.shutdown.is_shutdown() {
            return Err(PilotError::Shutdown.into());
        }
        Ok(Response::new(self.serve_stream(request.into_inner())))
    }
}

const STREAM_AGGREGATED_RESOURCES: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

/// tonic server for an [`AggregatedDiscoveryService`].
#[derive(Debug)]
pub struct AggregatedDiscoveryServiceServer<T> {
    inner: Arc<T>,
    max_decoding_message_size: Option<usize>,
    max_encoding_message_size: Option<usize>,
}

impl<T> AggregatedDiscoveryServiceServer<T> {
    /// Wrap a service.
    pub fn new(inner: T) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    /// Wrap a shared service.
    pub fn from_arc(inner: Arc<T>) -> Self {
        Self {
            inner,
            max_decoding_message_size: None,
            max_encoding_message_size: None,
        }
    }

    /// Limit the size of decoded requests.
    #[must_use]
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.max_decoding_message_size = Some(limit);
        self
    }

    /// Limit the size of encoded responses.
    #[must_use]
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.max_encoding_message_size = Some(limit);
        self
    }
}

impl<T> Clone for AggregatedDiscoveryServiceServer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            max_decoding_message_size: self.max_decoding_message_size,
            max_encoding_message_size: self.max_encoding_message_size,
        }
    }
}

struct StreamAggregatedResourcesSvc<T>(Arc<T>);

impl<T: AggregatedDiscoveryService> tonic::server::StreamingService<DiscoveryRequest>
    for StreamAggregatedResourcesSvc<T>
{
    type Response = DiscoveryResponse;
    type ResponseStream = T::StreamAggregatedResourcesStream;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<DiscoveryRequest>>) -> Self::Future {
        let inner = Arc::clone(&self.0);
        Box::pin(async move { inner.stream_aggregated_resources(request).await })
    }
}

impl<T, B> tonic::codegen::Service<http::Request<B>> for AggregatedDiscoveryServiceServer<T>
where
    T: AggregatedDiscoveryService,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.uri().path() != STREAM_AGGREGATED_RESOURCES {
            return Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert(
                    http::HeaderName::from_static("grpc-status"),
                    http::HeaderValue::from(tonic::Code::Unimplemented as i32),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/grpc"),
                );
                Ok(response)
            });
        }

        let inner = Arc::clone(&self.inner);
        let max_decoding = self.max_decoding_message_size;
        let max_encoding = self.max_encoding_message_size;
        Box::pin(async move {
            let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default())
                .apply_max_message_size_config(max_decoding, max_encoding);
            Ok(grpc
                .streaming(StreamAggregatedResourcesSvc(inner), req)
                .await)
        })
    }
}

impl<T> tonic::server::NamedService for AggregatedDiscoveryServiceServer<T> {
    const NAME: &'static str = "envoy.service.discovery.v3.AggregatedDiscoveryService";
}
